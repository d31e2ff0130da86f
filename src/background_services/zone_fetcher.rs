//! Responsible for loading school zones and the active trip's bus stops
//! into the alert engine
use crate::{
    background_services::geofence_alerts::GeofenceAlertEngine,
    dal::fleet_data::FleetDataApi,
    model::zone::ZoneDefinition,
};
use futures::future::join;
use itertools::Itertools;
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Fetches school zones. Zones that can't be converted are logged and skipped.
#[tracing::instrument(err, skip(api))]
pub async fn fetch_school_zones(api: &dyn FleetDataApi) -> anyhow::Result<Vec<ZoneDefinition>> {
    let zones = api
        .school_zones()
        .await?
        .into_iter()
        .map(ZoneDefinition::try_from)
        .filter_map(|z| match z {
            Err(e) => {
                error!("Error turning ApiSchoolZone to ZoneDefinition {e}");
                None
            }
            Ok(z) => Some(z),
        })
        .collect_vec();

    Ok(zones)
}

/// Bus stops of the first active trip, in route order.
#[tracing::instrument(err, skip(api))]
pub async fn fetch_bus_stops(
    api: &dyn FleetDataApi,
    driver_id: Option<&str>,
) -> anyhow::Result<Vec<ZoneDefinition>> {
    let Some(trip) = api.active_trips(driver_id).await?.into_iter().next() else {
        info!("No active trip, no bus stops to watch");
        return Ok(vec![]);
    };

    let stops = trip
        .route
        .map(|r| r.stops)
        .unwrap_or_default()
        .into_iter()
        .sorted_by_key(|s| s.sequence)
        .map(ZoneDefinition::try_from)
        .filter_map(|s| match s {
            Err(e) => {
                error!("Error turning ApiRouteStop to ZoneDefinition {e}");
                None
            }
            Ok(s) => Some(s),
        })
        .collect_vec();

    info!("Trip {} has {} bus stops", trip.id, stops.len());

    Ok(stops)
}

/// Replaces the engine's zones. A set that fails to load is replaced with
/// an empty one.
pub async fn refresh_zones(
    api: &dyn FleetDataApi,
    driver_id: Option<&str>,
    engine: &GeofenceAlertEngine,
) {
    let (school_zones, bus_stops) =
        join(fetch_school_zones(api), fetch_bus_stops(api, driver_id)).await;

    engine.set_school_zones(school_zones.unwrap_or_else(|e| {
        warn!("Couldn't load school zones: {e:?}");
        vec![]
    }));

    engine.set_bus_stops(bus_stops.unwrap_or_else(|e| {
        warn!("Couldn't load bus stops: {e:?}");
        vec![]
    }));
}

pub async fn run_zone_refresher(
    api: Arc<dyn FleetDataApi>,
    driver_id: Option<String>,
    engine: Arc<GeofenceAlertEngine>,
    every: Duration,
    cancel: CancellationToken,
) {
    loop {
        refresh_zones(api.as_ref(), driver_id.as_deref(), &engine).await;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(every) => {}
        }
    }

    info!("Zone refresher stopped");
}

//! School zones and route stops from the fleet data service.
use crate::{
    dal::client::FleetApiClient,
    model::fleet_api_model::{ApiSchoolZone, ApiTrip, ListPayload},
};
use async_trait::async_trait;
use itertools::Itertools;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, info};

#[async_trait]
pub trait FleetDataApi: Send + Sync {
    async fn school_zones(&self) -> anyhow::Result<Vec<ApiSchoolZone>>;

    async fn active_trips(&self, driver_id: Option<&str>) -> anyhow::Result<Vec<ApiTrip>>;
}

/// Parses each row on its own, so one malformed row doesn't lose the rest.
fn parse_rows<T: DeserializeOwned>(payload: ListPayload<Value>, kind: &str) -> Vec<T> {
    payload
        .into_vec()
        .into_iter()
        .map(serde_json::from_value::<T>)
        .filter_map(|row| match row {
            Err(e) => {
                error!("Error parsing {kind} row {e}");
                None
            }
            Ok(row) => Some(row),
        })
        .collect_vec()
}

#[async_trait]
impl FleetDataApi for FleetApiClient {
    #[tracing::instrument(err, skip(self))]
    async fn school_zones(&self) -> anyhow::Result<Vec<ApiSchoolZone>> {
        let payload = self
            .get_json::<ListPayload<Value>, _>(&["school-zones"], &[] as &[(&str, &str)])
            .await?;
        let zones = parse_rows::<ApiSchoolZone>(payload, "school zone");

        info!("got {} school zones", zones.len());

        Ok(zones)
    }

    #[tracing::instrument(err, skip(self))]
    async fn active_trips(&self, driver_id: Option<&str>) -> anyhow::Result<Vec<ApiTrip>> {
        let mut query = vec![("status", "active")];
        if let Some(driver_id) = driver_id {
            query.push(("driver_uuid", driver_id));
        }

        let payload = self
            .get_json::<ListPayload<Value>, _>(&["trips"], &query)
            .await?;
        let trips = parse_rows::<ApiTrip>(payload, "trip");

        info!("got {} active trips", trips.len());

        Ok(trips)
    }
}

//! Tracking endpoints used for ETA and proximity data.
use crate::{
    dal::client::FleetApiClient,
    geo::Coordinate,
    model::fleet_api_model::{
        ApiBusEta, ApiProximity, ApiStopEta, CalculateEtaRequest, CheckProximityRequest,
        RouteEtaPayload,
    },
};
use async_trait::async_trait;

/// Remote ETA capability. The routing provider's computation is opaque.
#[async_trait]
pub trait EtaApi: Send + Sync {
    async fn route_etas(&self, trip_id: &str, provider: &str) -> anyhow::Result<RouteEtaPayload>;

    /// `None` when the API has no estimate for the stop.
    async fn stop_eta(
        &self,
        route_id: &str,
        stop_id: &str,
        provider: &str,
    ) -> anyhow::Result<Option<ApiStopEta>>;

    async fn calculate_eta(
        &self,
        bus_id: &str,
        destination: Coordinate,
        provider: &str,
    ) -> anyhow::Result<ApiBusEta>;

    async fn check_proximity(
        &self,
        bus_id: &str,
        stop: Coordinate,
        threshold_km: f64,
    ) -> anyhow::Result<ApiProximity>;

    async fn cached_eta(
        &self,
        bus_id: &str,
        destination: Coordinate,
    ) -> anyhow::Result<Option<ApiBusEta>>;
}

#[async_trait]
impl EtaApi for FleetApiClient {
    #[tracing::instrument(err, skip(self))]
    async fn route_etas(&self, trip_id: &str, provider: &str) -> anyhow::Result<RouteEtaPayload> {
        self.get_json(
            &["tracking", "routes", trip_id, "etas"],
            &[("provider", provider)],
        )
        .await
    }

    #[tracing::instrument(err, skip(self))]
    async fn stop_eta(
        &self,
        route_id: &str,
        stop_id: &str,
        provider: &str,
    ) -> anyhow::Result<Option<ApiStopEta>> {
        self.get_json(
            &["tracking", "routes", route_id, "stops", stop_id, "eta"],
            &[("provider", provider)],
        )
        .await
    }

    #[tracing::instrument(err, skip(self))]
    async fn calculate_eta(
        &self,
        bus_id: &str,
        destination: Coordinate,
        provider: &str,
    ) -> anyhow::Result<ApiBusEta> {
        let body = CalculateEtaRequest {
            bus_id,
            destination_lat: destination.lat,
            destination_lng: destination.lng,
            provider,
        };

        self.post_json(&["tracking", "calculate-eta"], &body).await
    }

    #[tracing::instrument(err, skip(self))]
    async fn check_proximity(
        &self,
        bus_id: &str,
        stop: Coordinate,
        threshold_km: f64,
    ) -> anyhow::Result<ApiProximity> {
        let body = CheckProximityRequest {
            bus_id,
            stop_lat: stop.lat,
            stop_lng: stop.lng,
            threshold_km,
        };

        self.post_json(&["tracking", "check-proximity"], &body).await
    }

    #[tracing::instrument(err, skip(self))]
    async fn cached_eta(
        &self,
        bus_id: &str,
        destination: Coordinate,
    ) -> anyhow::Result<Option<ApiBusEta>> {
        let lat = destination.lat.to_string();
        let lng = destination.lng.to_string();

        self.get_json(
            &["tracking", "cached-eta"],
            &[
                ("bus_id", bus_id),
                ("destination_lat", lat.as_str()),
                ("destination_lng", lng.as_str()),
            ],
        )
        .await
    }
}

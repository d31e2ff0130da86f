//! HTTP surface for the driver UI: ETA lookups, monitoring control, the
//! current safety alert and the position feed.
use crate::{
    background_services::{
        eta_monitor::EtaOptions,
        eta_store::{EtaState, EtaStore},
        geofence_alerts::GeofenceAlertEngine,
    },
    error::EtaError,
    format::{
        ARRIVING_NOW_THRESHOLD_MINUTES, EtaStatus, arrival_time, format_distance, format_eta,
    },
    model::{
        eta::{EtaKey, EtaSnapshot, StopEta},
        position::Position,
    },
};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::mpsc::Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EtaStore>,
    pub alerts: Arc<GeofenceAlertEngine>,
    pub positions: Sender<Position>,
    pub eta_options: EtaOptions,
    pub timezone: Tz,
}

#[derive(thiserror::Error, Debug)]
pub enum WebError {
    #[error(transparent)]
    Eta(#[from] EtaError),

    #[error("position out of range")]
    InvalidPosition,

    #[error("position feed closed")]
    PositionsClosed,
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebError::Eta(EtaError::NotInitialized) => StatusCode::SERVICE_UNAVAILABLE,
            WebError::Eta(EtaError::RemoteFetch { .. }) => StatusCode::BAD_GATEWAY,
            WebError::Eta(EtaError::NoData(_)) => StatusCode::NOT_FOUND,
            WebError::InvalidPosition => StatusCode::UNPROCESSABLE_ENTITY,
            WebError::PositionsClosed => StatusCode::SERVICE_UNAVAILABLE,
        };

        if status.is_server_error() {
            error!("{self:?}");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
struct StopEtaView<'a> {
    #[serde(flatten)]
    eta: &'a StopEta,
    eta_text: String,
    arrival_time: Option<String>,
    arriving_now: bool,
    status: EtaStatus,
    color: &'static str,
    distance_text: String,
}

#[derive(Serialize)]
struct EtaView<'a> {
    key: String,
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    calculated_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    /// Stop with the smallest known ETA
    next_stop_id: Option<&'a str>,
    stops: Vec<StopEtaView<'a>>,
}

impl<'a> EtaView<'a> {
    fn new(
        key: &EtaKey,
        state: &'static str,
        snapshot: Option<&'a EtaSnapshot>,
        error: Option<String>,
        timezone: Tz,
    ) -> Self {
        let now = Utc::now().with_timezone(&timezone);

        let stops = snapshot
            .map(|s| s.entries.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|eta| StopEtaView {
                eta,
                eta_text: format_eta(eta.eta_minutes),
                arrival_time: arrival_time(eta.eta_minutes, &now),
                arriving_now: eta.is_arriving_now(ARRIVING_NOW_THRESHOLD_MINUTES),
                status: eta.status(),
                color: eta.status().color(),
                distance_text: format_distance(eta.distance_km),
            })
            .collect_vec();

        Self {
            key: key.to_string(),
            state,
            error,
            calculated_at: snapshot.map(|s| s.calculated_at),
            received_at: snapshot.map(|s| s.received_at),
            next_stop_id: snapshot
                .and_then(EtaSnapshot::next_stop)
                .and_then(|e| e.stop_id.as_deref()),
            stops,
        }
    }
}

fn eta_response(app: &AppState, key: &EtaKey) -> Response {
    // a snapshot older than one poll interval is stale
    let (state, snapshot, error) = match app.store.state(key, app.eta_options.interval) {
        EtaState::Loading => ("loading", None, None),
        EtaState::Failed { error } => ("error", None, Some(error)),
        EtaState::Fresh(snapshot) => ("fresh", Some(snapshot), app.store.last_error(key)),
        EtaState::Stale(snapshot) => ("stale", Some(snapshot), app.store.last_error(key)),
    };

    Json(EtaView::new(
        key,
        state,
        snapshot.as_deref(),
        error,
        app.timezone,
    ))
    .into_response()
}

async fn get_route_etas(State(app): State<AppState>, Path(trip_id): Path<String>) -> Response {
    eta_response(&app, &EtaKey::route(trip_id))
}

async fn get_stop_eta(
    State(app): State<AppState>,
    Path((route_id, stop_id)): Path<(String, String)>,
) -> Response {
    eta_response(&app, &EtaKey::stop(route_id, stop_id))
}

async fn refresh_route_etas(
    State(app): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<Response, WebError> {
    let snapshot = app.store.refresh_route(&trip_id, &app.eta_options).await?;

    Ok(Json(EtaView::new(
        &snapshot.key,
        "fresh",
        Some(&snapshot),
        None,
        app.timezone,
    ))
    .into_response())
}

#[derive(Deserialize, Debug, Default)]
struct MonitoringParams {
    interval_secs: Option<u64>,
    provider: Option<String>,
}

async fn start_monitoring(
    State(app): State<AppState>,
    Path(trip_id): Path<String>,
    Query(params): Query<MonitoringParams>,
) -> Result<Response, WebError> {
    debug!("POST monitoring for trip {trip_id} {params:?}");

    let options = EtaOptions {
        interval: params
            .interval_secs
            .map(Duration::from_secs)
            .unwrap_or(app.eta_options.interval),
        provider: params
            .provider
            .unwrap_or_else(|| app.eta_options.provider.clone()),
    };

    let handle = app
        .store
        .monitor()
        .start_monitoring(&trip_id, options.clone())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "trip_id": handle.trip_id,
            "interval_secs": options.interval.as_secs(),
            "provider": options.provider,
        })),
    )
        .into_response())
}

async fn stop_monitoring(State(app): State<AppState>, Path(trip_id): Path<String>) -> Response {
    if app.store.monitor().stop_monitoring(&trip_id) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, "Trip not monitored").into_response()
    }
}

async fn list_monitoring(State(app): State<AppState>) -> Response {
    Json(app.store.monitor().active_subscriptions()).into_response()
}

async fn get_current_alert(State(app): State<AppState>) -> Response {
    Json(app.alerts.current_alert()).into_response()
}

async fn dismiss_alert(State(app): State<AppState>) -> Response {
    app.alerts.dismiss();
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Deserialize, Serialize, Debug)]
struct AlertsEnabled {
    enabled: bool,
}

async fn set_alerts_enabled(
    State(app): State<AppState>,
    Json(request): Json<AlertsEnabled>,
) -> Response {
    app.alerts.set_enabled(request.enabled);
    Json(AlertsEnabled {
        enabled: app.alerts.is_enabled(),
    })
    .into_response()
}

/// A raw device fix, speed in m/s.
#[derive(Deserialize, Debug)]
struct PositionFix {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

async fn post_position(
    State(app): State<AppState>,
    Json(fix): Json<PositionFix>,
) -> Result<Response, WebError> {
    let position = Position::from_fix(
        fix.latitude,
        fix.longitude,
        fix.speed,
        fix.timestamp.unwrap_or_else(Utc::now),
    );

    if !position.is_valid() {
        return Err(WebError::InvalidPosition);
    }

    app.positions
        .send(position)
        .await
        .map_err(|_| WebError::PositionsClosed)?;

    Ok(StatusCode::ACCEPTED.into_response())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/etas/routes/{trip_id}", get(get_route_etas))
        .route("/etas/routes/{trip_id}/refresh", post(refresh_route_etas))
        // trip and route ids share the segment, the router wants one name for it
        .route("/etas/routes/{trip_id}/stops/{stop_id}", get(get_stop_eta))
        .route("/monitoring", get(list_monitoring))
        .route(
            "/monitoring/{trip_id}",
            post(start_monitoring).delete(stop_monitoring),
        )
        .route("/alerts/current", get(get_current_alert).delete(dismiss_alert))
        .route("/alerts/enabled", put(set_alerts_enabled))
        .route("/positions", post(post_position))
        .route("/health", get(health_check))
        .with_state(state)
}

pub async fn run_server(
    state: AppState,
    port: u16,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;

    info!("Starting HTTP server on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped");

    Ok(())
}

//! Payloads as returned by the fleet-management API.
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};

/// The API sometimes wraps lists in `{ "data": [...] }` and sometimes doesn't.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListPayload<T> {
    Wrapped { data: Vec<T> },
    Bare(Vec<T>),
}

impl<T> ListPayload<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            ListPayload::Wrapped { data } => data,
            ListPayload::Bare(items) => items,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ApiStopEta {
    #[serde(default)]
    pub stop_id: Option<String>,
    #[serde(default)]
    pub stop_name: Option<String>,
    #[serde(default)]
    pub sequence: Option<u32>,
    /// Null while the provider has no estimate
    #[serde(default)]
    pub eta_minutes: Option<f64>,
    #[serde(default)]
    pub distance_km: Option<f64>,
}

/// `GET /tracking/routes/{tripId}/etas`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RouteEtaPayload {
    Wrapped {
        etas: Vec<ApiStopEta>,
        #[serde(default)]
        calculated_at: Option<DateTime<Utc>>,
    },
    Bare(Vec<ApiStopEta>),
}

impl RouteEtaPayload {
    pub fn into_parts(self) -> (Vec<ApiStopEta>, Option<DateTime<Utc>>) {
        match self {
            RouteEtaPayload::Wrapped {
                etas,
                calculated_at,
            } => (etas, calculated_at),
            RouteEtaPayload::Bare(etas) => (etas, None),
        }
    }
}

/// `POST /tracking/calculate-eta` and `GET /tracking/cached-eta`
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ApiBusEta {
    #[serde(default)]
    pub eta_minutes: Option<f64>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub calculated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CalculateEtaRequest<'a> {
    pub bus_id: &'a str,
    pub destination_lat: f64,
    pub destination_lng: f64,
    pub provider: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CheckProximityRequest<'a> {
    pub bus_id: &'a str,
    pub stop_lat: f64,
    pub stop_lng: f64,
    pub threshold_km: f64,
}

/// `POST /tracking/check-proximity`
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ApiProximity {
    #[serde(alias = "is_near", alias = "within_threshold")]
    pub near: bool,
    #[serde(default)]
    pub distance_km: Option<f64>,
}

/// `GET /school-zones`
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiSchoolZone {
    pub id: String,
    pub name: String,
    #[serde(alias = "latitude")]
    pub center_latitude: f64,
    #[serde(alias = "longitude")]
    pub center_longitude: f64,
    /// Meters
    #[serde(default)]
    pub radius: Option<f64>,
    /// mph
    #[serde(default)]
    pub speed_limit: Option<f64>,
    #[serde(default)]
    pub active_hours: Vec<ApiActiveHours>,
    /// 0-6, Sunday-Saturday
    #[serde(default)]
    pub days_active: Vec<u8>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct ApiActiveHours {
    #[serde(deserialize_with = "naive_time_from_hh_mm")]
    pub start: NaiveTime,
    #[serde(deserialize_with = "naive_time_from_hh_mm")]
    pub end: NaiveTime,
}

/// `GET /trips?status=active`
#[derive(Debug, Deserialize, Clone)]
pub struct ApiTrip {
    pub id: String,
    #[serde(default)]
    pub route: Option<ApiRoute>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiRoute {
    #[serde(default)]
    pub stops: Vec<ApiRouteStop>,
}

/// Coordinates come either flat on the stop or nested in its location.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiRouteStop {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sequence: Option<u32>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub location: Option<ApiLocation>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiLocation {
    #[serde(default)]
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

fn default_true() -> bool {
    true
}

// Zone schedules come as "HH:MM", sometimes with trailing seconds
fn naive_time_from_hh_mm<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;

    NaiveTime::parse_from_str(&s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
        .map_err(de::Error::custom)
}

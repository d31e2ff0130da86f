use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    SchoolZoneSpeed,
    SchoolZoneEntry,
    BusStopApproach,
}

impl AlertKind {
    pub fn is_school_zone(self) -> bool {
        matches!(self, AlertKind::SchoolZoneSpeed | AlertKind::SchoolZoneEntry)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct SpeedReading {
    pub current_mph: f64,
    pub limit_mph: f64,
}

/// The alert currently shown to the driver. At most one exists at a time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SafetyAlert {
    /// Unique per engine, used to tell a superseded alert from the current one
    pub id: u64,
    pub kind: AlertKind,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    /// Zone or stop that triggered the alert
    pub location_name: String,
    pub speed: Option<SpeedReading>,
    pub created_at: DateTime<Utc>,
}

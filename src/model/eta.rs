use crate::{
    format::{EtaStatus, eta_status, is_arriving_now},
    geo::Coordinate,
    model::fleet_api_model::{ApiBusEta, ApiStopEta},
};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

/// Identifies one cached ETA result.
#[derive(Clone, Debug)]
pub enum EtaKey {
    Route {
        trip_id: String,
    },
    Stop {
        route_id: String,
        stop_id: String,
    },
    Bus {
        bus_id: String,
        destination: Coordinate,
    },
}

impl EtaKey {
    pub fn route(trip_id: impl Into<String>) -> Self {
        EtaKey::Route {
            trip_id: trip_id.into(),
        }
    }

    pub fn stop(route_id: impl Into<String>, stop_id: impl Into<String>) -> Self {
        EtaKey::Stop {
            route_id: route_id.into(),
            stop_id: stop_id.into(),
        }
    }

    pub fn bus(bus_id: impl Into<String>, destination: Coordinate) -> Self {
        EtaKey::Bus {
            bus_id: bus_id.into(),
            destination,
        }
    }
}

impl fmt::Display for EtaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtaKey::Route { trip_id } => write!(f, "route:{trip_id}"),
            EtaKey::Stop { route_id, stop_id } => write!(f, "stop:{route_id}:{stop_id}"),
            EtaKey::Bus {
                bus_id,
                destination,
            } => write!(f, "bus:{bus_id}:{}:{}", destination.lat, destination.lng),
        }
    }
}

// Coordinates compare bitwise so keys can live in a HashMap
impl PartialEq for EtaKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EtaKey::Route { trip_id: a }, EtaKey::Route { trip_id: b }) => a == b,
            (
                EtaKey::Stop {
                    route_id: ra,
                    stop_id: sa,
                },
                EtaKey::Stop {
                    route_id: rb,
                    stop_id: sb,
                },
            ) => ra == rb && sa == sb,
            (
                EtaKey::Bus {
                    bus_id: ba,
                    destination: da,
                },
                EtaKey::Bus {
                    bus_id: bb,
                    destination: db,
                },
            ) => {
                ba == bb
                    && da.lat.to_bits() == db.lat.to_bits()
                    && da.lng.to_bits() == db.lng.to_bits()
            }
            _ => false,
        }
    }
}

impl Eq for EtaKey {}

impl Hash for EtaKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            EtaKey::Route { trip_id } => trip_id.hash(state),
            EtaKey::Stop { route_id, stop_id } => {
                route_id.hash(state);
                stop_id.hash(state);
            }
            EtaKey::Bus {
                bus_id,
                destination,
            } => {
                bus_id.hash(state);
                destination.lat.to_bits().hash(state);
                destination.lng.to_bits().hash(state);
            }
        }
    }
}

impl Serialize for EtaKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One stop (or destination) in a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StopEta {
    pub stop_id: Option<String>,
    pub stop_name: Option<String>,
    pub sequence: Option<u32>,
    /// `None` is "unknown", never "arriving"
    pub eta_minutes: Option<f64>,
    pub distance_km: Option<f64>,
}

impl StopEta {
    pub fn is_arriving_now(&self, threshold_minutes: f64) -> bool {
        is_arriving_now(self.eta_minutes, threshold_minutes)
    }

    pub fn status(&self) -> EtaStatus {
        eta_status(self.eta_minutes)
    }
}

impl From<ApiStopEta> for StopEta {
    fn from(value: ApiStopEta) -> Self {
        StopEta {
            stop_id: value.stop_id,
            stop_name: value.stop_name,
            sequence: value.sequence,
            eta_minutes: value.eta_minutes,
            distance_km: value.distance_km,
        }
    }
}

impl From<ApiBusEta> for StopEta {
    fn from(value: ApiBusEta) -> Self {
        StopEta {
            stop_id: None,
            stop_name: None,
            sequence: None,
            eta_minutes: value.eta_minutes,
            distance_km: value.distance_km,
        }
    }
}

/// Latest known ETA data for a key. Never mutated, only replaced.
#[derive(Clone, Debug, Serialize)]
pub struct EtaSnapshot {
    pub key: EtaKey,
    pub entries: Vec<StopEta>,
    /// When the provider calculated the ETAs, falls back to `received_at`
    pub calculated_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    /// Monotonic per process, assigned when the fetch completed
    pub revision: u64,
}

impl EtaSnapshot {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.received_at
    }

    /// The stop with the smallest known ETA.
    pub fn next_stop(&self) -> Option<&StopEta> {
        self.entries
            .iter()
            .filter(|e| e.eta_minutes.is_some())
            .min_by(|a, b| {
                a.eta_minutes
                    .partial_cmp(&b.eta_minutes)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

/// Published by the monitor on every successful poll.
#[derive(Clone, Debug)]
pub struct EtaUpdate {
    pub trip_id: String,
    pub etas: Arc<EtaSnapshot>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct ProximityResult {
    pub near: bool,
    pub distance_km: Option<f64>,
}

use crate::geo::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MPS_TO_MPH: f64 = 2.237;

/// A single location fix. Only the latest one is ever kept.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Position {
    pub coordinate: Coordinate,
    pub speed_mph: f64,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    /// Builds a position from a raw device fix with speed in m/s.
    ///
    /// Devices report -1 or nothing when speed is unavailable, that reads as
    /// standing still. Speed is rounded to whole mph.
    pub fn from_fix(lat: f64, lng: f64, speed_mps: Option<f64>, timestamp: DateTime<Utc>) -> Self {
        let speed_mph = match speed_mps {
            Some(mps) if mps.is_finite() && mps > 0.0 => (mps * MPS_TO_MPH).round(),
            _ => 0.0,
        };

        Position {
            coordinate: Coordinate::new(lat, lng),
            speed_mph,
            timestamp,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.coordinate.is_valid() && self.speed_mph.is_finite() && self.speed_mph >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_speed() {
        let now = Utc::now();
        assert_eq!(Position::from_fix(40.0, -75.0, Some(10.0), now).speed_mph, 22.0);
        assert_eq!(Position::from_fix(40.0, -75.0, Some(-1.0), now).speed_mph, 0.0);
        assert_eq!(Position::from_fix(40.0, -75.0, None, now).speed_mph, 0.0);
    }

    #[test]
    fn validity() {
        let now = Utc::now();
        assert!(Position::from_fix(40.0, -75.0, Some(10.0), now).is_valid());
        assert!(!Position::from_fix(f64::NAN, -75.0, Some(10.0), now).is_valid());
        assert!(!Position::from_fix(40.0, 200.0, None, now).is_valid());
    }
}

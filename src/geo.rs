//! Great-circle distance on a spherical earth.
use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Finite and within the lat/lng ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Haversine distance in meters.
///
/// Deltas are taken as absolute values so `d(a, b)` and `d(b, a)` evaluate
/// the exact same float operations.
pub fn haversine_distance(a: Coordinate, b: Coordinate) -> f64 {
    let lat1_rad = a.lat.to_radians();
    let lat2_rad = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).abs().to_radians();
    let delta_lng = (b.lng - a.lng).abs().to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

pub fn is_within_radius(point: Coordinate, center: Coordinate, radius_m: f64) -> bool {
    haversine_distance(point, center) <= radius_m
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A point `meters` due north of `origin`.
    pub(crate) fn north_of(origin: Coordinate, meters: f64) -> Coordinate {
        Coordinate::new(origin.lat + (meters / EARTH_RADIUS_M).to_degrees(), origin.lng)
    }

    #[test]
    fn identical_points_are_zero_apart() {
        let p = Coordinate::new(45.815, 15.9819);
        assert_eq!(haversine_distance(p, p), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Coordinate::new(45.815, 15.9819);
        let b = Coordinate::new(45.5511, 18.6939);
        assert_eq!(haversine_distance(a, b), haversine_distance(b, a));

        let c = Coordinate::new(-33.8688, 151.2093);
        let d = Coordinate::new(51.5074, -0.1278);
        assert_eq!(haversine_distance(c, d), haversine_distance(d, c));
    }

    #[test]
    fn known_distance() {
        // Zagreb to Osijek is roughly 211 km
        let zagreb = Coordinate::new(45.815, 15.9819);
        let osijek = Coordinate::new(45.5511, 18.6939);
        let d = haversine_distance(zagreb, osijek);
        assert!((d - 211_000.0).abs() < 2_000.0, "got {d}");
    }

    #[test]
    fn radius_boundary() {
        let center = Coordinate::new(40.0, -75.0);
        let radius = 500.0;

        assert!(is_within_radius(north_of(center, radius - 1.0), center, radius));
        assert!(!is_within_radius(north_of(center, radius + 1.0), center, radius));
    }

    #[test]
    fn validity() {
        assert!(Coordinate::new(0.0, 0.0).is_valid());
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, f64::NAN).is_valid());
    }
}

use crate::{
    geo::{Coordinate, is_within_radius},
    model::fleet_api_model::{ApiActiveHours, ApiRouteStop, ApiSchoolZone},
};
use anyhow::anyhow;
use chrono::{DateTime, Datelike, NaiveTime, TimeZone};
use serde::Serialize;

pub const DEFAULT_SCHOOL_ZONE_RADIUS_M: f64 = 500.0;
pub const BUS_STOP_RADIUS_M: f64 = 100.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    SchoolZone,
    BusStop,
}

/// `start..end`, wrapping past midnight when `end <= start`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct ActiveHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ActiveHours {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

impl From<ApiActiveHours> for ActiveHours {
    fn from(value: ApiActiveHours) -> Self {
        ActiveHours {
            start: value.start,
            end: value.end,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ZoneDefinition {
    pub id: String,
    pub name: String,
    pub kind: ZoneKind,
    pub center: Coordinate,
    pub radius_m: f64,
    /// mph; when unset the globally configured school-zone limit applies
    pub speed_limit_mph: Option<f64>,
    pub active_hours: Vec<ActiveHours>,
    /// 0-6, Sunday-Saturday. Empty means every day.
    pub days_active: Vec<u8>,
    pub is_active: bool,
}

impl ZoneDefinition {
    pub fn school_zone(
        id: impl Into<String>,
        name: impl Into<String>,
        center: Coordinate,
        radius_m: Option<f64>,
        speed_limit_mph: Option<f64>,
    ) -> Self {
        ZoneDefinition {
            id: id.into(),
            name: name.into(),
            kind: ZoneKind::SchoolZone,
            center,
            radius_m: radius_m.unwrap_or(DEFAULT_SCHOOL_ZONE_RADIUS_M),
            speed_limit_mph,
            active_hours: vec![],
            days_active: vec![],
            is_active: true,
        }
    }

    pub fn bus_stop(id: impl Into<String>, name: impl Into<String>, center: Coordinate) -> Self {
        ZoneDefinition {
            id: id.into(),
            name: name.into(),
            kind: ZoneKind::BusStop,
            center,
            radius_m: BUS_STOP_RADIUS_M,
            speed_limit_mph: None,
            active_hours: vec![],
            days_active: vec![],
            is_active: true,
        }
    }

    pub fn contains(&self, point: Coordinate) -> bool {
        is_within_radius(point, self.center, self.radius_m)
    }

    /// Whether the zone's own schedule covers `local`.
    pub fn is_active_at<Tz: TimeZone>(&self, local: &DateTime<Tz>) -> bool {
        if !self.is_active {
            return false;
        }

        let weekday = local.weekday().num_days_from_sunday() as u8;
        if !self.days_active.is_empty() && !self.days_active.contains(&weekday) {
            return false;
        }

        let time = local.time();
        self.active_hours.is_empty() || self.active_hours.iter().any(|h| h.contains(time))
    }
}

impl TryFrom<ApiSchoolZone> for ZoneDefinition {
    type Error = anyhow::Error;

    fn try_from(value: ApiSchoolZone) -> Result<Self, Self::Error> {
        let center = Coordinate::new(value.center_latitude, value.center_longitude);
        if !center.is_valid() {
            return Err(anyhow!("school zone {} has invalid center {:?}", value.id, center));
        }

        // zero or missing radius falls back to the default
        let radius_m = value.radius.filter(|r| *r > 0.0);
        let speed_limit_mph = value.speed_limit.filter(|l| *l > 0.0);

        Ok(ZoneDefinition {
            active_hours: value.active_hours.into_iter().map(ActiveHours::from).collect(),
            days_active: value.days_active,
            is_active: value.is_active,
            ..ZoneDefinition::school_zone(value.id, value.name, center, radius_m, speed_limit_mph)
        })
    }
}

impl TryFrom<ApiRouteStop> for ZoneDefinition {
    type Error = anyhow::Error;

    fn try_from(value: ApiRouteStop) -> Result<Self, Self::Error> {
        let (center, location_name) = match (value.latitude, value.longitude, value.location) {
            (Some(lat), Some(lng), location) => {
                (Coordinate::new(lat, lng), location.and_then(|l| l.name))
            }
            (_, _, Some(location)) => (
                Coordinate::new(location.latitude, location.longitude),
                location.name,
            ),
            _ => return Err(anyhow!("bus stop {} has no coordinates", value.id)),
        };

        if !center.is_valid() {
            return Err(anyhow!("bus stop {} has invalid coordinates {:?}", value.id, center));
        }

        let name = value
            .name
            .or(location_name)
            .unwrap_or_else(|| match value.sequence {
                Some(sequence) => format!("Stop {sequence}"),
                None => "bus stop".to_string(),
            });

        Ok(ZoneDefinition::bus_stop(value.id, name, center))
    }
}

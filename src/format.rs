//! Display helpers for ETA values. `None` always means "unknown", never zero.
use chrono::{DateTime, TimeDelta, TimeZone};
use serde::Serialize;
use std::fmt::Display;

pub const ARRIVING_NOW_THRESHOLD_MINUTES: f64 = 2.0;
const WARNING_THRESHOLD_MINUTES: f64 = 10.0;

pub fn format_eta(minutes: Option<f64>) -> String {
    let Some(minutes) = minutes else {
        return "TBD".to_string();
    };

    if minutes <= 0.0 {
        return "Arriving now".to_string();
    }

    if minutes < 1.0 {
        return "Less than 1 min".to_string();
    }

    let total = minutes.round() as u64;
    if total < 60 {
        return format!("{total} min");
    }

    let hours = total / 60;
    let mins = total % 60;
    if mins == 0 {
        format!("{hours}h")
    } else {
        format!("{hours}h {mins}m")
    }
}

/// Wall-clock arrival time (`HH:MM`) relative to `now`. `None` when the
/// arrival can't be represented as a date.
pub fn arrival_time<Tz>(minutes: Option<f64>, now: &DateTime<Tz>) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let minutes = minutes.filter(|m| m.is_finite())?;
    let offset = TimeDelta::try_milliseconds((minutes * 60_000.0).round() as i64)?;
    let arrival = now.clone().checked_add_signed(offset)?;

    Some(arrival.format("%H:%M").to_string())
}

pub fn is_arriving_now(minutes: Option<f64>, threshold_minutes: f64) -> bool {
    minutes.is_some_and(|m| m <= threshold_minutes)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EtaStatus {
    Critical,
    Warning,
    Normal,
    Neutral,
}

impl EtaStatus {
    pub fn color(self) -> &'static str {
        match self {
            EtaStatus::Critical => "#EF4444",
            EtaStatus::Warning => "#F59E0B",
            EtaStatus::Normal => "#10B981",
            EtaStatus::Neutral => "#6B7280",
        }
    }
}

pub fn eta_status(minutes: Option<f64>) -> EtaStatus {
    match minutes {
        None => EtaStatus::Neutral,
        Some(m) if m <= ARRIVING_NOW_THRESHOLD_MINUTES => EtaStatus::Critical,
        Some(m) if m <= WARNING_THRESHOLD_MINUTES => EtaStatus::Warning,
        Some(_) => EtaStatus::Normal,
    }
}

/// Meters below one kilometer, otherwise kilometers with one decimal.
/// Unknown or zero distance renders empty.
pub fn format_distance(distance_km: Option<f64>) -> String {
    match distance_km {
        None => String::new(),
        Some(km) if km == 0.0 || !km.is_finite() => String::new(),
        Some(km) if km < 1.0 => format!("{}m", (km * 1000.0).round() as i64),
        Some(km) => format!("{km:.1}km"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(None), "TBD");
        assert_eq!(format_eta(Some(0.0)), "Arriving now");
        assert_eq!(format_eta(Some(-3.0)), "Arriving now");
        assert_eq!(format_eta(Some(0.5)), "Less than 1 min");
        assert_eq!(format_eta(Some(5.0)), "5 min");
        assert_eq!(format_eta(Some(65.0)), "1h 5m");
        assert_eq!(format_eta(Some(120.0)), "2h");
        assert_eq!(format_eta(Some(119.7)), "2h");
        assert_eq!(format_eta(Some(59.6)), "1h");
    }

    #[test]
    fn test_status_color() {
        assert_eq!(eta_status(Some(1.0)), EtaStatus::Critical);
        assert_eq!(eta_status(Some(2.0)), EtaStatus::Critical);
        assert_eq!(eta_status(Some(8.0)), EtaStatus::Warning);
        assert_eq!(eta_status(Some(30.0)), EtaStatus::Normal);
        assert_eq!(eta_status(None), EtaStatus::Neutral);

        assert_eq!(eta_status(Some(1.0)).color(), "#EF4444");
        assert_eq!(eta_status(None).color(), "#6B7280");
    }

    #[test]
    fn test_arriving_now() {
        assert!(is_arriving_now(Some(0.0), ARRIVING_NOW_THRESHOLD_MINUTES));
        assert!(is_arriving_now(Some(2.0), ARRIVING_NOW_THRESHOLD_MINUTES));
        assert!(!is_arriving_now(Some(2.5), ARRIVING_NOW_THRESHOLD_MINUTES));
        assert!(!is_arriving_now(None, ARRIVING_NOW_THRESHOLD_MINUTES));
        assert!(is_arriving_now(Some(4.0), 5.0));
    }

    #[test]
    fn test_arrival_time() -> Result<(), anyhow::Error> {
        let now = Utc
            .with_ymd_and_hms(2024, 1, 27, 7, 50, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("invalid date"))?;

        assert_eq!(arrival_time(Some(15.0), &now).as_deref(), Some("08:05"));
        assert_eq!(arrival_time(None, &now), None);

        let zagreb = now.with_timezone(&chrono_tz::Europe::Zagreb);
        assert_eq!(arrival_time(Some(15.0), &zagreb).as_deref(), Some("09:05"));

        Ok(())
    }

    #[test]
    fn test_arrival_time_out_of_range() -> Result<(), anyhow::Error> {
        let now = Utc
            .with_ymd_and_hms(2024, 1, 27, 7, 50, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("invalid date"))?;

        assert_eq!(arrival_time(Some(1e12), &now), None);
        assert_eq!(arrival_time(Some(-1e12), &now), None);
        assert_eq!(arrival_time(Some(f64::INFINITY), &now), None);
        assert_eq!(arrival_time(Some(f64::NAN), &now), None);

        Ok(())
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(None), "");
        assert_eq!(format_distance(Some(0.0)), "");
        assert_eq!(format_distance(Some(0.4)), "400m");
        assert_eq!(format_distance(Some(1.0)), "1.0km");
        assert_eq!(format_distance(Some(2.345)), "2.3km");
    }
}

use crate::background_services::{
    eta_monitor::{DEFAULT_PROVIDER, EtaOptions},
    geofence_alerts::{AlertSettings, ZoneSchedulePolicy},
};
use anyhow::anyhow;
use chrono_tz::Tz;
use clap::{ArgAction, Parser};
use std::{path::PathBuf, time::Duration};

#[derive(Parser, Debug, Clone)]
#[command(name = "bus-eta-alerts")]
#[command(about = "ETA monitoring and geofence alerts for school bus trips")]
pub struct Settings {
    /// Base url of the fleet-management API
    #[arg(long, env = "FLEET_API_URL", default_value = "http://localhost:8000/school-transport/")]
    pub api_base_url: String,

    #[arg(
        long,
        env = "FLEET_API_TIMEOUT_SECS",
        default_value_t = 15,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub api_timeout_secs: u64,

    /// Driver whose active trip supplies the bus stops
    #[arg(long, env = "DRIVER_ID")]
    pub driver_id: Option<String>,

    #[arg(long, env = "ETA_PROVIDER", default_value = DEFAULT_PROVIDER)]
    pub eta_provider: String,

    /// Seconds between ETA polls of a monitored trip
    #[arg(long, env = "ETA_UPDATE_INTERVAL", default_value_t = 30)]
    pub eta_update_interval: u64,

    /// mph, used for zones without their own limit
    #[arg(long, env = "SCHOOL_ZONE_SPEED_LIMIT", default_value_t = 25.0)]
    pub school_zone_speed_limit: f64,

    #[arg(long, env = "ENABLE_SPEED_WARNINGS", default_value_t = true, action = ArgAction::Set)]
    pub enable_speed_warnings: bool,

    #[arg(long, env = "ENABLE_SCHOOL_ZONE_ALERTS", default_value_t = true, action = ArgAction::Set)]
    pub enable_school_zone_alerts: bool,

    /// Only alert for school zones inside their active days and hours
    #[arg(long, env = "RESPECT_ZONE_SCHEDULES", default_value_t = false, action = ArgAction::Set)]
    pub respect_zone_schedules: bool,

    /// IANA name, used for zone schedules and displayed arrival times
    #[arg(long, env = "DISPLAY_TIMEZONE", default_value = "UTC")]
    pub timezone: String,

    #[arg(
        long,
        env = "ZONE_REFRESH_SECS",
        default_value_t = 3600,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub zone_refresh_secs: u64,

    /// Port to run the HTTP server on
    #[arg(short, long, env = "SERVER_PORT", default_value_t = 8080)]
    pub port: u16,

    /// OTLP collector, telemetry export is off when unset
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "LOG_DIR", default_value = "./logs")]
    pub log_dir: PathBuf,
}

impl Settings {
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn zone_refresh(&self) -> Duration {
        Duration::from_secs(self.zone_refresh_secs)
    }

    pub fn eta_options(&self) -> EtaOptions {
        EtaOptions {
            interval: Duration::from_secs(self.eta_update_interval),
            provider: self.eta_provider.clone(),
        }
    }

    pub fn timezone(&self) -> anyhow::Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("invalid timezone {}: {e}", self.timezone))
    }

    pub fn alert_settings(&self) -> anyhow::Result<AlertSettings> {
        let schedule_policy = if self.respect_zone_schedules {
            ZoneSchedulePolicy::Scheduled(self.timezone()?)
        } else {
            ZoneSchedulePolicy::AlwaysActive
        };

        Ok(AlertSettings {
            school_zone_speed_limit_mph: self.school_zone_speed_limit,
            speed_warnings_enabled: self.enable_speed_warnings,
            school_zone_alerts_enabled: self.enable_school_zone_alerts,
            schedule_policy,
        })
    }
}

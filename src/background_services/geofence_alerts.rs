//! Turns position fixes into school-zone and bus-stop safety alerts.
use crate::model::{
    alert::{AlertKind, SafetyAlert, Severity, SpeedReading},
    position::Position,
    zone::ZoneDefinition,
};
use chrono::Utc;
use chrono_tz::Tz;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak},
    time::Duration,
};
use tokio::{sync::watch, time::Instant};
use tracing::{debug, info};

pub const DEFAULT_SCHOOL_ZONE_SPEED_LIMIT_MPH: f64 = 25.0;
pub const ALERT_COOLDOWN: Duration = Duration::from_secs(10);
pub const INFO_AUTO_DISMISS: Duration = Duration::from_secs(5);
pub const BUS_STOP_SPEED_THRESHOLD_MPH: f64 = 15.0;
/// Over the limit by more than this is critical
const CRITICAL_MARGIN_MPH: f64 = 10.0;

/// Decides whether a school zone's own schedule is honored.
#[derive(Clone, Debug, PartialEq)]
pub enum ZoneSchedulePolicy {
    /// Every zone counts at all times
    AlwaysActive,
    /// Zone days and hours are checked in the given timezone
    Scheduled(Tz),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AlertSettings {
    pub school_zone_speed_limit_mph: f64,
    pub speed_warnings_enabled: bool,
    pub school_zone_alerts_enabled: bool,
    pub schedule_policy: ZoneSchedulePolicy,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            school_zone_speed_limit_mph: DEFAULT_SCHOOL_ZONE_SPEED_LIMIT_MPH,
            speed_warnings_enabled: true,
            school_zone_alerts_enabled: true,
            schedule_policy: ZoneSchedulePolicy::AlwaysActive,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HapticPattern {
    /// One 200ms pulse
    Pulse,
    /// Three 200ms pulses, 100ms apart
    TriplePulse,
}

impl HapticPattern {
    /// Alternating on/off durations, starting with on.
    pub fn timings(self) -> &'static [Duration] {
        const PULSE: &[Duration] = &[Duration::from_millis(200)];
        const TRIPLE_PULSE: &[Duration] = &[
            Duration::from_millis(200),
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(100),
            Duration::from_millis(200),
        ];

        match self {
            HapticPattern::Pulse => PULSE,
            HapticPattern::TriplePulse => TRIPLE_PULSE,
        }
    }
}

pub trait Haptics: Send + Sync {
    fn play(&self, pattern: HapticPattern);
}

/// Used when there's no device to vibrate.
pub struct LogHaptics;

impl Haptics for LogHaptics {
    fn play(&self, pattern: HapticPattern) {
        debug!("Haptic feedback {:?} {:?}", pattern, pattern.timings());
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    InvalidPosition,
    Cooldown,
}

/// Outcome of evaluating one position.
#[derive(Clone, Debug, PartialEq)]
pub enum Evaluation {
    Skipped(SkipReason),
    Emitted(SafetyAlert),
    Cleared,
    Unchanged,
}

struct ActiveAlert {
    alert: SafetyAlert,
    /// Only informational alerts expire on their own
    expires_at: Option<Instant>,
}

struct AlertState {
    enabled: bool,
    current: Option<ActiveAlert>,
    last_alert_at: Option<Instant>,
    next_id: u64,
}

/// State shared with the auto-dismiss timers.
struct Shared {
    state: Mutex<AlertState>,
    alerts: watch::Sender<Option<SafetyAlert>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, AlertState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_current(&self, state: &mut AlertState, current: Option<ActiveAlert>) {
        state.current = current;
        self.alerts
            .send_replace(state.current.as_ref().map(|a| a.alert.clone()));
    }

    /// Drops an informational alert whose display time is over.
    fn expire(&self, state: &mut AlertState, now: Instant) {
        let expired = state
            .current
            .as_ref()
            .and_then(|a| a.expires_at)
            .is_some_and(|expires_at| now >= expires_at);

        if expired {
            debug!("Informational alert expired");
            self.set_current(state, None);
        }
    }

    fn dismiss_if_current(&self, id: u64) {
        let mut state = self.lock();
        if state.current.as_ref().is_some_and(|a| a.alert.id == id) {
            debug!("Auto-dismissing alert {id}");
            self.set_current(&mut state, None);
        }
    }
}

#[derive(Default)]
struct Zones {
    school_zones: Vec<ZoneDefinition>,
    bus_stops: Vec<ZoneDefinition>,
}

struct AlertDraft {
    kind: AlertKind,
    severity: Severity,
    title: &'static str,
    message: String,
    location_name: String,
    speed: Option<SpeedReading>,
}

/// Keeps at most one active alert and rate limits new ones.
///
/// Alert changes are pushed to [`GeofenceAlertEngine::subscribe`] receivers.
pub struct GeofenceAlertEngine {
    settings: AlertSettings,
    zones: RwLock<Zones>,
    shared: Arc<Shared>,
    haptics: Arc<dyn Haptics>,
}

impl GeofenceAlertEngine {
    pub fn new(settings: AlertSettings, haptics: Arc<dyn Haptics>) -> Self {
        let (alerts, _) = watch::channel(None);

        Self {
            settings,
            zones: RwLock::new(Zones::default()),
            shared: Arc::new(Shared {
                state: Mutex::new(AlertState {
                    enabled: true,
                    current: None,
                    last_alert_at: None,
                    next_id: 0,
                }),
                alerts,
            }),
            haptics,
        }
    }

    pub fn set_school_zones(&self, zones: Vec<ZoneDefinition>) {
        info!("Watching {} school zones", zones.len());
        self.zones
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .school_zones = zones;
    }

    pub fn set_bus_stops(&self, stops: Vec<ZoneDefinition>) {
        info!("Watching {} bus stops", stops.len());
        self.zones
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .bus_stops = stops;
    }

    /// (school zones, bus stops)
    pub fn zone_counts(&self) -> (usize, usize) {
        let zones = self.zones.read().unwrap_or_else(PoisonError::into_inner);
        (zones.school_zones.len(), zones.bus_stops.len())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SafetyAlert>> {
        self.shared.alerts.subscribe()
    }

    pub fn current_alert(&self) -> Option<SafetyAlert> {
        let mut state = self.shared.lock();
        self.shared.expire(&mut state, Instant::now());
        state.current.as_ref().map(|a| a.alert.clone())
    }

    /// Clears the current alert. The cooldown keeps running.
    pub fn dismiss(&self) -> Option<SafetyAlert> {
        let mut state = self.shared.lock();
        self.shared.expire(&mut state, Instant::now());
        let dismissed = state.current.take().map(|a| a.alert);
        self.shared.set_current(&mut state, None);

        if let Some(alert) = &dismissed {
            info!("Alert {} dismissed", alert.id);
        }

        dismissed
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.lock().enabled
    }

    /// Disabling also clears whatever is shown.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.shared.lock();
        state.enabled = enabled;
        if !enabled && state.current.is_some() {
            self.shared.set_current(&mut state, None);
        }

        info!("Geofence alerts {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn toggle(&self) -> bool {
        let enabled = !self.is_enabled();
        self.set_enabled(enabled);
        enabled
    }

    pub fn evaluate(&self, position: &Position) -> Evaluation {
        let evaluation = {
            let mut state = self.shared.lock();
            self.decide(&mut state, position, Instant::now())
        };

        if let Evaluation::Emitted(alert) = &evaluation {
            self.notify(alert);
        }

        evaluation
    }

    fn zone_in_effect(&self, zone: &ZoneDefinition, position: &Position) -> bool {
        match &self.settings.schedule_policy {
            ZoneSchedulePolicy::AlwaysActive => true,
            ZoneSchedulePolicy::Scheduled(tz) => {
                zone.is_active_at(&position.timestamp.with_timezone(tz))
            }
        }
    }

    fn decide(&self, state: &mut AlertState, position: &Position, now: Instant) -> Evaluation {
        self.shared.expire(state, now);

        if !state.enabled || !self.settings.school_zone_alerts_enabled {
            return Evaluation::Skipped(SkipReason::Disabled);
        }

        if !position.is_valid() {
            debug!("Ignoring invalid position {:?}", position);
            return Evaluation::Skipped(SkipReason::InvalidPosition);
        }

        if state
            .last_alert_at
            .is_some_and(|last| now.duration_since(last) < ALERT_COOLDOWN)
        {
            return Evaluation::Skipped(SkipReason::Cooldown);
        }

        let zones = self.zones.read().unwrap_or_else(PoisonError::into_inner);
        let speed = position.speed_mph;

        let school_zone = zones
            .school_zones
            .iter()
            .filter(|z| self.zone_in_effect(z, position))
            .find(|z| z.contains(position.coordinate));

        if let Some(zone) = school_zone {
            let limit = zone
                .speed_limit_mph
                .unwrap_or(self.settings.school_zone_speed_limit_mph);

            if self.settings.speed_warnings_enabled && speed > limit {
                let severity = if speed > limit + CRITICAL_MARGIN_MPH {
                    Severity::Critical
                } else {
                    Severity::Warning
                };

                let draft = AlertDraft {
                    kind: AlertKind::SchoolZoneSpeed,
                    severity,
                    title: "School Zone Speed Alert",
                    message: "Slow down! You're in a school zone.".to_string(),
                    location_name: zone.name.clone(),
                    speed: Some(SpeedReading {
                        current_mph: speed,
                        limit_mph: limit,
                    }),
                };
                return Evaluation::Emitted(self.emit(state, draft, now));
            }

            let showing_school_zone = state
                .current
                .as_ref()
                .is_some_and(|a| a.alert.kind.is_school_zone());

            if !showing_school_zone {
                let draft = AlertDraft {
                    kind: AlertKind::SchoolZoneEntry,
                    severity: Severity::Info,
                    title: "School Zone",
                    message: format!("Entering {}. Speed limit: {} mph", zone.name, limit),
                    location_name: zone.name.clone(),
                    speed: None,
                };
                return Evaluation::Emitted(self.emit(state, draft, now));
            }
        }

        let bus_stop = zones
            .bus_stops
            .iter()
            .find(|s| s.contains(position.coordinate));

        if let Some(stop) = bus_stop {
            if speed > BUS_STOP_SPEED_THRESHOLD_MPH {
                let draft = AlertDraft {
                    kind: AlertKind::BusStopApproach,
                    severity: Severity::Warning,
                    title: "Bus Stop Ahead",
                    message: format!("Approaching {}. Prepare to stop.", stop.name),
                    location_name: stop.name.clone(),
                    speed: Some(SpeedReading {
                        current_mph: speed,
                        limit_mph: BUS_STOP_SPEED_THRESHOLD_MPH,
                    }),
                };
                return Evaluation::Emitted(self.emit(state, draft, now));
            }
        }

        if school_zone.is_none() && bus_stop.is_none() && state.current.is_some() {
            info!("Left all zones, clearing alert");
            self.shared.set_current(state, None);
            return Evaluation::Cleared;
        }

        Evaluation::Unchanged
    }

    fn emit(&self, state: &mut AlertState, draft: AlertDraft, now: Instant) -> SafetyAlert {
        state.next_id += 1;

        let alert = SafetyAlert {
            id: state.next_id,
            kind: draft.kind,
            severity: draft.severity,
            title: draft.title.to_string(),
            message: draft.message,
            location_name: draft.location_name,
            speed: draft.speed,
            created_at: Utc::now(),
        };

        let expires_at = (alert.severity == Severity::Info).then(|| now + INFO_AUTO_DISMISS);
        state.last_alert_at = Some(now);
        self.shared.set_current(
            state,
            Some(ActiveAlert {
                alert: alert.clone(),
                expires_at,
            }),
        );

        info!(
            kind = ?alert.kind,
            severity = ?alert.severity,
            location = %alert.location_name,
            "{}",
            alert.message
        );

        alert
    }

    fn notify(&self, alert: &SafetyAlert) {
        match alert.severity {
            Severity::Critical => self.haptics.play(HapticPattern::TriplePulse),
            Severity::Warning => self.haptics.play(HapticPattern::Pulse),
            Severity::Info => schedule_dismiss(Arc::downgrade(&self.shared), alert.id),
        }
    }
}

/// Pushes the expiry of an informational alert to watchers. Reads expire
/// lazily, so without a runtime nothing is lost.
fn schedule_dismiss(shared: Weak<Shared>, id: u64) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };

    runtime.spawn(async move {
        tokio::time::sleep(INFO_AUTO_DISMISS).await;
        if let Some(shared) = shared.upgrade() {
            shared.dismiss_if_current(id);
        }
    });
}

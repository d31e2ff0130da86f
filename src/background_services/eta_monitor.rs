//! Responsible for polling route ETAs for every monitored trip and
//! publishing the results to listeners.
use crate::{
    dal::eta_api::EtaApi,
    error::EtaError,
    geo::Coordinate,
    model::eta::{EtaKey, EtaSnapshot, EtaUpdate, ProximityResult, StopEta},
};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_PROVIDER: &str = "google";
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(30);
const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(1);
const MAX_UPDATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug, PartialEq)]
pub struct EtaOptions {
    pub interval: Duration,
    pub provider: String,
}

impl Default for EtaOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_UPDATE_INTERVAL,
            provider: DEFAULT_PROVIDER.to_string(),
        }
    }
}

/// Returned by [`EtaMonitor::start_monitoring`]. A restart for the same trip
/// invalidates the previous handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub trip_id: String,
    id: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct SubscriptionInfo {
    pub trip_id: String,
    pub interval_secs: u64,
    pub provider: String,
    pub created_at: DateTime<Utc>,
}

struct TripSubscription {
    id: u64,
    options: EtaOptions,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TripSubscription {
    fn cancel(self) {
        self.cancel.cancel();
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

#[derive(Default)]
struct MonitorState {
    subscriptions: HashMap<String, TripSubscription>,
    trip_channels: HashMap<String, broadcast::Sender<EtaUpdate>>,
    global: Option<broadcast::Sender<EtaUpdate>>,
}

/// Owns the per-trip polling subscriptions.
///
/// Publishing happens under the same lock that [`EtaMonitor::stop_monitoring`]
/// takes, so once a stop returns nothing more is published for that trip.
pub struct EtaMonitor {
    api: RwLock<Option<Arc<dyn EtaApi>>>,
    state: Mutex<MonitorState>,
    next_subscription_id: AtomicU64,
    next_revision: AtomicU64,
}

impl Default for EtaMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl EtaMonitor {
    /// An uninitialized monitor. Fetches fail with
    /// [`EtaError::NotInitialized`] until [`EtaMonitor::initialize`] is called.
    pub fn new() -> Self {
        Self {
            api: RwLock::new(None),
            state: Mutex::new(MonitorState::default()),
            next_subscription_id: AtomicU64::new(0),
            next_revision: AtomicU64::new(0),
        }
    }

    pub fn with_api(api: Arc<dyn EtaApi>) -> Self {
        let monitor = Self::new();
        monitor.initialize(api);
        monitor
    }

    pub fn initialize(&self, api: Arc<dyn EtaApi>) {
        *self.api.write().unwrap_or_else(PoisonError::into_inner) = Some(api);
        info!("ETA monitor initialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.api
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn api(&self) -> Result<Arc<dyn EtaApi>, EtaError> {
        self.api
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(EtaError::NotInitialized)
    }

    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Updates for every monitored trip. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<EtaUpdate> {
        self.lock_state()
            .global
            .get_or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Updates for one trip. The channel closes when monitoring for the trip
    /// is stopped.
    pub fn subscribe_trip(&self, trip_id: &str) -> broadcast::Receiver<EtaUpdate> {
        self.lock_state()
            .trip_channels
            .entry(trip_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Starts polling route ETAs for `trip_id`, replacing any running
    /// subscription for the same trip.
    ///
    /// One fetch happens before this returns so listeners get data right
    /// away. A failure of that first fetch is logged, not returned.
    #[tracing::instrument(
        err,
        skip(self, options),
        fields(interval = ?options.interval, provider = %options.provider)
    )]
    pub async fn start_monitoring(
        self: &Arc<Self>,
        trip_id: &str,
        mut options: EtaOptions,
    ) -> Result<SubscriptionHandle, EtaError> {
        let api = self.api()?;

        if options.interval < MIN_UPDATE_INTERVAL {
            warn!(
                "ETA update interval {:?} too short, using {:?}",
                options.interval, MIN_UPDATE_INTERVAL
            );
            options.interval = MIN_UPDATE_INTERVAL;
        }

        if options.interval > MAX_UPDATE_INTERVAL {
            warn!(
                "ETA update interval {:?} too long, using {:?}",
                options.interval, MAX_UPDATE_INTERVAL
            );
            options.interval = MAX_UPDATE_INTERVAL;
        }

        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();

        let prior = self.lock_state().subscriptions.insert(
            trip_id.to_string(),
            TripSubscription {
                id,
                options: options.clone(),
                created_at: Utc::now(),
                cancel: cancel.clone(),
                task: None,
            },
        );
        if let Some(prior) = prior {
            info!("Replacing ETA monitoring for trip {trip_id}");
            prior.cancel();
        }

        info!("Starting ETA monitoring for trip {trip_id}");

        let handle = SubscriptionHandle {
            trip_id: trip_id.to_string(),
            id,
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("ETA monitoring for trip {trip_id} stopped before the first update");
                return Ok(handle);
            }
            result = self.fetch_route(api.as_ref(), trip_id, &options.provider) => match result {
                Ok(etas) => {
                    self.publish_if_live(trip_id, id, etas);
                }
                Err(e) => error!("Failed to get initial ETAs for trip {trip_id}: {e:?}"),
            }
        }

        let task = tokio::spawn(poll_trip_etas(
            Arc::downgrade(self),
            api,
            trip_id.to_string(),
            id,
            options,
            cancel,
        ));

        let mut state = self.lock_state();
        match state.subscriptions.get_mut(trip_id) {
            Some(subscription) if subscription.id == id => subscription.task = Some(task),
            _ => task.abort(),
        }

        Ok(handle)
    }

    /// Stops polling for `trip_id` and closes its per-trip channel.
    /// Returns whether a subscription was running.
    pub fn stop_monitoring(&self, trip_id: &str) -> bool {
        let removed = {
            let mut state = self.lock_state();
            state.trip_channels.remove(trip_id);
            state.subscriptions.remove(trip_id)
        };

        match removed {
            Some(subscription) => {
                subscription.cancel();
                info!("Stopped ETA monitoring for trip {trip_id}");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let removed = {
            let mut state = self.lock_state();
            state.trip_channels.clear();
            state.subscriptions.drain().collect_vec()
        };

        let count = removed.len();
        for (_, subscription) in removed {
            subscription.cancel();
        }

        info!("Stopped all ETA monitoring ({count} trips)");
    }

    /// Stops every subscription, closes every listener channel and drops the
    /// remote capability.
    pub fn teardown(&self) {
        self.stop_all();
        self.lock_state().global = None;
        *self.api.write().unwrap_or_else(PoisonError::into_inner) = None;
        info!("ETA monitor torn down");
    }

    pub fn is_monitoring(&self, trip_id: &str) -> bool {
        self.lock_state().subscriptions.contains_key(trip_id)
    }

    pub fn is_live(&self, handle: &SubscriptionHandle) -> bool {
        self.lock_state()
            .subscriptions
            .get(&handle.trip_id)
            .is_some_and(|s| s.id == handle.id)
    }

    pub fn subscription_count(&self) -> usize {
        self.lock_state().subscriptions.len()
    }

    pub fn active_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.lock_state()
            .subscriptions
            .iter()
            .map(|(trip_id, s)| SubscriptionInfo {
                trip_id: trip_id.clone(),
                interval_secs: s.options.interval.as_secs(),
                provider: s.options.provider.clone(),
                created_at: s.created_at,
            })
            .sorted_by(|a, b| a.trip_id.cmp(&b.trip_id))
            .collect_vec()
    }

    /// Publishes only if subscription `id` is still the live one for the trip.
    fn publish_if_live(&self, trip_id: &str, id: u64, etas: Arc<EtaSnapshot>) -> bool {
        let state = self.lock_state();

        if !state
            .subscriptions
            .get(trip_id)
            .is_some_and(|s| s.id == id)
        {
            debug!("Discarding ETAs for trip {trip_id} from a stopped subscription");
            return false;
        }

        let stops = etas.entries.len();
        let update = EtaUpdate {
            trip_id: trip_id.to_string(),
            etas,
            timestamp: Utc::now(),
        };

        // No listeners is not an error
        if let Some(global) = &state.global {
            _ = global.send(update.clone());
        }
        if let Some(trip_channel) = state.trip_channels.get(trip_id) {
            _ = trip_channel.send(update);
        }

        info!(trip_id, stops, "ETA update emitted");

        true
    }

    fn snapshot(
        &self,
        key: EtaKey,
        entries: Vec<StopEta>,
        calculated_at: Option<DateTime<Utc>>,
    ) -> Arc<EtaSnapshot> {
        let received_at = Utc::now();

        Arc::new(EtaSnapshot {
            key,
            entries,
            calculated_at: calculated_at.unwrap_or(received_at),
            received_at,
            revision: self.next_revision.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn fetch_route(
        &self,
        api: &dyn EtaApi,
        trip_id: &str,
        provider: &str,
    ) -> Result<Arc<EtaSnapshot>, EtaError> {
        let (etas, calculated_at) = api
            .route_etas(trip_id, provider)
            .await
            .map_err(EtaError::remote("route ETAs"))?
            .into_parts();

        Ok(self.snapshot(
            EtaKey::route(trip_id),
            etas.into_iter().map(StopEta::from).collect_vec(),
            calculated_at,
        ))
    }

    /// Single fetch of every stop ETA on a trip, independent of monitoring.
    /// Errors are returned as-is, retrying is up to the caller.
    #[tracing::instrument(err, skip(self, options))]
    pub async fn fetch_route_etas(
        &self,
        trip_id: &str,
        options: &EtaOptions,
    ) -> Result<Arc<EtaSnapshot>, EtaError> {
        let api = self.api()?;
        self.fetch_route(api.as_ref(), trip_id, &options.provider)
            .await
    }

    #[tracing::instrument(err, skip(self, options))]
    pub async fn fetch_stop_eta(
        &self,
        route_id: &str,
        stop_id: &str,
        options: &EtaOptions,
    ) -> Result<Arc<EtaSnapshot>, EtaError> {
        let api = self.api()?;
        let key = EtaKey::stop(route_id, stop_id);

        let eta = api
            .stop_eta(route_id, stop_id, &options.provider)
            .await
            .map_err(EtaError::remote("stop ETA"))?
            .ok_or_else(|| EtaError::NoData(key.to_string()))?;

        Ok(self.snapshot(key, vec![StopEta::from(eta)], None))
    }

    #[tracing::instrument(err, skip(self, options))]
    pub async fn calculate_bus_eta(
        &self,
        bus_id: &str,
        destination: Coordinate,
        options: &EtaOptions,
    ) -> Result<Arc<EtaSnapshot>, EtaError> {
        let api = self.api()?;

        let eta = api
            .calculate_eta(bus_id, destination, &options.provider)
            .await
            .map_err(EtaError::remote("calculate ETA"))?;
        let calculated_at = eta.calculated_at;

        Ok(self.snapshot(
            EtaKey::bus(bus_id, destination),
            vec![StopEta::from(eta)],
            calculated_at,
        ))
    }

    #[tracing::instrument(err, skip(self))]
    pub async fn fetch_proximity(
        &self,
        bus_id: &str,
        stop: Coordinate,
        threshold_km: f64,
    ) -> Result<ProximityResult, EtaError> {
        let api = self.api()?;

        let proximity = api
            .check_proximity(bus_id, stop, threshold_km)
            .await
            .map_err(EtaError::remote("check proximity"))?;

        Ok(ProximityResult {
            near: proximity.near,
            distance_km: proximity.distance_km,
        })
    }

    /// Server-side cached ETA. Remote failures are logged and read as "no
    /// cached value".
    pub async fn cached_bus_eta(
        &self,
        bus_id: &str,
        destination: Coordinate,
    ) -> Result<Option<Arc<EtaSnapshot>>, EtaError> {
        let api = self.api()?;

        match api.cached_eta(bus_id, destination).await {
            Ok(Some(eta)) => {
                let calculated_at = eta.calculated_at;
                Ok(Some(self.snapshot(
                    EtaKey::bus(bus_id, destination),
                    vec![StopEta::from(eta)],
                    calculated_at,
                )))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!("Failed to get cached ETA for bus {bus_id}: {e:?}");
                Ok(None)
            }
        }
    }
}

impl Drop for EtaMonitor {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, subscription) in state.subscriptions.drain() {
            subscription.cancel();
        }
    }
}

/// Fixed-interval poll loop for one trip. A tick never starts while the
/// previous fetch is still running; missed ticks are skipped.
async fn poll_trip_etas(
    monitor: Weak<EtaMonitor>,
    api: Arc<dyn EtaApi>,
    trip_id: String,
    id: u64,
    options: EtaOptions,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + options.interval, options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(strong) = monitor.upgrade() else {
            break;
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = strong.fetch_route(api.as_ref(), &trip_id, &options.provider) => result,
        };

        match result {
            Ok(etas) => {
                strong.publish_if_live(&trip_id, id, etas);
            }
            // keep the previous snapshot, the next tick tries again
            Err(e) => error!("Failed to update ETAs for trip {trip_id}: {e:?}"),
        }
    }

    debug!("ETA polling for trip {trip_id} finished");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::fleet_api_model::{ApiBusEta, ApiProximity, ApiStopEta, RouteEtaPayload};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicBool, AtomicUsize},
    };
    use tokio::{sync::broadcast::error::TryRecvError, time::sleep};

    /// Answers route ETA requests with the call number as the ETA of stop `s1`.
    #[derive(Default)]
    pub(crate) struct FakeEtaApi {
        pub calls: AtomicUsize,
        pub fail: AtomicBool,
        pub delays: Mutex<VecDeque<Duration>>,
    }

    impl FakeEtaApi {
        pub(crate) fn with_delays(delays: &[Duration]) -> Self {
            Self {
                delays: Mutex::new(delays.iter().copied().collect()),
                ..Default::default()
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn respond(&self) -> anyhow::Result<usize> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = self.delays.lock().unwrap().pop_front();
            if let Some(delay) = delay {
                sleep(delay).await;
            }

            if self.fail.load(Ordering::SeqCst) {
                return Err(anyhow!("connection refused"));
            }

            Ok(call)
        }
    }

    #[async_trait]
    impl EtaApi for FakeEtaApi {
        async fn route_etas(
            &self,
            _trip_id: &str,
            _provider: &str,
        ) -> anyhow::Result<RouteEtaPayload> {
            let call = self.respond().await?;
            Ok(RouteEtaPayload::Bare(vec![ApiStopEta {
                stop_id: Some("s1".to_string()),
                stop_name: Some("Maple & 3rd".to_string()),
                sequence: Some(1),
                eta_minutes: Some(call as f64),
                distance_km: Some(1.5),
            }]))
        }

        async fn stop_eta(
            &self,
            _route_id: &str,
            stop_id: &str,
            _provider: &str,
        ) -> anyhow::Result<Option<ApiStopEta>> {
            let call = self.respond().await?;
            if stop_id == "unknown" {
                return Ok(None);
            }

            Ok(Some(ApiStopEta {
                stop_id: Some(stop_id.to_string()),
                stop_name: None,
                sequence: None,
                eta_minutes: Some(call as f64),
                distance_km: None,
            }))
        }

        async fn calculate_eta(
            &self,
            _bus_id: &str,
            _destination: Coordinate,
            _provider: &str,
        ) -> anyhow::Result<ApiBusEta> {
            let call = self.respond().await?;
            Ok(ApiBusEta {
                eta_minutes: Some(call as f64),
                distance_km: Some(0.8),
                calculated_at: None,
            })
        }

        async fn check_proximity(
            &self,
            _bus_id: &str,
            _stop: Coordinate,
            threshold_km: f64,
        ) -> anyhow::Result<ApiProximity> {
            self.respond().await?;
            Ok(ApiProximity {
                near: threshold_km >= 0.5,
                distance_km: Some(0.4),
            })
        }

        async fn cached_eta(
            &self,
            _bus_id: &str,
            _destination: Coordinate,
        ) -> anyhow::Result<Option<ApiBusEta>> {
            self.respond().await?;
            Ok(None)
        }
    }

    fn monitor(api: &Arc<FakeEtaApi>) -> Arc<EtaMonitor> {
        Arc::new(EtaMonitor::with_api(api.clone()))
    }

    fn first_eta(update: &EtaUpdate) -> Option<f64> {
        update.etas.entries.first().and_then(|e| e.eta_minutes)
    }

    #[tokio::test(start_paused = true)]
    async fn test_requires_api() {
        let monitor = Arc::new(EtaMonitor::new());

        let result = monitor.start_monitoring("t1", EtaOptions::default()).await;
        assert!(matches!(result, Err(EtaError::NotInitialized)));

        let result = monitor.fetch_route_etas("t1", &EtaOptions::default()).await;
        assert!(matches!(result, Err(EtaError::NotInitialized)));
        assert_eq!(monitor.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_fetch_is_published_before_start_returns() -> Result<(), anyhow::Error> {
        let api = Arc::new(FakeEtaApi::default());
        let monitor = monitor(&api);
        let mut global = monitor.subscribe();
        let mut trip = monitor.subscribe_trip("t1");

        let handle = monitor.start_monitoring("t1", EtaOptions::default()).await?;
        assert!(monitor.is_live(&handle));

        let update = global.try_recv()?;
        assert_eq!(update.trip_id, "t1");
        assert_eq!(first_eta(&update), Some(1.0));
        assert_eq!(first_eta(&trip.try_recv()?), Some(1.0));

        // next update only after a full interval
        sleep(Duration::from_secs(29)).await;
        assert!(matches!(global.try_recv(), Err(TryRecvError::Empty)));
        sleep(Duration::from_secs(2)).await;
        assert_eq!(first_eta(&global.try_recv()?), Some(2.0));

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_a_single_timer() -> Result<(), anyhow::Error> {
        let api = Arc::new(FakeEtaApi::default());
        let monitor = monitor(&api);

        let first = monitor.start_monitoring("t1", EtaOptions::default()).await?;
        let second = monitor.start_monitoring("t1", EtaOptions::default()).await?;
        assert_eq!(api.calls(), 2);
        assert_eq!(monitor.subscription_count(), 1);
        assert!(!monitor.is_live(&first));
        assert!(monitor.is_live(&second));

        sleep(Duration::from_secs(31)).await;
        assert_eq!(api.calls(), 3);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(api.calls(), 4);

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_trip_listeners() -> Result<(), anyhow::Error> {
        let api = Arc::new(FakeEtaApi::default());
        let monitor = monitor(&api);
        let mut trip = monitor.subscribe_trip("t1");

        monitor.start_monitoring("t1", EtaOptions::default()).await?;
        monitor.start_monitoring("t1", EtaOptions::default()).await?;

        assert_eq!(first_eta(&trip.try_recv()?), Some(1.0));
        assert_eq!(first_eta(&trip.try_recv()?), Some(2.0));
        assert!(matches!(trip.try_recv(), Err(TryRecvError::Empty)));

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_fetch() -> Result<(), anyhow::Error> {
        // first fetch is instant, the first scheduled one takes 10s
        let api = Arc::new(FakeEtaApi::with_delays(&[
            Duration::ZERO,
            Duration::from_secs(10),
        ]));
        let monitor = monitor(&api);
        let mut global = monitor.subscribe();
        let mut trip = monitor.subscribe_trip("t1");

        monitor.start_monitoring("t1", EtaOptions::default()).await?;
        global.try_recv()?;
        trip.try_recv()?;

        // tick at 30s starts a fetch that would finish at 40s
        sleep(Duration::from_secs(35)).await;
        assert_eq!(api.calls(), 2);
        assert!(monitor.stop_monitoring("t1"));

        sleep(Duration::from_secs(60)).await;
        assert!(matches!(global.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(trip.try_recv(), Err(TryRecvError::Closed)));
        assert_eq!(api.calls(), 2);
        assert!(!monitor.is_monitoring("t1"));

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_initial_fetch_publishes_nothing() -> Result<(), anyhow::Error> {
        let api = Arc::new(FakeEtaApi::with_delays(&[Duration::from_secs(10)]));
        let monitor = monitor(&api);
        let mut global = monitor.subscribe();
        let mut trip = monitor.subscribe_trip("t1");

        let starting = {
            let monitor = monitor.clone();
            tokio::spawn(async move {
                monitor
                    .start_monitoring("t1", EtaOptions::default())
                    .await
            })
        };

        sleep(Duration::from_secs(5)).await;
        assert_eq!(api.calls(), 1);
        assert!(monitor.stop_monitoring("t1"));

        let handle = starting.await??;
        assert!(!monitor.is_live(&handle));
        assert!(!monitor.is_monitoring("t1"));
        assert_eq!(monitor.subscription_count(), 0);

        sleep(Duration::from_secs(90)).await;
        assert!(matches!(global.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(trip.try_recv(), Err(TryRecvError::Closed)));
        assert_eq!(api.calls(), 1);

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_interval_is_capped() -> Result<(), anyhow::Error> {
        let api = Arc::new(FakeEtaApi::default());
        let monitor = monitor(&api);
        let options = EtaOptions {
            interval: Duration::from_secs(u64::MAX),
            ..Default::default()
        };

        monitor.start_monitoring("t1", options).await?;
        assert_eq!(monitor.active_subscriptions()[0].interval_secs, 24 * 60 * 60);

        sleep(Duration::from_secs(24 * 60 * 60 + 1)).await;
        assert_eq!(api.calls(), 2);
        assert!(monitor.is_monitoring("t1"));

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_is_swallowed() -> Result<(), anyhow::Error> {
        let api = Arc::new(FakeEtaApi::default());
        let monitor = monitor(&api);
        let mut global = monitor.subscribe();

        monitor.start_monitoring("t1", EtaOptions::default()).await?;
        global.try_recv()?;

        api.fail.store(true, Ordering::SeqCst);
        sleep(Duration::from_secs(31)).await;
        assert_eq!(api.calls(), 2);
        assert!(matches!(global.try_recv(), Err(TryRecvError::Empty)));
        assert!(monitor.is_monitoring("t1"));

        api.fail.store(false, Ordering::SeqCst);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(first_eta(&global.try_recv()?), Some(3.0));

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_initial_fetch_still_monitors() -> Result<(), anyhow::Error> {
        let api = Arc::new(FakeEtaApi::default());
        api.fail.store(true, Ordering::SeqCst);
        let monitor = monitor(&api);

        monitor.start_monitoring("t1", EtaOptions::default()).await?;
        assert!(monitor.is_monitoring("t1"));

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() -> Result<(), anyhow::Error> {
        let api = Arc::new(FakeEtaApi::default());
        let monitor = monitor(&api);

        assert!(!monitor.stop_monitoring("never-started"));

        monitor.start_monitoring("t1", EtaOptions::default()).await?;
        assert!(monitor.stop_monitoring("t1"));
        assert!(!monitor.stop_monitoring("t1"));

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_trip_channels_are_separate() -> Result<(), anyhow::Error> {
        let api = Arc::new(FakeEtaApi::default());
        let monitor = monitor(&api);
        let mut t1 = monitor.subscribe_trip("t1");
        let mut t2 = monitor.subscribe_trip("t2");

        monitor.start_monitoring("t1", EtaOptions::default()).await?;

        assert_eq!(t1.try_recv()?.trip_id, "t1");
        assert!(matches!(t2.try_recv(), Err(TryRecvError::Empty)));

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all() -> Result<(), anyhow::Error> {
        let api = Arc::new(FakeEtaApi::default());
        let monitor = monitor(&api);

        monitor.start_monitoring("t1", EtaOptions::default()).await?;
        monitor.start_monitoring("t2", EtaOptions::default()).await?;
        assert_eq!(monitor.active_subscriptions().len(), 2);

        monitor.stop_all();
        assert_eq!(monitor.subscription_count(), 0);

        sleep(Duration::from_secs(90)).await;
        assert_eq!(api.calls(), 2);

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_closes_listeners() -> Result<(), anyhow::Error> {
        let api = Arc::new(FakeEtaApi::default());
        let monitor = monitor(&api);
        let mut global = monitor.subscribe();

        monitor.start_monitoring("t1", EtaOptions::default()).await?;
        global.try_recv()?;

        monitor.teardown();
        assert!(matches!(global.try_recv(), Err(TryRecvError::Closed)));
        assert!(!monitor.is_initialized());
        assert!(matches!(
            monitor.start_monitoring("t1", EtaOptions::default()).await,
            Err(EtaError::NotInitialized)
        ));

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_monitor_stops_polling() -> Result<(), anyhow::Error> {
        let api = Arc::new(FakeEtaApi::default());
        let monitor = monitor(&api);

        monitor.start_monitoring("t1", EtaOptions::default()).await?;
        drop(monitor);

        sleep(Duration::from_secs(90)).await;
        assert_eq!(api.calls(), 1);

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_demand_fetches() -> Result<(), anyhow::Error> {
        let api = Arc::new(FakeEtaApi::default());
        let monitor = monitor(&api);
        let options = EtaOptions::default();

        let route = monitor.fetch_route_etas("t1", &options).await?;
        assert_eq!(route.key, EtaKey::route("t1"));

        let stop = monitor.fetch_stop_eta("r1", "s1", &options).await?;
        assert_eq!(stop.key, EtaKey::stop("r1", "s1"));
        assert!(stop.revision > route.revision);

        let missing = monitor.fetch_stop_eta("r1", "unknown", &options).await;
        assert!(matches!(missing, Err(EtaError::NoData(key)) if key == "stop:r1:unknown"));

        let destination = Coordinate::new(40.0, -75.0);
        let bus = monitor.calculate_bus_eta("b1", destination, &options).await?;
        assert_eq!(bus.key, EtaKey::bus("b1", destination));
        assert_eq!(bus.entries[0].distance_km, Some(0.8));

        let proximity = monitor.fetch_proximity("b1", destination, 0.5).await?;
        assert!(proximity.near);

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_demand_errors_propagate() {
        let api = Arc::new(FakeEtaApi::default());
        api.fail.store(true, Ordering::SeqCst);
        let monitor = monitor(&api);

        let result = monitor.fetch_route_etas("t1", &EtaOptions::default()).await;
        assert!(matches!(result, Err(EtaError::RemoteFetch { .. })));

        let result = monitor
            .fetch_proximity("b1", Coordinate::new(40.0, -75.0), 0.5)
            .await;
        assert!(matches!(result, Err(EtaError::RemoteFetch { .. })));
        // no retries
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_eta_failure_is_not_fatal() -> Result<(), anyhow::Error> {
        let api = Arc::new(FakeEtaApi::default());
        api.fail.store(true, Ordering::SeqCst);
        let monitor = monitor(&api);

        let cached = monitor
            .cached_bus_eta("b1", Coordinate::new(40.0, -75.0))
            .await?;
        assert!(cached.is_none());

        Ok(())
    }
}

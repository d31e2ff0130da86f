//! Keeps the latest ETA snapshot per key, fed by the monitor and by
//! on-demand fetches.
use crate::{
    background_services::eta_monitor::{EtaMonitor, EtaOptions},
    error::EtaError,
    geo::Coordinate,
    model::eta::{EtaKey, EtaSnapshot, EtaUpdate},
};
use chrono::Utc;
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};
use tokio::{
    sync::broadcast::{Receiver, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// How a key looks to a reader right now.
#[derive(Clone, Debug)]
pub enum EtaState {
    /// Nothing fetched yet and no error recorded
    Loading,
    Failed { error: String },
    Fresh(Arc<EtaSnapshot>),
    Stale(Arc<EtaSnapshot>),
}

#[derive(Default)]
struct CacheState {
    snapshots: HashMap<EtaKey, Arc<EtaSnapshot>>,
    errors: HashMap<EtaKey, String>,
}

#[derive(Default)]
struct SnapshotCache {
    state: RwLock<CacheState>,
}

impl SnapshotCache {
    /// Replaces the key's snapshot only if `snapshot` completed later than
    /// the one already stored.
    fn apply(&self, snapshot: Arc<EtaSnapshot>) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(current) = state.snapshots.get(&snapshot.key) {
            if current.revision >= snapshot.revision {
                debug!(
                    "Ignoring ETAs for {} with revision {} older than {}",
                    snapshot.key, snapshot.revision, current.revision
                );
                return false;
            }
        }

        state.errors.remove(&snapshot.key);
        state.snapshots.insert(snapshot.key.clone(), snapshot);

        true
    }

    fn record_error(&self, key: EtaKey, error: &EtaError) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .errors
            .insert(key, error.to_string());
    }
}

pub struct EtaStore {
    monitor: Arc<EtaMonitor>,
    cache: Arc<SnapshotCache>,
    listener: JoinHandle<()>,
}

impl EtaStore {
    /// Subscribes to every update `monitor` publishes. Must be called inside a
    /// tokio runtime.
    pub fn new(monitor: Arc<EtaMonitor>) -> Self {
        let cache = Arc::new(SnapshotCache::default());
        let listener = tokio::spawn(apply_updates(monitor.subscribe(), cache.clone()));

        Self {
            monitor,
            cache,
            listener,
        }
    }

    pub fn monitor(&self) -> &Arc<EtaMonitor> {
        &self.monitor
    }

    pub fn get(&self, key: &EtaKey) -> Option<Arc<EtaSnapshot>> {
        self.cache
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshots
            .get(key)
            .cloned()
    }

    pub fn route(&self, trip_id: &str) -> Option<Arc<EtaSnapshot>> {
        self.get(&EtaKey::route(trip_id))
    }

    pub fn stop(&self, route_id: &str, stop_id: &str) -> Option<Arc<EtaSnapshot>> {
        self.get(&EtaKey::stop(route_id, stop_id))
    }

    pub fn last_error(&self, key: &EtaKey) -> Option<String> {
        self.cache
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .errors
            .get(key)
            .cloned()
    }

    /// A failed refresh leaves an older snapshot readable, it only shows up
    /// as [`EtaState::Failed`] while nothing was ever fetched.
    pub fn state(&self, key: &EtaKey, stale_after: Duration) -> EtaState {
        let state = self.cache.state.read().unwrap_or_else(PoisonError::into_inner);

        match (state.snapshots.get(key), state.errors.get(key)) {
            (Some(snapshot), _) => {
                let stale = snapshot
                    .age(Utc::now())
                    .to_std()
                    .is_ok_and(|age| age > stale_after);

                if stale {
                    EtaState::Stale(snapshot.clone())
                } else {
                    EtaState::Fresh(snapshot.clone())
                }
            }
            (None, Some(error)) => EtaState::Failed {
                error: error.clone(),
            },
            (None, None) => EtaState::Loading,
        }
    }

    pub fn len(&self) -> usize {
        self.cache
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshots
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn settle(
        &self,
        key: EtaKey,
        result: Result<Arc<EtaSnapshot>, EtaError>,
    ) -> Result<Arc<EtaSnapshot>, EtaError> {
        match result {
            Ok(snapshot) => {
                self.cache.apply(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                self.cache.record_error(key, &e);
                Err(e)
            }
        }
    }

    pub async fn refresh_route(
        &self,
        trip_id: &str,
        options: &EtaOptions,
    ) -> Result<Arc<EtaSnapshot>, EtaError> {
        let result = self.monitor.fetch_route_etas(trip_id, options).await;
        self.settle(EtaKey::route(trip_id), result)
    }

    pub async fn refresh_stop(
        &self,
        route_id: &str,
        stop_id: &str,
        options: &EtaOptions,
    ) -> Result<Arc<EtaSnapshot>, EtaError> {
        let result = self.monitor.fetch_stop_eta(route_id, stop_id, options).await;
        self.settle(EtaKey::stop(route_id, stop_id), result)
    }

    pub async fn calculate_bus_eta(
        &self,
        bus_id: &str,
        destination: Coordinate,
        options: &EtaOptions,
    ) -> Result<Arc<EtaSnapshot>, EtaError> {
        let result = self
            .monitor
            .calculate_bus_eta(bus_id, destination, options)
            .await;
        self.settle(EtaKey::bus(bus_id, destination), result)
    }
}

impl Drop for EtaStore {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn apply_updates(mut receiver: Receiver<EtaUpdate>, cache: Arc<SnapshotCache>) {
    loop {
        match receiver.recv().await {
            Ok(update) => {
                cache.apply(update.etas);
            }
            // later updates are fresher anyway
            Err(RecvError::Lagged(skipped)) => {
                warn!("ETA store fell behind, skipped {skipped} updates")
            }
            Err(RecvError::Closed) => break,
        }
    }

    info!("Channel closed");
}

pub mod eta_monitor;
pub mod eta_store;
pub mod geofence_alerts;
pub mod position_consumer;
pub mod zone_fetcher;

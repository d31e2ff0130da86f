pub mod client;
pub mod eta_api;
pub mod fleet_data;

pub use client::FleetApiClient;
pub use eta_api::EtaApi;
pub use fleet_data::FleetDataApi;

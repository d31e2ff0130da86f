pub mod alert;
pub mod eta;
pub mod fleet_api_model;
pub mod position;
pub mod zone;

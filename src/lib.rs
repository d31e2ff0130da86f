pub mod background_services;
pub mod config;
pub mod dal;
pub mod error;
pub mod format;
pub mod geo;
pub mod model;
pub mod web;

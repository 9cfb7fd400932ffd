pub mod auth;
pub mod config;
pub mod error;
pub mod odometer_scan;
pub mod ride_endpoint;
pub mod routes;
pub mod server_state;

pub mod collaborators;
pub mod cost;
pub mod error;
pub mod geo;
pub mod log_entry;
pub mod odometer;
pub mod position_fix;
pub mod ride_session;
pub mod tracker;
pub mod user;

pub use collaborators::*;
pub use cost::CostConfig;
pub use error::RideError;
pub use position_fix::PositionFix;
pub use ride_session::{GpsStatus, RideSession, RideSnapshot, RideStatus, RideSummary};
pub use tracker::{FinishOutcome, RideHandle, RideTracker};
pub use user::OwnerId;

use thiserror::Error;

use crate::collaborators::PersistenceError;

/// Failures surfaced to callers of the tracker. Transient positioning problems are never
/// reported here, they only show up in the snapshot's GPS status.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RideError {
    #[error("No authenticated identity, ride was not saved")]
    NotAuthenticated,

    #[error("Failed to save ride: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Ride tracker is no longer running")]
    TrackerStopped,

    #[error("Invalid cost configuration: {0}")]
    InvalidConfig(String),
}

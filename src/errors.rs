//! Error taxonomy for the collection pipeline.
//!
//! Validation errors never leave the reporter (the observation is dropped).
//! Capacity and retry exhaustion are logged and counted in `StorageStats`.
//! Transport and server errors come back from an upload cycle as a
//! non-fatal result so the scheduler can back off.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed BSSID '{0}'")]
    InvalidBssid(String),
    #[error("cell is missing {0}")]
    InvalidCell(&'static str),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("report of {needed} bytes does not fit in a {max} byte quota")]
    CapacityExceeded { needed: u64, max: u64 },
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("server rejected upload with HTTP {status}")]
    ServerRejected { status: u16 },
    #[error("storage failure during upload: {0}")]
    Storage(#[from] StorageError),
}

impl UploadError {
    /// Transport failures and 5xx responses are worth a shorter retry;
    /// everything else waits for the regular schedule.
    pub fn is_temporary(&self) -> bool {
        match self {
            UploadError::Transport(_) => true,
            UploadError::ServerRejected { status } => (500..=599).contains(status),
            UploadError::Storage(_) => false,
        }
    }
}

//! Relay storage errors.

use parley_core::RelayError;
use thiserror::Error;

/// Errors from a [`RelayStore`](super::RelayStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend I/O or transaction failure
    #[error("storage i/o failed: {0}")]
    Io(String),

    /// Stored bytes could not be encoded or decoded
    #[error("storage serialization failed: {0}")]
    Serialization(String),
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        Self::Unavailable { reason: err.to_string() }
    }
}

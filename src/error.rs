//! Error taxonomy shared by every library module.
//!
//! Fan-out partial failure is not an error variant: it is reported through
//! [`FederatedSearchResponse::failed_project_ids`](crate::federation::FederatedSearchResponse).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad or empty arguments. A caller bug; retrying will not help.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation needs the shared quantization params before any exist.
    #[error("quantization params have not been computed; index a project with recomputation or run a global recompute first")]
    MissingQuantParams,

    /// Persistence-engine failure. The operation was rolled back and is safe to retry.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Background task panicked or a lock was poisoned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

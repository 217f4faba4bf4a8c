//! Error types for store operations.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by a [`crate::MeshStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot serve the request (network partition, shut
    /// down, quorum loss). Callers treat this as cluster-fatal.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The cluster lock could not be acquired or released.
    #[error("cluster lock: {0}")]
    Lock(String),
}

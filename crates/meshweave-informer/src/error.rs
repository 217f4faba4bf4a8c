//! Error types for watch registration and teardown.

use thiserror::Error;

use meshweave_store::StoreError;

/// Result type alias for informer operations.
pub type InformerResult<T> = Result<T, InformerError>;

/// Errors returned by watch registration. Never fatal.
#[derive(Debug, Error)]
pub enum InformerError {
    /// A watch with the same syncer key is already registered.
    #[error("already watched")]
    AlreadyWatched,

    /// The informer has been closed.
    #[error("informer already been closed")]
    Closed,

    /// The watched entry does not exist.
    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

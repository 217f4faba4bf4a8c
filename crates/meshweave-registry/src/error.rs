//! Error types for registry operations.

use thiserror::Error;

use meshweave_spec::CodecError;
use meshweave_store::StoreError;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors surfaced by registry operations.
///
/// A `Store` error has already been routed through the configured
/// [`crate::FailurePolicy`] by the time a caller sees it.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Encode failure, or decode failure of a single requested
    /// record. Bug-class: well-typed inputs cannot produce it.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

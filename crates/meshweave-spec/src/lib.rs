//! meshweave-spec — domain entities, key layout, and canonical codec.
//!
//! Everything the control plane stores is described here: the entity
//! types themselves, the deterministic key layout that places them in
//! the replicated store, and the canonical JSON codec that makes two
//! encodings of the same value byte-identical.

pub mod codec;
pub mod error;
pub mod layout;
pub mod types;

pub use error::CodecError;
pub use types::*;

//! meshweave-registry — the typed repository over the replicated store.
//!
//! The registry is the business layer between the mesh entities and
//! the KV store: it serializes entities through the canonical codec,
//! places them by the key layout, and mediates the cluster-wide lock
//! for compound edits. It holds no cache and no mutable state; every
//! read is a store read.
//!
//! The registry is not internally synchronized. Callers bracket
//! multi-entry edits with [`Registry::lock`] / [`Registry::unlock`].

pub mod error;
pub mod failure;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use failure::{FailurePolicy, PanicOnFailure};
pub use registry::Registry;

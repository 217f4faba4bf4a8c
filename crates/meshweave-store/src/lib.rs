//! meshweave-store — the replicated KV store contract.
//!
//! The control plane treats the consensus engine as an external
//! collaborator behind the [`MeshStore`] trait: get, put, delete,
//! prefix scan, a cluster-wide lock, and a [`Syncer`] factory for
//! change subscriptions. [`MemoryStore`] is a fully ordered in-process
//! implementation used throughout the workspace's tests.

pub mod error;
pub mod memory;
pub mod record;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use record::KvRecord;
pub use store::{MeshStore, Syncer, SYNC_CHANNEL_CAPACITY};

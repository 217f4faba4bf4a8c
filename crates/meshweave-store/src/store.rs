//! Store and Syncer traits.
//!
//! `MeshStore` is the unified interface to the strongly consistent KV
//! service; implementations may be remote or embedded. `Syncer` is a
//! factory for live subscriptions: per-key streams of successive
//! values (with `None` as the deletion sentinel) and per-prefix
//! streams of successive full snapshots.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StoreResult;
use crate::record::KvRecord;

/// Capacity of every sync channel. Producers block when a consumer
/// lags this far behind, so back-pressure lands on the stream that is
/// slow rather than on a queue that grows without bound.
pub const SYNC_CHANNEL_CAPACITY: usize = 16;

/// Unified interface to the replicated, strongly consistent KV store.
///
/// All operations are linearizable. Implementations must be safe for
/// concurrent use; the cluster lock is the only mutual-exclusion
/// primitive offered and it is cluster-wide, not per-process.
#[async_trait]
pub trait MeshStore: Send + Sync {
    /// Read a single value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Read a single record with revision metadata.
    async fn get_raw(&self, key: &str) -> StoreResult<Option<KvRecord>>;

    /// Read all values under a prefix.
    async fn get_prefix(&self, prefix: &str) -> StoreResult<BTreeMap<String, String>>;

    /// Read all records under a prefix.
    async fn get_raw_prefix(&self, prefix: &str) -> StoreResult<BTreeMap<String, KvRecord>>;

    /// Write a value.
    async fn put(&self, key: &str, value: String) -> StoreResult<()>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Acquire the cluster-wide mutex. Blocks until it is granted.
    async fn lock(&self) -> StoreResult<()>;

    /// Release the cluster-wide mutex.
    async fn unlock(&self) -> StoreResult<()>;

    /// Create a new subscription factory.
    async fn syncer(&self) -> StoreResult<Box<dyn Syncer>>;
}

/// A live subscription factory against the store.
///
/// Each `sync_*` call opens one stream. `close` tears down every
/// stream opened through this syncer; the corresponding receivers
/// observe end-of-stream. `close` is idempotent.
#[async_trait]
pub trait Syncer: Send + Sync {
    /// Stream of successive records for one key. `None` marks a
    /// deletion. The current record, if any, is delivered first.
    async fn sync_raw(&mut self, key: &str) -> StoreResult<mpsc::Receiver<Option<KvRecord>>>;

    /// Stream of successive full value snapshots under a prefix. The
    /// current snapshot (possibly empty) is delivered first.
    async fn sync_prefix(&mut self, prefix: &str)
        -> StoreResult<mpsc::Receiver<BTreeMap<String, String>>>;

    /// Stream of successive full record snapshots under a prefix.
    async fn sync_raw_prefix(
        &mut self,
        prefix: &str,
    ) -> StoreResult<mpsc::Receiver<BTreeMap<String, KvRecord>>>;

    /// Tear down every stream opened through this syncer.
    fn close(&self);
}

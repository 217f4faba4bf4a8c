//! In-memory store backend.
//!
//! `MemoryStore` implements the full `MeshStore` contract in-process:
//! linearizable reads and writes over a `BTreeMap`, a store-wide
//! revision counter, a single cluster mutex, and live sync streams.
//!
//! Change notification is serialized through one dispatcher task.
//! Mutations never block on watcher channels; they bump the revision
//! and nudge the dispatcher, which computes snapshots at dispatch
//! time. Successive snapshots seen by any one watcher are therefore
//! monotone in revision order, and a watcher is only notified when
//! its view actually changed.
//!
//! Must be constructed inside a tokio runtime (the dispatcher task is
//! spawned at construction).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::record::KvRecord;
use crate::store::{MeshStore, Syncer, SYNC_CHANNEL_CAPACITY};

/// In-memory `MeshStore` used by tests across the workspace.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    data: Mutex<MemData>,
    control_tx: mpsc::UnboundedSender<Control>,
    change_tx: mpsc::UnboundedSender<()>,
    lock_sem: Arc<Semaphore>,
    lock_held: Mutex<Option<OwnedSemaphorePermit>>,
    next_syncer_id: AtomicU64,
}

#[derive(Default)]
struct MemData {
    entries: BTreeMap<String, KvRecord>,
    revision: i64,
}

enum Control {
    Register(WatcherSlot),
    CloseSyncer(u64),
}

struct WatcherSlot {
    syncer_id: u64,
    /// Key for raw watchers, prefix for snapshot watchers.
    target: String,
    sink: Sink,
    dead: bool,
}

enum Sink {
    /// Last field is the value most recently sent (`None` = key
    /// absent or nothing sent yet; an absent key produces no initial
    /// event, so the two cases coincide).
    Raw {
        tx: mpsc::Sender<Option<KvRecord>>,
        last: Option<String>,
    },
    /// `None` until the initial snapshot has been delivered.
    Snapshot {
        tx: mpsc::Sender<BTreeMap<String, String>>,
        last: Option<BTreeMap<String, String>>,
    },
    RawSnapshot {
        tx: mpsc::Sender<BTreeMap<String, KvRecord>>,
        last: Option<BTreeMap<String, KvRecord>>,
    },
}

impl MemoryStore {
    /// Create an empty store and spawn its dispatcher task.
    pub fn new() -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(StoreInner {
            data: Mutex::new(MemData::default()),
            control_tx,
            change_tx,
            lock_sem: Arc::new(Semaphore::new(1)),
            lock_held: Mutex::new(None),
            next_syncer_id: AtomicU64::new(0),
        });
        tokio::spawn(run_dispatcher(Arc::downgrade(&inner), control_rx, change_rx));
        Self { inner }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MeshStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.get_raw(key).await?.map(|r| r.value))
    }

    async fn get_raw(&self, key: &str) -> StoreResult<Option<KvRecord>> {
        let data = self.inner.data.lock().expect("state mutex poisoned");
        Ok(data.entries.get(key).cloned())
    }

    async fn get_prefix(&self, prefix: &str) -> StoreResult<BTreeMap<String, String>> {
        Ok(self
            .get_raw_prefix(prefix)
            .await?
            .into_iter()
            .map(|(k, r)| (k, r.value))
            .collect())
    }

    async fn get_raw_prefix(&self, prefix: &str) -> StoreResult<BTreeMap<String, KvRecord>> {
        let data = self.inner.data.lock().expect("state mutex poisoned");
        Ok(data
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect())
    }

    async fn put(&self, key: &str, value: String) -> StoreResult<()> {
        {
            let mut data = self.inner.data.lock().expect("state mutex poisoned");
            data.revision += 1;
            let revision = data.revision;
            let record = match data.entries.get(key) {
                Some(existing) => KvRecord {
                    key: key.to_string(),
                    value,
                    create_revision: existing.create_revision,
                    mod_revision: revision,
                    version: existing.version + 1,
                },
                None => KvRecord {
                    key: key.to_string(),
                    value,
                    create_revision: revision,
                    mod_revision: revision,
                    version: 1,
                },
            };
            data.entries.insert(key.to_string(), record);
        }
        let _ = self.inner.change_tx.send(());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let removed = {
            let mut data = self.inner.data.lock().expect("state mutex poisoned");
            let removed = data.entries.remove(key).is_some();
            if removed {
                data.revision += 1;
            }
            removed
        };
        if removed {
            let _ = self.inner.change_tx.send(());
        }
        Ok(())
    }

    async fn lock(&self) -> StoreResult<()> {
        let permit = Arc::clone(&self.inner.lock_sem)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Lock("lock semaphore closed".to_string()))?;
        *self.inner.lock_held.lock().expect("lock mutex poisoned") = Some(permit);
        Ok(())
    }

    async fn unlock(&self) -> StoreResult<()> {
        match self.inner.lock_held.lock().expect("lock mutex poisoned").take() {
            Some(permit) => {
                drop(permit);
                Ok(())
            }
            None => Err(StoreError::Lock("cluster mutex not held".to_string())),
        }
    }

    async fn syncer(&self) -> StoreResult<Box<dyn Syncer>> {
        let syncer_id = self.inner.next_syncer_id.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemorySyncer {
            syncer_id,
            control_tx: self.inner.control_tx.clone(),
        }))
    }
}

/// One subscription factory against a `MemoryStore`. Registrations
/// are handed to the dispatcher; `close` withdraws them all.
struct MemorySyncer {
    syncer_id: u64,
    control_tx: mpsc::UnboundedSender<Control>,
}

impl MemorySyncer {
    fn register(&self, target: String, sink: Sink) -> StoreResult<()> {
        self.control_tx
            .send(Control::Register(WatcherSlot {
                syncer_id: self.syncer_id,
                target,
                sink,
                dead: false,
            }))
            .map_err(|_| StoreError::Unavailable("store dispatcher stopped".to_string()))
    }
}

#[async_trait]
impl Syncer for MemorySyncer {
    async fn sync_raw(&mut self, key: &str) -> StoreResult<mpsc::Receiver<Option<KvRecord>>> {
        let (tx, rx) = mpsc::channel(SYNC_CHANNEL_CAPACITY);
        self.register(key.to_string(), Sink::Raw { tx, last: None })?;
        Ok(rx)
    }

    async fn sync_prefix(
        &mut self,
        prefix: &str,
    ) -> StoreResult<mpsc::Receiver<BTreeMap<String, String>>> {
        let (tx, rx) = mpsc::channel(SYNC_CHANNEL_CAPACITY);
        self.register(prefix.to_string(), Sink::Snapshot { tx, last: None })?;
        Ok(rx)
    }

    async fn sync_raw_prefix(
        &mut self,
        prefix: &str,
    ) -> StoreResult<mpsc::Receiver<BTreeMap<String, KvRecord>>> {
        let (tx, rx) = mpsc::channel(SYNC_CHANNEL_CAPACITY);
        self.register(prefix.to_string(), Sink::RawSnapshot { tx, last: None })?;
        Ok(rx)
    }

    fn close(&self) {
        let _ = self.control_tx.send(Control::CloseSyncer(self.syncer_id));
    }
}

/// Dispatcher: the single owner of the watcher table. Exits when the
/// store and every syncer have been dropped.
async fn run_dispatcher(
    store: Weak<StoreInner>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    mut change_rx: mpsc::UnboundedReceiver<()>,
) {
    let mut watchers: Vec<WatcherSlot> = Vec::new();

    loop {
        tokio::select! {
            // Registrations and closes win over change fan-out so a
            // fresh watcher sees its initial snapshot promptly.
            biased;

            ctrl = control_rx.recv() => match ctrl {
                Some(Control::Register(mut slot)) => {
                    let Some(entries) = snapshot_of(&store) else { break };
                    notify(&mut slot, &entries).await;
                    if !slot.dead {
                        watchers.push(slot);
                    }
                }
                Some(Control::CloseSyncer(syncer_id)) => {
                    watchers.retain(|w| w.syncer_id != syncer_id);
                    debug!(syncer_id, "syncer closed");
                }
                None => break,
            },

            changed = change_rx.recv() => match changed {
                Some(()) => {
                    // Coalesce bursts; the snapshot below covers them all.
                    while change_rx.try_recv().is_ok() {}
                    let Some(entries) = snapshot_of(&store) else { break };
                    for slot in watchers.iter_mut() {
                        notify(slot, &entries).await;
                    }
                    watchers.retain(|w| !w.dead);
                }
                None => break,
            },
        }
    }
}

fn snapshot_of(store: &Weak<StoreInner>) -> Option<BTreeMap<String, KvRecord>> {
    let inner = store.upgrade()?;
    let entries = inner.data.lock().expect("state mutex poisoned").entries.clone();
    Some(entries)
}

/// Deliver the watcher's current view if it differs from the last
/// delivered one. Marks the slot dead when the receiver is gone.
async fn notify(slot: &mut WatcherSlot, entries: &BTreeMap<String, KvRecord>) {
    let target = slot.target.clone();
    match &mut slot.sink {
        Sink::Raw { tx, last } => {
            let current = entries.get(&target);
            let view = current.map(|r| r.value.clone());
            if *last == view {
                return;
            }
            let event = current.cloned();
            *last = view;
            if tx.send(event).await.is_err() {
                slot.dead = true;
            }
        }
        Sink::Snapshot { tx, last } => {
            let view: BTreeMap<String, String> = entries
                .iter()
                .filter(|(k, _)| k.starts_with(&target))
                .map(|(k, r)| (k.clone(), r.value.clone()))
                .collect();
            if last.as_ref() == Some(&view) {
                return;
            }
            *last = Some(view.clone());
            if tx.send(view).await.is_err() {
                slot.dead = true;
            }
        }
        Sink::RawSnapshot { tx, last } => {
            let view: BTreeMap<String, KvRecord> = entries
                .iter()
                .filter(|(k, _)| k.starts_with(&target))
                .map(|(k, r)| (k.clone(), r.clone()))
                .collect();
            if last.as_ref() == Some(&view) {
                return;
            }
            *last = Some(view.clone());
            if tx.send(view).await.is_err() {
                slot.dead = true;
            }
        }
    }
}

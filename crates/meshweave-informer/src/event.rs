//! Watch event model.

use meshweave_store::KvRecord;

/// Whether a watch keeps running after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchFlow {
    /// Keep delivering events to this watch.
    Continue,
    /// Stop the watch; its syncer is closed and the registration
    /// removed.
    Stop,
}

/// One delivery of a single-key watch.
#[derive(Debug, Clone)]
pub enum KeyChange<T> {
    /// The key holds a new value. `record` carries the store's
    /// revision metadata.
    Update { record: KvRecord, spec: T },
    /// The key was deleted.
    Delete,
}

/// Selector paths into a service payload.
///
/// A selector names the payload subtree a single-key watch is
/// interested in. It distinguishes watch registrations on the same
/// key; deliveries themselves are not filtered by it.
pub mod part {
    /// The whole payload.
    pub const ALL: &str = "";
    pub const OBSERVABILITY: &str = "observability";
    pub const RESILIENCE: &str = "resilience";
    pub const CANARY: &str = "canary";
    pub const LOAD_BALANCE: &str = "loadBalance";
    pub const CIRCUIT_BREAKER: &str = "resilience.circuitBreaker";
}

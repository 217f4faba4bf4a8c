//! Cluster failure policy.
//!
//! A store error during a registry operation means the source of
//! truth is gone; the controller cannot make safe decisions without
//! it. The policy decides what that means for the process. The
//! production policy panics so upstream supervision restarts the
//! controller; tests inject a recording policy and keep running.

use tracing::error;

use meshweave_store::StoreError;

/// Invoked on any store error the caller cannot meaningfully recover
/// from. Implementations typically terminate the process.
pub trait FailurePolicy: Send + Sync {
    fn cluster_failure(&self, op: &str, err: &StoreError);
}

/// Default policy: log and panic. Upstream supervision is expected
/// to restart the process against a healthy store.
#[derive(Debug, Default)]
pub struct PanicOnFailure;

impl FailurePolicy for PanicOnFailure {
    fn cluster_failure(&self, op: &str, err: &StoreError) {
        error!(%op, error = %err, "store unusable, raising cluster failure");
        panic!("cluster failure during {op}: {err}");
    }
}

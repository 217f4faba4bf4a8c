//! Raw store records.

/// A key-value record with the store's revision metadata.
///
/// Revisions are monotone across the whole store; `mod_revision`
/// orders writes and supports optimistic concurrency downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvRecord {
    pub key: String,
    pub value: String,
    /// Revision at which the key was created.
    pub create_revision: i64,
    /// Revision of the most recent write to the key.
    pub mod_revision: i64,
    /// Number of writes since creation.
    pub version: i64,
}

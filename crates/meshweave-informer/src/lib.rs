//! meshweave-informer — typed, tenant-scoped change dispatch.
//!
//! The informer converts store watch streams into typed callbacks:
//! single-key watches deliver successive values of one entity,
//! prefix watches deliver successive full snapshots of an entity
//! family. For tenant-scoped consumers it maintains two derived
//! indices, fed by internal watches of its own: the service→tenant
//! map and the global-service set. Together they form the scope
//! predicate applied to every prefix delivery.
//!
//! ```ignore
//! [services/]  ──▶ service→tenant ─┐
//! [tenants/]   ──▶ global set    ──┼──▶ scope predicate ──▶ filtered snapshots
//! [any watch]  ──▶ stream        ──┘
//! ```

pub mod error;
pub mod event;
pub mod informer;
mod scope;

pub use error::{InformerError, InformerResult};
pub use event::{part, KeyChange, WatchFlow};
pub use informer::Informer;

//! Versioned checkpoint store with indexed lookup, retention, search,
//! and rollback coordination for a shared project workspace.

/// Derived lookup structures over stored checkpoints.
pub mod index;
/// Rollback coordination and divergence reporting.
pub mod rollback;
/// Timeline, agent, category, and fuzzy description search.
pub mod search;
/// Free-form rewind command parsing.
pub mod semantic;
/// Workspace snapshot capture and restore.
pub mod snapshot;
/// The durable checkpoint store.
pub mod store;

pub use index::{CheckpointIndex, TimelineEntry};
pub use rollback::RollbackCoordinator;
pub use semantic::{parse_rewind_command, RewindTarget};
pub use snapshot::SnapshotArchive;
pub use store::{CheckpointRequest, CheckpointStore, StoreStats};

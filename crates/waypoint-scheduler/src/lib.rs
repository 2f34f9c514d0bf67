//! Dependency-aware task scheduling over an opaque executor.
//!
//! [`TaskScheduler`] runs batches of [`waypoint_core::AgentTask`]s under a
//! concurrent or pipeline strategy, bounded by a [`pool::WorkerPool`] and
//! ordered by a petgraph-backed [`graph::TaskGraph`]. When a
//! [`waypoint_store::CheckpointStore`] is attached, execution is bracketed
//! with best-effort checkpoints.

pub mod graph;
pub mod pool;
pub mod scheduler;

pub use graph::TaskGraph;
pub use pool::WorkerPool;
pub use scheduler::TaskScheduler;

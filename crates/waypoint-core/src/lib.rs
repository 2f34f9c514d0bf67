//! Core types and traits for the waypoint coordinator.
//!
//! This crate provides the shared data model (tasks, checkpoints,
//! execution results), error handling, configuration structs, and the
//! trait seams the store and scheduler plug into.

/// Checkpoint metadata and rollback result types.
pub mod checkpoint;
/// Configuration structs consumed by the store and scheduler.
pub mod config;
/// Error types and result definitions.
pub mod error;
/// Scheduler event types and observer seam.
pub mod events;
/// Task, strategy, and execution result types.
pub mod task;
/// Trait definitions for task executors and state probes.
pub mod traits;

pub use checkpoint::{
    CheckpointCategory, CheckpointId, CheckpointLevel, CheckpointMetadata,
    CheckpointRelationships, CheckpointSummary, ExternalState, FileManifest, GitState,
    RollbackResult, SessionState, TodoState,
};
pub use config::{
    CategoryKeywords, CheckpointConfig, CoordinatorConfig, ExecutionConfig, RetentionPolicy,
};
pub use error::{Error, Result};
pub use events::{EventChannel, EventSink, NullSink, SchedulerEvent};
pub use task::{
    AgentTask, ExecutionResult, ExecutionStrategy, StageSpec, TaskPriority, TaskStatus,
};
pub use traits::{NoopProbe, StateProbe, TaskExecutor};

use core::result::Result as CoreResult;
use std::io::Error as IoError;

use serde_json::Error as SerdeJsonError;
use thiserror::Error as ThisError;

/// Result type for waypoint operations.
pub type Result<T> = CoreResult<T, Error>;

/// Errors that can occur across the coordinator.
#[derive(Debug, ThisError)]
pub enum Error {
    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization or deserialization failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] SerdeJsonError),

    /// The requested checkpoint or task does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A metadata, blob, or index write/read failed, or the store is disabled.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The task dependency graph cannot be satisfied.
    #[error("Cyclic dependency detected in task graph")]
    CyclicDependency,

    /// A task or batch exceeded its allotted time.
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Task configuration is invalid (duplicate id, bad stage, etc.).
    #[error("Invalid task configuration: {0}")]
    InvalidTask(String),

    /// A safety validation check could not be performed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Task execution failed inside the opaque executor.
    #[error("Task execution failed: {0}")]
    ExecutionFailed(String),

    /// A general error not covered by other variants.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error indicates a missing entity rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

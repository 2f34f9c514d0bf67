use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::checkpoint::CheckpointId;

/// Task priority level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

/// Task lifecycle state.
///
/// `Pending → Queued → Running → {Completed | Failed | Cancelled}`;
/// `Pending`/`Queued` may also move to `Skipped` or `Cancelled`. No
/// terminal state is ever re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Not yet handed to a strategy.
    Pending,
    /// Submitted, waiting on dependencies or a worker slot.
    Queued,
    /// Executing inside the worker pool.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error (including timeout).
    Failed,
    /// Cancelled before it started running.
    Cancelled,
    /// A strategy decided not to run it (fail-fast abort, unmatched stage).
    Skipped,
}

impl TaskStatus {
    /// Whether this status ends the task's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Skipped
        )
    }

    /// Whether a cancellation request can still succeed. Running tasks are
    /// never preempted.
    pub fn can_cancel(self) -> bool {
        matches!(self, Self::Pending | Self::Queued)
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// One unit of work in a batch.
///
/// Immutable fields are supplied by the caller; the mutable tail
/// (`status` through `error`) is owned by the scheduler for the batch's
/// duration. Tasks are not persisted beyond the [`ExecutionResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    /// Unique within the batch.
    pub id: String,
    /// Which external executor to invoke.
    pub agent_type: String,
    /// What the task should do.
    pub description: String,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Task ids that must reach a terminal state before this one runs.
    pub dependencies: Vec<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Opaque key/value bag passed to the executor.
    pub context: HashMap<String, Value>,

    /// Current lifecycle state.
    #[serde(default)]
    pub status: TaskStatus,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When execution reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock execution time.
    pub duration_seconds: Option<f64>,
    /// Checkpoint created around this task, if any.
    pub checkpoint_id: Option<CheckpointId>,
    /// Opaque executor output, present on success.
    pub output: Option<Value>,
    /// Error message, present iff `status == Failed`.
    pub error: Option<String>,
}

impl AgentTask {
    /// Creates a pending task for the given executor type.
    pub fn new(id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            description: String::new(),
            priority: TaskPriority::default(),
            dependencies: Vec::new(),
            tags: Vec::new(),
            context: HashMap::new(),
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            checkpoint_id: None,
            output: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: HashMap<String, Value>) -> Self {
        self.context = context;
        self
    }
}

/// How a batch of tasks is executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionStrategy {
    /// Dependency-ordered fan-out bounded by the worker pool.
    Concurrent,
    /// Named stages executed strictly in declared order.
    Pipeline {
        /// Stage definitions, in execution order.
        stages: Vec<StageSpec>,
    },
}

/// One stage of a pipeline batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage name, used in checkpoints and logs.
    pub name: String,
    /// Agent types this stage accepts.
    pub agent_types: Vec<String>,
    /// Whether the stage's tasks run concurrently or strictly one-by-one.
    pub parallel: bool,
}

impl StageSpec {
    /// Creates a parallel stage accepting the given agent types.
    pub fn new(name: impl Into<String>, agent_types: Vec<String>) -> Self {
        Self {
            name: name.into(),
            agent_types,
            parallel: true,
        }
    }

    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}

/// Aggregate outcome of one batch/strategy invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Identifies the batch run.
    pub batch_id: Uuid,
    /// True when every task completed successfully.
    pub success: bool,
    /// Number of tasks submitted.
    pub total: usize,
    /// Tasks that completed successfully.
    pub completed: usize,
    /// Tasks that failed (including timeouts).
    pub failed: usize,
    /// Tasks cancelled before running.
    pub cancelled: usize,
    /// Tasks skipped by the strategy.
    pub skipped: usize,
    /// Batch start time.
    pub started_at: DateTime<Utc>,
    /// Batch end time.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock batch duration.
    pub duration_seconds: f64,
    /// Final snapshot of every task in the batch.
    pub tasks: Vec<AgentTask>,
    /// Checkpoints created during the run.
    pub checkpoints_created: Vec<CheckpointId>,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
    /// Batch-level errors.
    pub errors: Vec<String>,
}

impl ExecutionResult {
    /// Builds the aggregate result from finalized task snapshots.
    pub fn from_tasks(
        batch_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        tasks: Vec<AgentTask>,
    ) -> Self {
        let count = |status: TaskStatus| tasks.iter().filter(|task| task.status == status).count();
        let completed = count(TaskStatus::Completed);
        let failed = count(TaskStatus::Failed);
        let cancelled = count(TaskStatus::Cancelled);
        let skipped = count(TaskStatus::Skipped);
        let duration = finished_at
            .signed_duration_since(started_at)
            .num_milliseconds() as f64
            / 1000.0;

        Self {
            batch_id,
            success: completed == tasks.len(),
            total: tasks.len(),
            completed,
            failed,
            cancelled,
            skipped,
            started_at,
            finished_at,
            duration_seconds: duration,
            tasks,
            checkpoints_created: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }
}

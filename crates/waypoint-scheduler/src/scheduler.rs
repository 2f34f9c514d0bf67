use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use waypoint_core::{
    AgentTask, CheckpointId, CheckpointLevel, Error, EventSink, ExecutionConfig, ExecutionResult,
    ExecutionStrategy, NullSink, Result, SchedulerEvent, StageSpec, TaskExecutor, TaskStatus,
};
use waypoint_store::{CheckpointRequest, CheckpointStore};

use crate::graph::TaskGraph;
use crate::pool::WorkerPool;

/// Orchestrates one execution strategy over a task batch.
///
/// Resolves dependency order, fans tasks out to a bounded worker pool,
/// brackets execution with best-effort checkpoints, and aggregates the
/// outcome into an [`ExecutionResult`]. Checkpointing is support
/// infrastructure: a scheduler with no store (or a broken one) still runs
/// batches.
pub struct TaskScheduler {
    config: ExecutionConfig,
    executor: Arc<dyn TaskExecutor>,
    store: Option<Arc<CheckpointStore>>,
    events: Arc<dyn EventSink>,
    statuses: Arc<Mutex<HashMap<String, TaskStatus>>>,
}

/// Shared context handed to each task run.
struct RunContext {
    executor: Arc<dyn TaskExecutor>,
    store: Option<Arc<CheckpointStore>>,
    events: Arc<dyn EventSink>,
    statuses: Arc<Mutex<HashMap<String, TaskStatus>>>,
    task_timeout: Duration,
    auto_checkpoint: bool,
}

impl TaskScheduler {
    /// Creates a scheduler with no checkpoint store and no event sink.
    pub fn new(config: ExecutionConfig, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            config,
            executor,
            store: None,
            events: Arc::new(NullSink),
            statuses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attaches a checkpoint store for pre/post batch, stage, and task
    /// checkpoints.
    #[must_use]
    pub fn with_store(mut self, store: Arc<CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the observer for batch and task lifecycle events.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Executes a batch under the given strategy.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTask`] for duplicate task ids and
    /// [`Error::ExecutionFailed`] if a worker panics. Individual task
    /// failures never surface here; they are captured on the task records.
    pub async fn execute(
        &self,
        tasks: Vec<AgentTask>,
        strategy: ExecutionStrategy,
        auto_checkpoint: bool,
    ) -> Result<ExecutionResult> {
        let mut seen = HashSet::new();
        for task in &tasks {
            if !seen.insert(task.id.clone()) {
                return Err(Error::InvalidTask(format!("duplicate task id '{}'", task.id)));
            }
        }

        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let deadline = Instant::now() + Duration::from_secs(self.config.batch_timeout_seconds);
        let agent_types: BTreeSet<String> =
            tasks.iter().map(|task| task.agent_type.clone()).collect();

        {
            let mut statuses = self.statuses.lock().await;
            statuses.clear();
            for task in &tasks {
                statuses.insert(task.id.clone(), TaskStatus::Pending);
            }
        }

        info!(%batch_id, tasks = tasks.len(), "batch started");
        self.events.emit(SchedulerEvent::BatchStarted {
            batch_id,
            total_tasks: tasks.len(),
        });

        let mut checkpoints: Vec<CheckpointId> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        if auto_checkpoint {
            let tags: Vec<String> = std::iter::once("pre_batch".to_owned())
                .chain(agent_types.iter().cloned())
                .collect();
            if let Some(id) = self
                .batch_checkpoint(format!("pre_batch_{batch_id}"), tags)
                .await
            {
                checkpoints.push(id);
            }
        }

        let final_tasks = match strategy {
            ExecutionStrategy::Concurrent => {
                self.run_concurrent(tasks, auto_checkpoint, deadline, &mut warnings, &mut errors)
                    .await?
            }
            ExecutionStrategy::Pipeline { stages } => {
                self.run_pipeline(
                    tasks,
                    &stages,
                    auto_checkpoint,
                    deadline,
                    &mut warnings,
                    &mut errors,
                    &mut checkpoints,
                )
                .await?
            }
        };

        let all_completed = final_tasks
            .iter()
            .all(|task| task.status == TaskStatus::Completed);
        if auto_checkpoint {
            let outcome_tag = if all_completed {
                "success"
            } else {
                "partial_failure"
            };
            let tags: Vec<String> = std::iter::once(outcome_tag.to_owned())
                .chain(agent_types.iter().cloned())
                .collect();
            if let Some(id) = self
                .batch_checkpoint(format!("post_batch_{batch_id}"), tags)
                .await
            {
                checkpoints.push(id);
            }
        }

        checkpoints.extend(
            final_tasks
                .iter()
                .filter_map(|task| task.checkpoint_id.clone()),
        );

        let mut result =
            ExecutionResult::from_tasks(batch_id, started_at, Utc::now(), final_tasks);
        result.checkpoints_created = checkpoints;
        result.warnings = warnings;
        result.errors = errors;

        info!(
            %batch_id,
            completed = result.completed,
            failed = result.failed,
            "batch finished"
        );
        self.events.emit(SchedulerEvent::BatchCompleted {
            batch_id,
            completed: result.completed,
            failed: result.failed,
        });

        Ok(result)
    }

    /// Cancels a task that has not started running. Running tasks are not
    /// preempted.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown id and
    /// [`Error::InvalidTask`] once the task is running or terminal.
    pub async fn cancel_task(&self, task_id: &str) -> Result<()> {
        let mut statuses = self.statuses.lock().await;
        match statuses.get(task_id) {
            None => Err(Error::NotFound(format!("task '{task_id}'"))),
            Some(status) if status.can_cancel() => {
                statuses.insert(task_id.to_owned(), TaskStatus::Cancelled);
                Ok(())
            }
            Some(status) => Err(Error::InvalidTask(format!(
                "task '{task_id}' cannot be cancelled from {status:?}"
            ))),
        }
    }

    /// Dependency-ordered fan-out bounded by the worker pool.
    async fn run_concurrent(
        &self,
        tasks: Vec<AgentTask>,
        auto_checkpoint: bool,
        deadline: Instant,
        warnings: &mut Vec<String>,
        errors: &mut Vec<String>,
    ) -> Result<Vec<AgentTask>> {
        let graph = TaskGraph::from_tasks(&tasks);
        let respect_deps = if graph.has_cycles() {
            warnings.push(
                "dependency cycle detected; executing in submission order".to_owned(),
            );
            false
        } else {
            true
        };

        let context = self.run_context(auto_checkpoint);
        let mut pool: WorkerPool<AgentTask> = WorkerPool::new(self.config.max_workers);
        let mut submitted: HashSet<String> = HashSet::new();
        let mut terminal: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut finalized: HashMap<String, AgentTask> = HashMap::new();

        loop {
            if Instant::now() >= deadline {
                pool.abort_all();
                errors.push("batch timeout exceeded; aborting remaining tasks".to_owned());
                break;
            }

            let ready: Vec<AgentTask> = if respect_deps {
                graph
                    .ready_tasks(&terminal)
                    .into_iter()
                    .filter(|task| !submitted.contains(&task.id))
                    .collect()
            } else {
                graph
                    .tasks()
                    .into_iter()
                    .filter(|task| !submitted.contains(&task.id))
                    .collect()
            };

            if ready.is_empty() && pool.is_empty() {
                break;
            }

            for task in ready {
                if pool.len() >= pool.max_workers() {
                    break;
                }

                // Failed dependencies do not block the dependent; the
                // proceed is logged and surfaced as a batch warning.
                let failed_deps = graph.dependencies_in(&task.id, &failed);
                if !failed_deps.is_empty() {
                    warn!(
                        task = %task.id,
                        deps = ?failed_deps,
                        "running despite failed dependencies"
                    );
                    warnings.push(format!(
                        "task '{}' ran although dependencies failed: {}",
                        task.id,
                        failed_deps.join(", ")
                    ));
                }

                submitted.insert(task.id.clone());
                self.mark_queued(&task.id).await;
                pool.spawn(run_task(Arc::clone(&context), task)).await?;
            }

            // The join itself is bounded by the batch deadline; workers
            // still running when it expires are aborted and finalized as
            // failed by `collect`.
            match timeout_at(deadline, pool.join_next()).await {
                Ok(Some(result)) => {
                    let task = result?;
                    terminal.insert(task.id.clone());
                    if task.status == TaskStatus::Failed {
                        failed.insert(task.id.clone());
                    }
                    finalized.insert(task.id.clone(), task);
                }
                Ok(None) => {}
                Err(_) => {
                    pool.abort_all();
                    errors.push("batch timeout exceeded; aborting in-flight tasks".to_owned());
                    break;
                }
            }
        }

        Ok(self.collect(tasks, finalized).await)
    }

    /// Staged execution, strictly in declared stage order.
    #[allow(clippy::too_many_arguments)]
    async fn run_pipeline(
        &self,
        tasks: Vec<AgentTask>,
        stages: &[StageSpec],
        auto_checkpoint: bool,
        deadline: Instant,
        warnings: &mut Vec<String>,
        errors: &mut Vec<String>,
        checkpoints: &mut Vec<CheckpointId>,
    ) -> Result<Vec<AgentTask>> {
        let context = self.run_context(auto_checkpoint);
        let mut assigned: Vec<Vec<AgentTask>> = vec![Vec::new(); stages.len()];
        let mut finalized: HashMap<String, AgentTask> = HashMap::new();

        for task in &tasks {
            let slot = stages
                .iter()
                .position(|stage| stage.agent_types.contains(&task.agent_type));
            match slot {
                Some(index) => assigned[index].push(task.clone()),
                None => {
                    warn!(task = %task.id, agent = %task.agent_type, "no stage accepts task");
                    warnings.push(format!(
                        "task '{}' matched no pipeline stage and was skipped",
                        task.id
                    ));
                    finalized.insert(task.id.clone(), self.skip(task).await);
                }
            }
        }

        let mut aborted = false;
        for (stage, stage_tasks) in stages.iter().zip(assigned) {
            if aborted || Instant::now() >= deadline {
                if !aborted {
                    errors.push(format!(
                        "batch timeout exceeded before stage '{}'",
                        stage.name
                    ));
                    aborted = true;
                }
                for task in &stage_tasks {
                    finalized.insert(task.id.clone(), self.skip(task).await);
                }
                continue;
            }
            if stage_tasks.is_empty() {
                debug!(stage = %stage.name, "stage has no tasks");
                continue;
            }

            if auto_checkpoint {
                if let Some(id) = self
                    .stage_checkpoint(format!("before_stage_{}", stage.name))
                    .await
                {
                    checkpoints.push(id);
                }
            }

            let mut stage_failed = false;
            let mut timed_out = false;
            if stage.parallel {
                let mut pool: WorkerPool<AgentTask> =
                    WorkerPool::new(self.config.max_workers);
                for task in stage_tasks {
                    self.mark_queued(&task.id).await;
                    pool.spawn(run_task(Arc::clone(&context), task)).await?;
                }
                loop {
                    match timeout_at(deadline, pool.join_next()).await {
                        Ok(Some(result)) => {
                            let task = result?;
                            stage_failed |= task.status == TaskStatus::Failed;
                            finalized.insert(task.id.clone(), task);
                        }
                        Ok(None) => break,
                        Err(_) => {
                            pool.abort_all();
                            errors.push(format!(
                                "batch timeout exceeded in stage '{}'; aborting in-flight tasks",
                                stage.name
                            ));
                            timed_out = true;
                            break;
                        }
                    }
                }
            } else {
                for task in stage_tasks {
                    self.mark_queued(&task.id).await;
                    match timeout_at(deadline, run_task(Arc::clone(&context), task)).await {
                        Ok(task) => {
                            stage_failed |= task.status == TaskStatus::Failed;
                            finalized.insert(task.id.clone(), task);
                        }
                        Err(_) => {
                            errors.push(format!(
                                "batch timeout exceeded in stage '{}'; aborting in-flight tasks",
                                stage.name
                            ));
                            timed_out = true;
                            break;
                        }
                    }
                }
            }

            if timed_out {
                aborted = true;
                continue;
            }

            if auto_checkpoint {
                if let Some(id) = self
                    .stage_checkpoint(format!("after_stage_{}", stage.name))
                    .await
                {
                    checkpoints.push(id);
                }
            }

            if stage_failed && self.config.fail_fast {
                warn!(stage = %stage.name, "stage failed; aborting remaining stages");
                warnings.push(format!(
                    "stage '{}' failed; remaining stages skipped (fail-fast)",
                    stage.name
                ));
                aborted = true;
            }
        }

        Ok(self.collect(tasks, finalized).await)
    }

    fn run_context(&self, auto_checkpoint: bool) -> Arc<RunContext> {
        Arc::new(RunContext {
            executor: Arc::clone(&self.executor),
            store: self.store.clone(),
            events: Arc::clone(&self.events),
            statuses: Arc::clone(&self.statuses),
            task_timeout: Duration::from_secs(self.config.task_timeout_seconds),
            auto_checkpoint,
        })
    }

    /// Finalizes a task as Skipped without running it.
    async fn skip(&self, task: &AgentTask) -> AgentTask {
        let mut statuses = self.statuses.lock().await;
        statuses.insert(task.id.clone(), TaskStatus::Skipped);
        let mut skipped = task.clone();
        skipped.status = TaskStatus::Skipped;
        skipped
    }

    async fn mark_queued(&self, task_id: &str) {
        let mut statuses = self.statuses.lock().await;
        if let Some(status) = statuses.get(task_id) {
            if *status == TaskStatus::Pending {
                statuses.insert(task_id.to_owned(), TaskStatus::Queued);
            }
        }
    }

    /// Assembles the final task list in submission order. Tasks that never
    /// reached a worker (batch abort) are finalized from the status map.
    async fn collect(
        &self,
        tasks: Vec<AgentTask>,
        mut finalized: HashMap<String, AgentTask>,
    ) -> Vec<AgentTask> {
        let statuses = self.statuses.lock().await;
        tasks
            .into_iter()
            .map(|task| {
                finalized.remove(&task.id).unwrap_or_else(|| {
                    let mut leftover = task;
                    match statuses.get(&leftover.id).copied() {
                        Some(TaskStatus::Cancelled) => {
                            leftover.status = TaskStatus::Cancelled;
                        }
                        Some(TaskStatus::Skipped) => leftover.status = TaskStatus::Skipped,
                        _ => {
                            leftover.status = TaskStatus::Failed;
                            leftover.error = Some("batch timeout exceeded".to_owned());
                        }
                    }
                    leftover
                })
            })
            .collect()
    }

    async fn batch_checkpoint(&self, label: String, tags: Vec<String>) -> Option<CheckpointId> {
        self.checkpoint(CheckpointLevel::AgentExecution, label, tags)
            .await
    }

    async fn stage_checkpoint(&self, label: String) -> Option<CheckpointId> {
        self.checkpoint(
            CheckpointLevel::QualityGate,
            label,
            vec!["stage".to_owned()],
        )
        .await
    }

    /// Best-effort checkpoint: failures are logged, never propagated.
    async fn checkpoint(
        &self,
        level: CheckpointLevel,
        label: String,
        tags: Vec<String>,
    ) -> Option<CheckpointId> {
        let store = self.store.as_ref()?;
        match store
            .create(CheckpointRequest::new(level).with_label(label).with_tags(tags))
            .await
        {
            Ok(id) => Some(id),
            Err(error) => {
                warn!("checkpoint creation failed: {error}");
                None
            }
        }
    }
}

/// Drives one task Pending → Running → terminal.
///
/// The status map is the source of truth: a task cancelled before this
/// runs finalizes as Cancelled without touching the executor, and a late
/// executor result never overwrites a status another path already
/// finalized.
async fn run_task(context: Arc<RunContext>, mut task: AgentTask) -> AgentTask {
    {
        let mut statuses = context.statuses.lock().await;
        match statuses.get(&task.id) {
            Some(TaskStatus::Cancelled) => {
                task.status = TaskStatus::Cancelled;
                return task;
            }
            _ => {
                statuses.insert(task.id.clone(), TaskStatus::Running);
            }
        }
    }

    task.status = TaskStatus::Running;
    task.started_at = Some(Utc::now());
    context.events.emit(SchedulerEvent::TaskStarted {
        task_id: task.id.clone(),
        agent_type: task.agent_type.clone(),
    });

    if context.auto_checkpoint {
        if let Some(store) = &context.store {
            let request = CheckpointRequest::new(CheckpointLevel::AgentExecution)
                .with_label(format!("pre_task_{}", task.id))
                .with_agent_type(task.agent_type.clone())
                .with_tags(vec!["pre_task".to_owned()]);
            match store.create(request).await {
                Ok(id) => task.checkpoint_id = Some(id),
                Err(error) => warn!(task = %task.id, "pre-task checkpoint failed: {error}"),
            }
        }
    }

    let outcome = timeout(context.task_timeout, context.executor.execute(&task)).await;
    let (status, output, error_message) = match outcome {
        Ok(Ok(value)) => (TaskStatus::Completed, Some(value), None),
        Ok(Err(error)) => (TaskStatus::Failed, None, Some(error.to_string())),
        Err(_) => (
            TaskStatus::Failed,
            None,
            Some(format!(
                "task timed out after {}s",
                context.task_timeout.as_secs()
            )),
        ),
    };

    {
        let mut statuses = context.statuses.lock().await;
        let current = statuses.get(&task.id).copied();
        if current == Some(TaskStatus::Running) {
            statuses.insert(task.id.clone(), status);
            task.status = status;
            task.output = output;
            task.error = error_message;
        } else if let Some(already_final) = current.filter(|entry| entry.is_terminal()) {
            // Another path (batch deadline, cancellation) finalized this
            // task; the late result is discarded.
            debug!(task = %task.id, "discarding late result for finalized task");
            task.status = already_final;
        }
    }

    task.completed_at = Some(Utc::now());
    if let (Some(started), Some(completed)) = (task.started_at, task.completed_at) {
        task.duration_seconds = Some(
            completed.signed_duration_since(started).num_milliseconds() as f64 / 1000.0,
        );
    }

    match task.status {
        TaskStatus::Completed => context.events.emit(SchedulerEvent::TaskCompleted {
            task_id: task.id.clone(),
            duration_ms: task
                .duration_seconds
                .map_or(0, |seconds| (seconds * 1000.0) as u64),
        }),
        TaskStatus::Failed => context.events.emit(SchedulerEvent::TaskFailed {
            task_id: task.id.clone(),
            error: task.error.clone().unwrap_or_default(),
        }),
        _ => {}
    }

    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct EchoExecutor;

    #[async_trait]
    impl TaskExecutor for EchoExecutor {
        async fn execute(&self, task: &AgentTask) -> Result<Value> {
            Ok(json!({ "task": task.id }))
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl TaskExecutor for FailingExecutor {
        async fn execute(&self, task: &AgentTask) -> Result<Value> {
            Err(Error::ExecutionFailed(format!("boom in {}", task.id)))
        }
    }

    fn scheduler(executor: Arc<dyn TaskExecutor>) -> TaskScheduler {
        TaskScheduler::new(ExecutionConfig::default(), executor)
    }

    #[tokio::test]
    async fn test_concurrent_batch_completes_all_tasks() {
        let scheduler = scheduler(Arc::new(EchoExecutor));
        let tasks = vec![AgentTask::new("t1", "x"), AgentTask::new("t2", "x")];

        let result = scheduler
            .execute(tasks, ExecutionStrategy::Concurrent, false)
            .await
            .unwrap_or_else(|error| panic!("execute: {error}"));

        assert!(result.success);
        assert_eq!(result.completed, 2);
        assert!(result.checkpoints_created.is_empty());
    }

    #[tokio::test]
    async fn test_task_failure_is_captured_not_propagated() {
        let scheduler = scheduler(Arc::new(FailingExecutor));
        let tasks = vec![AgentTask::new("t1", "x")];

        let result = scheduler
            .execute(tasks, ExecutionStrategy::Concurrent, false)
            .await
            .unwrap_or_else(|error| panic!("execute: {error}"));

        assert!(!result.success);
        assert_eq!(result.failed, 1);
        let task = &result.tasks[0];
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("Task execution failed: boom in t1"));
        assert!(task.started_at.is_some());
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let scheduler = scheduler(Arc::new(EchoExecutor));
        let tasks = vec![AgentTask::new("t1", "x"), AgentTask::new("t1", "x")];

        let result = scheduler
            .execute(tasks, ExecutionStrategy::Concurrent, false)
            .await;
        assert!(matches!(result, Err(Error::InvalidTask(_))));
    }

    #[tokio::test]
    async fn test_failed_dependency_does_not_block_dependent() {
        let scheduler = scheduler(Arc::new(FailingExecutor));
        let tasks = vec![
            AgentTask::new("t1", "x"),
            AgentTask::new("t2", "x").with_dependencies(vec!["t1".to_owned()]),
        ];

        let result = scheduler
            .execute(tasks, ExecutionStrategy::Concurrent, false)
            .await
            .unwrap_or_else(|error| panic!("execute: {error}"));

        // Both ran (and failed); the proceed was surfaced as a warning.
        assert_eq!(result.failed, 2);
        assert!(result
            .warnings
            .iter()
            .any(|warning| warning.contains("although dependencies failed")));
    }

    #[tokio::test]
    async fn test_empty_batch_is_trivially_successful() {
        let scheduler = scheduler(Arc::new(EchoExecutor));
        let result = scheduler
            .execute(Vec::new(), ExecutionStrategy::Concurrent, false)
            .await
            .unwrap_or_else(|error| panic!("execute: {error}"));
        assert!(result.success);
        assert_eq!(result.total, 0);
    }
}

use async_trait::async_trait;
use serde_json::Value;

use crate::checkpoint::ExternalState;
use crate::error::Result;
use crate::task::AgentTask;

/// Opaque executor invoked by the scheduler for each task.
///
/// Implementations dispatch on `task.agent_type` and return an opaque
/// output value. Errors are captured onto the task record; they never
/// abort the batch.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Runs the task's business logic.
    async fn execute(&self, task: &AgentTask) -> Result<Value>;
}

/// Captures out-of-band state (version control, session, todo list) at
/// checkpoint creation and rollback validation time.
#[async_trait]
pub trait StateProbe: Send + Sync {
    /// Snapshots the current external state.
    async fn capture(&self) -> ExternalState;
}

/// Probe that captures nothing. Used when no external collaborators are
/// wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProbe;

#[async_trait]
impl StateProbe for NoopProbe {
    async fn capture(&self) -> ExternalState {
        ExternalState::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_probe_captures_nothing() {
        let state = NoopProbe.capture().await;
        assert!(state.git.is_none());
        assert!(state.session.is_none());
        assert!(state.todos.is_none());
        assert!(state.agent.is_none());
    }
}

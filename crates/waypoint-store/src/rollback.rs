use std::sync::Arc;

use tracing::{info, warn};

use waypoint_core::{
    CheckpointId, CheckpointLevel, CheckpointMetadata, ExternalState, NoopProbe, RollbackResult,
    StateProbe,
};

use crate::semantic::{parse_rewind_command, RewindTarget};
use crate::snapshot;
use crate::store::{CheckpointRequest, CheckpointStore};

/// Restores the workspace to a prior checkpoint.
///
/// The coordinator validates safety, snapshots the current state before a
/// destructive rollback, restores the target's file snapshot, and reports
/// divergence in out-of-band state. It never force-overwrites external
/// state (no forced checkout); divergence is reporting-only.
pub struct RollbackCoordinator {
    store: Arc<CheckpointStore>,
    probe: Arc<dyn StateProbe>,
}

impl RollbackCoordinator {
    /// Creates a coordinator over a store, with no external state probe.
    pub fn new(store: Arc<CheckpointStore>) -> Self {
        Self {
            store,
            probe: Arc::new(NoopProbe),
        }
    }

    /// Sets the probe used for safety validation and divergence checks.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn StateProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Rolls the workspace back to `id`.
    ///
    /// `dry_run` reports what would be restored without mutating anything.
    /// Unless disabled, a safety checkpoint of the current state is
    /// created first so the rollback itself is always undoable. All
    /// failures are reported through the returned [`RollbackResult`];
    /// partial progress (files restored, safety checkpoint id) is always
    /// included.
    pub async fn rollback(
        &self,
        id: &CheckpointId,
        dry_run: bool,
        create_safety_checkpoint: bool,
    ) -> RollbackResult {
        let target = match self.store.get(id).await {
            Ok(metadata) => metadata,
            Err(error) => return RollbackResult::failure(format!("checkpoint not found: {error}")),
        };

        let current_state = self.probe.capture().await;
        let mut warnings = safety_warnings(&current_state);

        if dry_run {
            return RollbackResult {
                success: true,
                checkpoint_id: Some(id.clone()),
                files_restored: target.file_manifest.file_count,
                conflicts: Vec::new(),
                warnings,
                safety_checkpoint: None,
                message: format!(
                    "dry run: would restore {} files from {id}",
                    target.file_manifest.file_count
                ),
            };
        }

        let safety_checkpoint = if create_safety_checkpoint {
            self.create_safety_checkpoint(id, &mut warnings).await
        } else {
            None
        };

        let (files_restored, restore_error) = self.restore_files(&target, &mut warnings);
        warnings.extend(divergence_warnings(&target.external_state, &current_state));

        if let Some(error) = restore_error {
            return RollbackResult {
                success: false,
                checkpoint_id: Some(id.clone()),
                files_restored,
                conflicts: Vec::new(),
                warnings,
                safety_checkpoint,
                message: format!("rollback failed after {files_restored} files: {error}"),
            };
        }

        info!(checkpoint = %id, files_restored, "rollback complete");
        RollbackResult {
            success: true,
            checkpoint_id: Some(id.clone()),
            files_restored,
            conflicts: Vec::new(),
            warnings,
            safety_checkpoint,
            message: format!("restored {files_restored} files from {id}"),
        }
    }

    /// Resolves a free-form command and rolls back to the resolved
    /// checkpoint, or returns a failed result with no id when nothing
    /// resolves.
    pub async fn semantic_rewind(&self, command: &str, dry_run: bool) -> RollbackResult {
        let known_agents = self.store.known_agents().await;
        let resolved = match parse_rewind_command(command, &known_agents) {
            RewindTarget::Steps(steps) => self.store.rewind_by_steps(steps).await,
            RewindTarget::HoursAgo(hours) => self.store.find_by_time(hours).await,
            RewindTarget::Agent(agent) => self.store.find_by_agent(&agent, 1).await,
            RewindTarget::Description(text) => self.store.find_by_description(&text, true).await,
        };

        match resolved {
            Ok(id) => self.rollback(&id, dry_run, true).await,
            Err(error) => {
                RollbackResult::failure(format!("could not resolve '{command}': {error}"))
            }
        }
    }

    async fn create_safety_checkpoint(
        &self,
        target: &CheckpointId,
        warnings: &mut Vec<String>,
    ) -> Option<CheckpointId> {
        let request = CheckpointRequest::new(CheckpointLevel::Manual)
            .with_label(format!("before_rollback_to_{}", target.short()))
            .with_tags(vec!["rollback".to_owned(), "auto".to_owned()])
            .with_parent(target.clone())
            .with_files();

        match self.store.create(request).await {
            Ok(id) => Some(id),
            Err(error) => {
                warn!("safety checkpoint failed: {error}");
                warnings.push(format!(
                    "proceeding without safety checkpoint (creation failed: {error})"
                ));
                None
            }
        }
    }

    /// Restores the target's snapshot blob. A target with no blob restores
    /// zero files, which is not an error.
    fn restore_files(
        &self,
        target: &CheckpointMetadata,
        warnings: &mut Vec<String>,
    ) -> (usize, Option<waypoint_core::Error>) {
        match self.store.read_snapshot(&target.id) {
            Ok(Some(archive)) => {
                snapshot::restore_archive(&archive, self.store.workspace_root())
            }
            Ok(None) => {
                warnings.push("checkpoint has no file snapshot; nothing restored".to_owned());
                (0, None)
            }
            Err(error) => (0, Some(error)),
        }
    }
}

/// Warnings about the current state being clobbered by a restore.
fn safety_warnings(current: &ExternalState) -> Vec<String> {
    let mut warnings = Vec::new();
    if let Some(git) = &current.git {
        if git.dirty {
            warnings.push(format!(
                "uncommitted changes to {} file(s) will be overwritten",
                git.changed_files.len()
            ));
        }
    }
    warnings
}

/// Human-readable divergence between the checkpoint's captured external
/// state and the live state. Reporting only: no checkout is forced.
fn divergence_warnings(captured: &ExternalState, current: &ExternalState) -> Vec<String> {
    let mut warnings = Vec::new();

    if let (Some(captured_git), Some(current_git)) = (&captured.git, &current.git) {
        if captured_git.branch != current_git.branch {
            warnings.push(format!(
                "branch diverged: checkpoint was on {:?}, currently on {:?} (not switched)",
                captured_git.branch, current_git.branch
            ));
        }
        if captured_git.commit != current_git.commit {
            warnings.push(format!(
                "commit diverged: checkpoint at {:?}, currently at {:?} (not reset)",
                captured_git.commit, current_git.commit
            ));
        }
    }

    if let (Some(captured_session), Some(current_session)) = (&captured.session, &current.session) {
        if captured_session.session_id != current_session.session_id {
            warnings.push("session diverged from the one captured at checkpoint time".to_owned());
        }
    }

    if let (Some(captured_todos), Some(current_todos)) = (&captured.todos, &current.todos) {
        if captured_todos != current_todos {
            warnings.push("todo list diverged from checkpoint-time state".to_owned());
        }
    }

    warnings
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a checkpoint.
///
/// Ids are generated by the store as `cp-<millis>-<seq>` so lexicographic
/// order tracks creation order. Ids are never reused, including after a
/// checkpoint is deleted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckpointId(String);

impl CheckpointId {
    /// Wraps a raw id string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The underlying id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters of the id, for labels and messages.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Origin of a checkpoint, distinct from its semantic category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointLevel {
    /// Created automatically around an agent batch or task.
    AgentExecution,
    /// Created at a pipeline stage boundary.
    QualityGate,
    /// Created while preparing a commit.
    CommitPreparation,
    /// Created explicitly by the caller.
    Manual,
}

impl CheckpointLevel {
    /// Stable lowercase name used in synthesized labels and file names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentExecution => "agent_execution",
            Self::QualityGate => "quality_gate",
            Self::CommitPreparation => "commit_preparation",
            Self::Manual => "manual",
        }
    }
}

/// Semantic classification inferred from a checkpoint's label and description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointCategory {
    /// New functionality.
    Feature,
    /// A defect fix.
    Bugfix,
    /// Structural change without behavior change.
    Refactor,
    /// No keyword matched, or auto-categorization is disabled.
    Unknown,
}

/// Version-control position captured at checkpoint creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitState {
    /// Current commit id.
    pub commit: Option<String>,
    /// Current branch name.
    pub branch: Option<String>,
    /// Whether the worktree had uncommitted changes.
    pub dirty: bool,
    /// Paths with uncommitted changes.
    pub changed_files: Vec<String>,
}

/// Session state captured at checkpoint creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Identifier of the active session.
    pub session_id: Option<String>,
    /// Free-text summary of the session.
    pub summary: Option<String>,
}

/// Todo/task-list state captured at checkpoint creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoState {
    /// Open items.
    pub open: Vec<String>,
    /// Completed items.
    pub done: Vec<String>,
}

/// Out-of-band state snapshots, each captured once at creation and never
/// mutated afterward.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalState {
    /// Version-control position.
    pub git: Option<GitState>,
    /// Session state.
    pub session: Option<SessionState>,
    /// Todo-list state.
    pub todos: Option<TodoState>,
    /// Agent type the checkpoint was created for.
    pub agent: Option<String>,
}

/// Summary of the files captured in a checkpoint's snapshot blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    /// Number of files captured.
    pub file_count: usize,
    /// Total captured bytes.
    pub total_bytes: u64,
    /// Captured file paths, workspace-relative.
    pub files: Vec<String>,
}

/// Parent/child links between checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRelationships {
    /// Checkpoint this one was derived from, if any.
    pub parent: Option<CheckpointId>,
    /// Checkpoints later derived from this one.
    pub children: Vec<CheckpointId>,
}

/// Full metadata record for one checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Unique, immutable id.
    pub id: CheckpointId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Origin of the checkpoint.
    pub level: CheckpointLevel,
    /// Semantic classification.
    pub category: CheckpointCategory,
    /// Human-readable label; synthesized when not supplied.
    pub label: String,
    /// Optional longer description.
    pub description: Option<String>,
    /// Captured out-of-band state.
    pub external_state: ExternalState,
    /// Files captured in the snapshot blob.
    pub file_manifest: FileManifest,
    /// Parent/child links.
    pub relationships: CheckpointRelationships,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Lowercase concatenation of label, description, and tags, built once
    /// at creation. Renaming a checkpoint does not change its searchability.
    pub searchable_text: String,
}

impl CheckpointMetadata {
    /// Builds the searchable text for a checkpoint from its label,
    /// description, and tags.
    pub fn build_searchable_text(
        label: &str,
        description: Option<&str>,
        tags: &[String],
    ) -> String {
        let mut text = label.to_lowercase();
        if let Some(description) = description {
            text.push(' ');
            text.push_str(&description.to_lowercase());
        }
        for tag in tags {
            text.push(' ');
            text.push_str(&tag.to_lowercase());
        }
        text
    }

    /// Reduces the record to its index summary.
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            level: self.level,
            category: self.category,
            label: self.label.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Index-level view of a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    /// Unique id.
    pub id: CheckpointId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Origin of the checkpoint.
    pub level: CheckpointLevel,
    /// Semantic classification.
    pub category: CheckpointCategory,
    /// Human-readable label.
    pub label: String,
    /// Free-form tags.
    pub tags: Vec<String>,
}

/// Outcome of a rollback (or dry-run rollback) attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResult {
    /// Whether the rollback completed without error.
    pub success: bool,
    /// The checkpoint rolled back to, when one was resolved.
    pub checkpoint_id: Option<CheckpointId>,
    /// Files restored before completion or failure.
    pub files_restored: usize,
    /// Hard conflicts encountered while restoring.
    pub conflicts: Vec<String>,
    /// Non-fatal findings: dirty worktree, external-state divergence, etc.
    pub warnings: Vec<String>,
    /// Safety checkpoint of the pre-rollback state, when one was created.
    pub safety_checkpoint: Option<CheckpointId>,
    /// Human-readable outcome message.
    pub message: String,
}

impl RollbackResult {
    /// A failed result carrying only a message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            checkpoint_id: None,
            files_restored: 0,
            conflicts: Vec::new(),
            warnings: Vec::new(),
            safety_checkpoint: None,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_id_short() {
        let id = CheckpointId::new("cp-1730000000000-0001");
        assert_eq!(id.short(), "cp-17300");

        let tiny = CheckpointId::new("cp");
        assert_eq!(tiny.short(), "cp");
    }

    #[test]
    fn test_searchable_text_lowercases_all_parts() {
        let text = CheckpointMetadata::build_searchable_text(
            "Fix Bug",
            Some("In AUTH module"),
            &["Hotfix".to_owned()],
        );
        assert_eq!(text, "fix bug in auth module hotfix");
    }

    #[test]
    fn test_searchable_text_without_description() {
        let text = CheckpointMetadata::build_searchable_text("label", None, &[]);
        assert_eq!(text, "label");
    }
}

//! Configuration structs for the store and scheduler.
//!
//! These are consumed as plain records: an outer layer owns loading and
//! file formats, the core never reads configuration files itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointCategory, CheckpointLevel};

/// Complete coordinator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Checkpoint store configuration.
    pub checkpoints: CheckpointConfig,
    /// Scheduler and worker-pool configuration.
    pub execution: ExecutionConfig,
}

/// Checkpoint store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Kill-switch: a disabled store fails every create.
    pub enabled: bool,
    /// Whether categories are inferred from labels and descriptions.
    pub auto_categorize: bool,
    /// Retention policy per checkpoint level.
    pub retention: HashMap<CheckpointLevel, RetentionPolicy>,
    /// Keyword table driving auto-categorization.
    pub keywords: Vec<CategoryKeywords>,
    /// Per-file size cap for snapshot capture, in bytes.
    pub max_snapshot_file_bytes: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        let mut retention = HashMap::new();
        retention.insert(
            CheckpointLevel::AgentExecution,
            RetentionPolicy {
                count: 50,
                days: Some(14),
            },
        );
        retention.insert(
            CheckpointLevel::QualityGate,
            RetentionPolicy {
                count: 30,
                days: Some(14),
            },
        );
        retention.insert(
            CheckpointLevel::CommitPreparation,
            RetentionPolicy {
                count: 20,
                days: Some(30),
            },
        );
        retention.insert(
            CheckpointLevel::Manual,
            RetentionPolicy {
                count: 100,
                days: None,
            },
        );

        Self {
            enabled: true,
            auto_categorize: true,
            retention,
            keywords: CategoryKeywords::defaults(),
            max_snapshot_file_bytes: 1024 * 1024,
        }
    }
}

/// Hard cap plus optional age cap for one checkpoint level. Whichever
/// policy is stricter wins.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Maximum checkpoints retained at this level.
    pub count: usize,
    /// Maximum age in days, when age-based retention applies.
    pub days: Option<u32>,
}

/// Keywords mapping label/description text onto one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryKeywords {
    /// Category assigned on a keyword hit.
    pub category: CheckpointCategory,
    /// Lowercase keywords scanned against label plus description.
    pub keywords: Vec<String>,
}

impl CategoryKeywords {
    /// Default keyword table.
    pub fn defaults() -> Vec<Self> {
        let entry = |category, words: &[&str]| Self {
            category,
            keywords: words.iter().map(|word| (*word).to_owned()).collect(),
        };
        vec![
            entry(
                CheckpointCategory::Bugfix,
                &["fix", "bug", "patch", "repair", "hotfix"],
            ),
            entry(
                CheckpointCategory::Feature,
                &["feature", "add", "implement", "new"],
            ),
            entry(
                CheckpointCategory::Refactor,
                &["refactor", "cleanup", "restructure", "reorganize"],
            ),
        ]
    }
}

/// Scheduler and worker-pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum tasks executing concurrently.
    pub max_workers: usize,
    /// Per-task timeout in seconds.
    pub task_timeout_seconds: u64,
    /// Coarse batch-level timeout in seconds.
    pub batch_timeout_seconds: u64,
    /// Whether a pipeline stage failure aborts remaining stages.
    pub fail_fast: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            task_timeout_seconds: 300,
            batch_timeout_seconds: 3600,
            fail_fast: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, to_string};

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert!(config.checkpoints.enabled);
        assert!(config.checkpoints.auto_categorize);
        assert_eq!(config.execution.max_workers, 5);
        assert!(!config.execution.fail_fast);
    }

    #[test]
    fn test_manual_retention_has_no_age_cap() {
        let config = CheckpointConfig::default();
        let manual = config.retention[&CheckpointLevel::Manual];
        assert_eq!(manual.count, 100);
        assert!(manual.days.is_none());
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = CoordinatorConfig::default();
        let json = match to_string(&config) {
            Ok(serialized) => serialized,
            Err(error) => panic!("serialize failed: {error}"),
        };
        let deserialized: CoordinatorConfig = match from_str(&json) {
            Ok(value) => value,
            Err(error) => panic!("deserialize failed: {error}"),
        };
        assert_eq!(
            config.execution.max_workers,
            deserialized.execution.max_workers
        );
    }
}

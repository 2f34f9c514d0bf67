use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use waypoint_core::{
    CheckpointCategory, CheckpointConfig, CheckpointId, CheckpointLevel, CheckpointMetadata,
    CheckpointRelationships, CheckpointSummary, Error, FileManifest, NoopProbe,
    Result, StateProbe,
};

use crate::index::CheckpointIndex;
use crate::snapshot;

const CHECKPOINTS_DIR: &str = "checkpoints";
const INDEX_FILE: &str = "index.json";

/// Parameters for creating one checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointRequest {
    /// Origin of the checkpoint.
    pub level: CheckpointLevel,
    /// Label; synthesized from level, agent, and time-of-day when absent.
    pub label: Option<String>,
    /// Optional longer description.
    pub description: Option<String>,
    /// Agent type the checkpoint is created for.
    pub agent_type: Option<String>,
    /// Whether to capture a workspace snapshot blob.
    pub include_files: bool,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Checkpoint this one is derived from.
    pub parent: Option<CheckpointId>,
}

impl CheckpointRequest {
    /// Creates a request with no label, description, tags, or snapshot.
    pub fn new(level: CheckpointLevel) -> Self {
        Self {
            level,
            label: None,
            description: None,
            agent_type: None,
            include_files: false,
            tags: Vec::new(),
            parent: None,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = Some(agent_type.into());
        self
    }

    #[must_use]
    pub fn with_files(mut self) -> Self {
        self.include_files = true;
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: CheckpointId) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Per-level and aggregate store statistics.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Total checkpoints in the index.
    pub total: usize,
    /// Checkpoints per level.
    pub per_level: Vec<(CheckpointLevel, usize)>,
    /// Total bytes across snapshot blobs on disk.
    pub blob_bytes: u64,
}

struct StoreInner {
    index: CheckpointIndex,
    next_seq: u64,
}

/// Durable checkpoint store with an indexed view over snapshot metadata.
///
/// Layout under the store root: `checkpoints/<id>.json` metadata records,
/// `checkpoints/<id>.snapshot.gz` optional blobs, and `index.json`. All
/// mutations run behind a single writer lock; the index file is replaced
/// atomically (write new, then rename) so a crash mid-write never leaves a
/// torn index.
pub struct CheckpointStore {
    workspace_root: PathBuf,
    root: PathBuf,
    config: CheckpointConfig,
    probe: Arc<dyn StateProbe>,
    inner: Mutex<StoreInner>,
}

impl CheckpointStore {
    /// Opens (or initializes) a store under `<workspace_root>/.waypoint`.
    ///
    /// # Errors
    /// Returns an error if the store directories cannot be created or an
    /// existing metadata record cannot be scanned during index rebuild.
    pub fn open(workspace_root: impl Into<PathBuf>, config: CheckpointConfig) -> Result<Self> {
        let workspace_root = workspace_root.into();
        let root = workspace_root.join(".waypoint");
        Self::open_at(workspace_root, root, config, Arc::new(NoopProbe))
    }

    /// Opens a store at an explicit root with an injected state probe.
    ///
    /// # Errors
    /// Returns an error if the store directories cannot be created or the
    /// index cannot be rebuilt.
    pub fn open_at(
        workspace_root: PathBuf,
        root: PathBuf,
        config: CheckpointConfig,
        probe: Arc<dyn StateProbe>,
    ) -> Result<Self> {
        fs::create_dir_all(root.join(CHECKPOINTS_DIR))?;

        let index = Self::load_index(&root)?;
        let next_seq = index
            .by_id
            .keys()
            .filter_map(|id| id.as_str().rsplit('-').next())
            .filter_map(|seq| seq.parse::<u64>().ok())
            .max()
            .map_or(0, |seq| seq + 1);

        Ok(Self {
            workspace_root,
            root,
            config,
            probe,
            inner: Mutex::new(StoreInner { index, next_seq }),
        })
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a checkpoint: metadata record, optional snapshot blob, index
    /// update, and a retention sweep for the created level.
    ///
    /// # Errors
    /// Returns [`Error::Storage`] if the store is disabled or any write
    /// fails.
    pub async fn create(&self, request: CheckpointRequest) -> Result<CheckpointId> {
        if !self.config.enabled {
            return Err(Error::Storage("checkpoint store is disabled".to_owned()));
        }

        let created_at = Utc::now();
        let mut external_state = self.probe.capture().await;
        external_state.agent = request.agent_type.clone();

        let label = request.label.clone().unwrap_or_else(|| {
            format!(
                "{}_{}_{}",
                request.level.as_str(),
                request.agent_type.as_deref().unwrap_or("unknown"),
                created_at.format("%H:%M:%S"),
            )
        });
        let category = self.categorize(&label, request.description.as_deref());
        let searchable_text = CheckpointMetadata::build_searchable_text(
            &label,
            request.description.as_deref(),
            &request.tags,
        );

        let (id, sweep_ids) = {
            let mut inner = self.inner.lock().await;
            let id = CheckpointId::new(format!(
                "cp-{}-{:06}",
                created_at.timestamp_millis(),
                inner.next_seq
            ));
            inner.next_seq += 1;

            let mut file_manifest = FileManifest::default();
            if request.include_files {
                let archive = snapshot::capture_workspace(
                    &self.workspace_root,
                    &self.root,
                    self.config.max_snapshot_file_bytes,
                )?;
                snapshot::write_archive(&self.blob_path(&id), &archive)?;
                file_manifest = archive.manifest();
            }

            let metadata = CheckpointMetadata {
                id: id.clone(),
                created_at,
                level: request.level,
                category,
                label,
                description: request.description.clone(),
                external_state,
                file_manifest,
                relationships: CheckpointRelationships {
                    parent: request.parent.clone(),
                    children: Vec::new(),
                },
                tags: request.tags.clone(),
                searchable_text,
            };

            self.write_metadata(&metadata)?;
            if let Some(parent) = &request.parent {
                self.link_child(parent, &id);
            }

            inner.index.insert(metadata.summary());
            self.persist_index(&inner.index)?;

            let sweep_ids = self.retention_victims(&inner.index, request.level);
            (id, sweep_ids)
        };

        for victim in sweep_ids {
            debug!(id = %victim, "retention sweep deleting checkpoint");
            self.delete(&victim).await?;
        }

        Ok(id)
    }

    /// Lists checkpoint summaries newest first, optionally filtered.
    pub async fn list(
        &self,
        level: Option<CheckpointLevel>,
        category: Option<CheckpointCategory>,
        limit: usize,
    ) -> Vec<CheckpointSummary> {
        let inner = self.inner.lock().await;
        inner
            .index
            .timeline
            .iter()
            .filter_map(|entry| inner.index.by_id.get(&entry.id))
            .filter(|summary| level.is_none_or(|wanted| summary.level == wanted))
            .filter(|summary| category.is_none_or(|wanted| summary.category == wanted))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Loads the full metadata record for a checkpoint.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown id.
    pub async fn get(&self, id: &CheckpointId) -> Result<CheckpointMetadata> {
        {
            let inner = self.inner.lock().await;
            if !inner.index.by_id.contains_key(id) {
                return Err(Error::NotFound(id.to_string()));
            }
        }
        self.read_metadata(id)
    }

    /// Deletes a checkpoint's metadata, blob, and index entries. Deleting a
    /// missing id is a no-op.
    ///
    /// # Errors
    /// Returns an error if the index cannot be persisted after removal.
    pub async fn delete(&self, id: &CheckpointId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.index.remove(id).is_none() {
            return Ok(());
        }

        for path in [self.metadata_path(id), self.blob_path(id)] {
            if let Err(error) = fs::remove_file(&path) {
                if error.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), "failed to remove checkpoint file: {error}");
                }
            }
        }

        self.persist_index(&inner.index)
    }

    /// Reads the snapshot archive for a checkpoint, when one exists.
    ///
    /// # Errors
    /// Returns an error if an existing blob cannot be read or decoded.
    pub fn read_snapshot(&self, id: &CheckpointId) -> Result<Option<snapshot::SnapshotArchive>> {
        let path = self.blob_path(id);
        if !path.exists() {
            return Ok(None);
        }
        snapshot::read_archive(&path).map(Some)
    }

    /// Workspace root this store snapshots.
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Runs a closure against the locked index. Internal seam for search
    /// operations.
    pub(crate) async fn with_index<T>(&self, reader: impl FnOnce(&CheckpointIndex) -> T) -> T {
        let inner = self.inner.lock().await;
        reader(&inner.index)
    }

    /// Per-level counts and blob usage.
    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.lock().await;
        let mut per_level: Vec<(CheckpointLevel, usize)> = Vec::new();
        for level in [
            CheckpointLevel::AgentExecution,
            CheckpointLevel::QualityGate,
            CheckpointLevel::CommitPreparation,
            CheckpointLevel::Manual,
        ] {
            let count = inner
                .index
                .by_id
                .values()
                .filter(|summary| summary.level == level)
                .count();
            if count > 0 {
                per_level.push((level, count));
            }
        }

        let blob_bytes = inner
            .index
            .by_id
            .keys()
            .filter_map(|id| fs::metadata(self.blob_path(id)).ok())
            .map(|metadata| metadata.len())
            .sum();

        StoreStats {
            total: inner.index.len(),
            per_level,
            blob_bytes,
        }
    }

    fn categorize(&self, label: &str, description: Option<&str>) -> CheckpointCategory {
        if !self.config.auto_categorize {
            return CheckpointCategory::Unknown;
        }
        let haystack = format!("{} {}", label, description.unwrap_or("")).to_lowercase();
        self.config
            .keywords
            .iter()
            .find(|entry| entry.keywords.iter().any(|word| haystack.contains(word)))
            .map_or(CheckpointCategory::Unknown, |entry| entry.category)
    }

    /// Ids past the level's count cap or age cap, oldest first. Both caps
    /// are enforced; whichever is stricter wins.
    fn retention_victims(
        &self,
        index: &CheckpointIndex,
        level: CheckpointLevel,
    ) -> Vec<CheckpointId> {
        let Some(policy) = self.config.retention.get(&level) else {
            return Vec::new();
        };

        let at_level = index.ids_at_level(level);
        let mut victims: Vec<CheckpointId> = at_level
            .iter()
            .skip(policy.count)
            .cloned()
            .collect();

        if let Some(days) = policy.days {
            let cutoff = Utc::now() - Duration::days(i64::from(days));
            for id in at_level.iter().take(policy.count) {
                let expired = index
                    .by_id
                    .get(id)
                    .is_some_and(|summary| summary.created_at < cutoff);
                if expired {
                    victims.push(id.clone());
                }
            }
        }

        victims
    }

    fn metadata_path(&self, id: &CheckpointId) -> PathBuf {
        self.root.join(CHECKPOINTS_DIR).join(format!("{id}.json"))
    }

    fn blob_path(&self, id: &CheckpointId) -> PathBuf {
        self.root
            .join(CHECKPOINTS_DIR)
            .join(format!("{id}.snapshot.gz"))
    }

    fn write_metadata(&self, metadata: &CheckpointMetadata) -> Result<()> {
        let json = serde_json::to_string_pretty(metadata)?;
        write_atomic(&self.metadata_path(&metadata.id), json.as_bytes())
    }

    fn read_metadata(&self, id: &CheckpointId) -> Result<CheckpointMetadata> {
        let path = self.metadata_path(id);
        let contents = fs::read_to_string(&path)
            .map_err(|error| Error::Storage(format!("read {}: {error}", path.display())))?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Appends `child` to the parent's relationship record. Best-effort:
    /// a missing parent only logs.
    fn link_child(&self, parent: &CheckpointId, child: &CheckpointId) {
        match self.read_metadata(parent) {
            Ok(mut metadata) => {
                metadata.relationships.children.push(child.clone());
                if let Err(error) = self.write_metadata(&metadata) {
                    warn!(parent = %parent, "failed to record child checkpoint: {error}");
                }
            }
            Err(error) => warn!(parent = %parent, "parent checkpoint not readable: {error}"),
        }
    }

    fn persist_index(&self, index: &CheckpointIndex) -> Result<()> {
        let json = serde_json::to_string(index)?;
        write_atomic(&self.root.join(INDEX_FILE), json.as_bytes())
    }

    fn load_index(root: &Path) -> Result<CheckpointIndex> {
        let index_path = root.join(INDEX_FILE);
        if let Ok(contents) = fs::read_to_string(&index_path) {
            match serde_json::from_str::<CheckpointIndex>(&contents) {
                Ok(index) if index.is_consistent() => return Ok(index),
                Ok(_) => warn!("index file inconsistent, rebuilding from metadata"),
                Err(error) => warn!("index file unreadable ({error}), rebuilding from metadata"),
            }
        }
        Self::rebuild_index(root)
    }

    /// Scans `checkpoints/*.json` and rebuilds the index from scratch.
    fn rebuild_index(root: &Path) -> Result<CheckpointIndex> {
        let mut index = CheckpointIndex::default();
        let dir = root.join(CHECKPOINTS_DIR);
        if !dir.exists() {
            return Ok(index);
        }

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path)?;
            match serde_json::from_str::<CheckpointMetadata>(&contents) {
                Ok(metadata) => index.insert(metadata.summary()),
                Err(error) => {
                    warn!(path = %path.display(), "skipping unreadable metadata: {error}");
                }
            }
        }
        Ok(index)
    }
}

/// Write-new-then-rename so a crash mid-write never leaves a torn file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> CheckpointStore {
        CheckpointStore::open(dir.path(), CheckpointConfig::default())
            .unwrap_or_else(|error| panic!("open store: {error}"))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let store = open_store(&dir);

        let id = store
            .create(
                CheckpointRequest::new(CheckpointLevel::Manual)
                    .with_label("fix auth bug")
                    .with_tags(vec!["auth".to_owned()]),
            )
            .await
            .unwrap_or_else(|error| panic!("create: {error}"));

        let metadata = store
            .get(&id)
            .await
            .unwrap_or_else(|error| panic!("get: {error}"));
        assert_eq!(metadata.label, "fix auth bug");
        assert_eq!(metadata.category, CheckpointCategory::Bugfix);
        assert_eq!(metadata.searchable_text, "fix auth bug auth");
    }

    #[tokio::test]
    async fn test_label_synthesized_when_absent() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let store = open_store(&dir);

        let id = store
            .create(
                CheckpointRequest::new(CheckpointLevel::AgentExecution)
                    .with_agent_type("builder"),
            )
            .await
            .unwrap_or_else(|error| panic!("create: {error}"));

        let metadata = store
            .get(&id)
            .await
            .unwrap_or_else(|error| panic!("get: {error}"));
        assert!(metadata.label.starts_with("agent_execution_builder_"));
        assert_eq!(metadata.external_state.agent.as_deref(), Some("builder"));
    }

    #[tokio::test]
    async fn test_disabled_store_rejects_create() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let config = CheckpointConfig {
            enabled: false,
            ..CheckpointConfig::default()
        };
        let store = CheckpointStore::open(dir.path(), config)
            .unwrap_or_else(|error| panic!("open store: {error}"));

        let result = store.create(CheckpointRequest::new(CheckpointLevel::Manual)).await;
        assert!(matches!(result, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_get_unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let store = open_store(&dir);

        let result = store.get(&CheckpointId::new("cp-0-000000")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let store = open_store(&dir);

        let id = store
            .create(CheckpointRequest::new(CheckpointLevel::Manual).with_label("a"))
            .await
            .unwrap_or_else(|error| panic!("create: {error}"));

        store.delete(&id).await.unwrap_or_else(|error| panic!("delete: {error}"));
        // Second delete of the same id is a no-op.
        store.delete(&id).await.unwrap_or_else(|error| panic!("redelete: {error}"));
        assert!(store.get(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_auto_categorize_disabled_yields_unknown() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let config = CheckpointConfig {
            auto_categorize: false,
            ..CheckpointConfig::default()
        };
        let store = CheckpointStore::open(dir.path(), config)
            .unwrap_or_else(|error| panic!("open store: {error}"));

        let id = store
            .create(CheckpointRequest::new(CheckpointLevel::Manual).with_label("fix bug"))
            .await
            .unwrap_or_else(|error| panic!("create: {error}"));
        let metadata = store
            .get(&id)
            .await
            .unwrap_or_else(|error| panic!("get: {error}"));
        assert_eq!(metadata.category, CheckpointCategory::Unknown);
    }

    #[tokio::test]
    async fn test_index_rebuild_after_index_loss() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let id = {
            let store = open_store(&dir);
            store
                .create(CheckpointRequest::new(CheckpointLevel::Manual).with_label("keep me"))
                .await
                .unwrap_or_else(|error| panic!("create: {error}"))
        };

        fs::remove_file(dir.path().join(".waypoint").join(INDEX_FILE))
            .unwrap_or_else(|error| panic!("remove index: {error}"));

        let store = open_store(&dir);
        let metadata = store
            .get(&id)
            .await
            .unwrap_or_else(|error| panic!("get after rebuild: {error}"));
        assert_eq!(metadata.label, "keep me");
    }

    #[tokio::test]
    async fn test_parent_child_link() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("temp dir: {error}"));
        let store = open_store(&dir);

        let parent = store
            .create(CheckpointRequest::new(CheckpointLevel::Manual).with_label("parent"))
            .await
            .unwrap_or_else(|error| panic!("create parent: {error}"));
        let child = store
            .create(
                CheckpointRequest::new(CheckpointLevel::Manual)
                    .with_label("child")
                    .with_parent(parent.clone()),
            )
            .await
            .unwrap_or_else(|error| panic!("create child: {error}"));

        let parent_meta = store
            .get(&parent)
            .await
            .unwrap_or_else(|error| panic!("get parent: {error}"));
        assert_eq!(parent_meta.relationships.children, vec![child.clone()]);

        let child_meta = store
            .get(&child)
            .await
            .unwrap_or_else(|error| panic!("get child: {error}"));
        assert_eq!(child_meta.relationships.parent, Some(parent));
    }
}

//! Workspace snapshot capture and restore.
//!
//! Snapshots are stored as gzip-compressed JSON maps of workspace-relative
//! path to file content. Capture walks the workspace with gitignore
//! semantics and skips the store directory itself; binary files and files
//! over the configured size cap are left out of the archive.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read as _, Write as _};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use waypoint_core::{Error, FileManifest, Result};

/// Captured file contents keyed by workspace-relative path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotArchive {
    /// path → content.
    pub files: BTreeMap<String, String>,
}

impl SnapshotArchive {
    /// Manifest describing this archive.
    pub fn manifest(&self) -> FileManifest {
        FileManifest {
            file_count: self.files.len(),
            total_bytes: self.files.values().map(|content| content.len() as u64).sum(),
            files: self.files.keys().cloned().collect(),
        }
    }
}

/// Walks the workspace and captures every eligible file.
pub fn capture_workspace(
    workspace_root: &Path,
    store_root: &Path,
    max_file_bytes: u64,
) -> Result<SnapshotArchive> {
    let mut archive = SnapshotArchive::default();

    for entry in WalkBuilder::new(workspace_root).hidden(false).build() {
        let entry = entry.map_err(|error| Error::Storage(error.to_string()))?;
        let path = entry.path();

        if path.starts_with(store_root) || path.components().any(|part| part.as_os_str() == ".git")
        {
            continue;
        }
        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
            continue;
        }

        let metadata = entry.metadata().map_err(|error| Error::Storage(error.to_string()))?;
        if metadata.len() > max_file_bytes {
            debug!(path = %path.display(), "skipping oversized file in snapshot");
            continue;
        }

        let Ok(content) = fs::read_to_string(path) else {
            // Non-UTF-8 content is not captured.
            debug!(path = %path.display(), "skipping binary file in snapshot");
            continue;
        };

        let relative = path
            .strip_prefix(workspace_root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        archive.files.insert(relative, content);
    }

    Ok(archive)
}

/// Writes an archive as gzip-compressed JSON.
pub fn write_archive(path: &Path, archive: &SnapshotArchive) -> Result<()> {
    let json = serde_json::to_string(archive)?;
    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::fast());
    encoder.write_all(json.as_bytes())?;
    encoder.finish()?;
    Ok(())
}

/// Reads a gzip-compressed archive back.
pub fn read_archive(path: &Path) -> Result<SnapshotArchive> {
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut json = String::new();
    decoder.read_to_string(&mut json)?;
    Ok(serde_json::from_str(&json)?)
}

/// Writes archived files back into the workspace, creating parent
/// directories as needed. Returns the number of files written; on error
/// the count written so far is reported alongside the failure.
pub fn restore_archive(
    archive: &SnapshotArchive,
    workspace_root: &Path,
) -> (usize, Option<Error>) {
    let mut restored = 0;
    for (relative, content) in &archive.files {
        let target = workspace_root.join(relative);
        if let Some(parent) = target.parent() {
            if let Err(error) = fs::create_dir_all(parent) {
                return (restored, Some(error.into()));
            }
        }
        if let Err(error) = fs::write(&target, content) {
            return (restored, Some(error.into()));
        }
        restored += 1;
    }
    (restored, None)
}

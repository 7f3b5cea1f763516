//! Persistence for merge queues in `<state_dir>/queue/<owner>/<name>.json`.

use super::MergeQueue;
use crate::error::{Error, Result};
use crate::types::{QueueEntry, RepoId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tempfile::NamedTempFile;
use tracing::debug;

/// Current on-disk format version.
pub const QUEUE_FORMAT_VERSION: u32 = 1;

/// Legacy format with `pull_request` / `pr_head_sha` / `auto_head_sha` keys.
const LEGACY_FORMAT_VERSION: u32 = 0;

/// Directory name for queue records within the state dir.
const QUEUE_DIR: &str = "queue";

#[derive(Serialize, Deserialize)]
struct QueueRecord<E> {
    version: u32,
    auto_merge: QueueBody<E>,
}

#[derive(Serialize, Deserialize)]
struct QueueBody<E> {
    queue: Vec<E>,
    // Serialized as an explicit `null` when nothing is under test.
    current_active: Option<E>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

#[derive(Deserialize)]
struct LegacyEntry {
    pull_request: u64,
    pr_head_sha: String,
    auto_head_sha: Option<String>,
}

impl From<LegacyEntry> for QueueEntry {
    fn from(e: LegacyEntry) -> Self {
        Self {
            change_id: e.pull_request,
            approved_head: e.pr_head_sha,
            test_tip: e.auto_head_sha,
        }
    }
}

/// File-backed store holding one record per repository.
///
/// Reads and writes for one repository are serialized by a per-repository
/// read/write lock, independent of the in-process queue lock.
pub struct QueueStore {
    root: PathBuf,
    locks: Mutex<HashMap<RepoId, Arc<RwLock<()>>>>,
}

impl QueueStore {
    /// Open (and create if needed) the queue directory under `state_dir`.
    pub fn open(state_dir: &Path) -> Result<Self> {
        let root = state_dir.join(QUEUE_DIR);
        fs::create_dir_all(&root)
            .map_err(|e| Error::Storage(format!("failed to create {}: {e}", root.display())))?;
        let root = fs::canonicalize(&root).unwrap_or(root);

        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Root directory holding all records
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check that owner and name are safe single path components.
    pub fn validate(repo: &RepoId) -> Result<()> {
        for part in [&repo.owner, &repo.name] {
            if !is_safe_component(part) {
                return Err(Error::InvalidRepository(format!(
                    "`{part}` in {repo} is not a valid path component"
                )));
            }
        }
        Ok(())
    }

    /// Path of the record for `repo`.
    pub fn record_path(&self, repo: &RepoId) -> Result<PathBuf> {
        Self::validate(repo)?;
        Ok(self
            .root
            .join(&repo.owner)
            .join(format!("{}.json", repo.name)))
    }

    fn file_lock(&self, repo: &RepoId) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(repo.clone()).or_default())
    }

    /// Load the raw record bytes, `None` if no record exists.
    pub fn load_raw(&self, repo: &RepoId) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(repo)?;
        let lock = self.file_lock(repo);
        let _read = lock.read().unwrap_or_else(PoisonError::into_inner);

        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Load the queue for `repo`.
    ///
    /// A missing record is not an error: it means the queue is empty.
    pub fn load(&self, repo: &RepoId) -> Result<Option<MergeQueue>> {
        let Some(bytes) = self.load_raw(repo)? else {
            return Ok(None);
        };
        decode(&bytes).map(Some)
    }

    /// Replace the record for `repo` with `queue`.
    ///
    /// The snapshot is written to a temp file in the same directory, synced,
    /// then renamed over the record, so a crash leaves either the old or the
    /// new record and never a torn one.
    pub fn save(&self, repo: &RepoId, queue: &MergeQueue) -> Result<()> {
        let path = self.record_path(repo)?;
        let dir = self.root.join(&repo.owner);
        let bytes = encode(queue)?;

        let lock = self.file_lock(repo);
        let _write = lock.write().unwrap_or_else(PoisonError::into_inner);

        fs::create_dir_all(&dir)
            .map_err(|e| Error::Storage(format!("failed to create {}: {e}", dir.display())))?;

        let mut tmp = NamedTempFile::new_in(&dir)
            .map_err(|e| Error::Storage(format!("failed to create temp file: {e}")))?;
        tmp.write_all(&bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| Error::Storage(format!("failed to write temp file: {e}")))?;
        tmp.persist(&path)
            .map_err(|e| Error::Storage(format!("failed to write {}: {e}", path.display())))?;

        #[cfg(unix)]
        if let Ok(d) = fs::File::open(&dir) {
            let _ = d.sync_all();
        }

        debug!(%repo, path = %path.display(), "saved queue record");
        Ok(())
    }
}

fn is_safe_component(part: &str) -> bool {
    !part.is_empty()
        && part != "."
        && part != ".."
        && !part.contains(['/', '\\', '\0'])
}

/// Serialize a queue into the current record format.
fn encode(queue: &MergeQueue) -> Result<Vec<u8>> {
    let record = QueueRecord {
        version: QUEUE_FORMAT_VERSION,
        auto_merge: QueueBody {
            queue: queue.pending().cloned().collect(),
            current_active: queue.active().cloned(),
        },
    };
    Ok(serde_json::to_vec_pretty(&record)?)
}

/// Parse a record, migrating the legacy format and rejecting unknown versions.
fn decode(bytes: &[u8]) -> Result<MergeQueue> {
    let probe: VersionProbe = serde_json::from_slice(bytes)
        .map_err(|e| Error::Storage(format!("failed to parse queue record: {e}")))?;

    let (pending, active) = match probe.version {
        QUEUE_FORMAT_VERSION => {
            let record: QueueRecord<QueueEntry> = serde_json::from_slice(bytes)
                .map_err(|e| Error::Storage(format!("failed to parse queue record: {e}")))?;
            (record.auto_merge.queue, record.auto_merge.current_active)
        }
        LEGACY_FORMAT_VERSION => {
            let record: QueueRecord<LegacyEntry> = serde_json::from_slice(bytes)
                .map_err(|e| Error::Storage(format!("failed to parse legacy queue record: {e}")))?;
            (
                record.auto_merge.queue.into_iter().map(Into::into).collect(),
                record.auto_merge.current_active.map(Into::into),
            )
        }
        other => return Err(Error::UnsupportedFormat(other)),
    };

    MergeQueue::from_parts(pending, active)
}

//! Process-wide map from repository to its queue handle

use super::{MergeQueue, QueueStore};
use crate::error::Result;
use crate::types::RepoId;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::{debug, error};

/// Registry of per-repository queue handles.
///
/// The map lock is only held to create or fetch a handle; queue work happens
/// under the handle's own lock, so repositories never contend with each other.
pub struct QueueRegistry {
    store: Arc<QueueStore>,
    handles: Mutex<HashMap<RepoId, Arc<QueueHandle>>>,
}

impl QueueRegistry {
    /// Create a registry persisting through `store`
    pub fn new(store: QueueStore) -> Self {
        Self {
            store: Arc::new(store),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// The backing store
    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    /// Get the handle for `repo`, creating it on first access.
    ///
    /// Fails if the repository identity is not a safe storage key.
    pub fn handle(&self, repo: &RepoId) -> Result<Arc<QueueHandle>> {
        QueueStore::validate(repo)?;

        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = handles.entry(repo.clone()).or_insert_with(|| {
            debug!(%repo, "creating queue handle");
            Arc::new(QueueHandle {
                repo: repo.clone(),
                store: Arc::clone(&self.store),
                slot: AsyncMutex::new(Slot::default()),
            })
        });
        Ok(Arc::clone(handle))
    }

    /// Number of repositories seen so far
    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no repository has been seen yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct Slot {
    queue: MergeQueue,
    loaded: bool,
}

/// Mutual-exclusion handle for one repository's queue.
///
/// The queue is loaded from the store on first lock and kept in memory
/// afterwards, so a failed save does not lose the current state.
pub struct QueueHandle {
    repo: RepoId,
    store: Arc<QueueStore>,
    slot: AsyncMutex<Slot>,
}

impl QueueHandle {
    /// Repository this handle guards
    pub const fn repo(&self) -> &RepoId {
        &self.repo
    }

    /// Acquire the handle, loading the queue on first use.
    ///
    /// The returned guard keeps the handle locked until dropped, so the whole
    /// read-modify-write-persist sequence is linearizable per repository.
    pub async fn lock(&self) -> Result<QueueGuard<'_>> {
        let mut slot = self.slot.lock().await;
        if !slot.loaded {
            slot.queue = self.store.load(&self.repo)?.unwrap_or_default();
            slot.loaded = true;
        }
        Ok(QueueGuard { slot, handle: self })
    }
}

/// Exclusive access to a loaded queue.
///
/// Dereferences to [`MergeQueue`]; call [`QueueGuard::save`] after mutating.
pub struct QueueGuard<'a> {
    slot: MutexGuard<'a, Slot>,
    handle: &'a QueueHandle,
}

impl QueueGuard<'_> {
    /// Repository the guarded queue belongs to
    pub const fn repo(&self) -> &RepoId {
        &self.handle.repo
    }

    /// Persist the current queue.
    ///
    /// On failure the in-memory queue stays as is; the caller decides
    /// whether to retry.
    pub fn save(&self) -> Result<()> {
        self.handle
            .store
            .save(&self.handle.repo, &self.slot.queue)
            .inspect_err(|e| error!(repo = %self.handle.repo, "failed to persist queue: {e}"))
    }
}

impl Deref for QueueGuard<'_> {
    type Target = MergeQueue;

    fn deref(&self) -> &MergeQueue {
        &self.slot.queue
    }
}

impl DerefMut for QueueGuard<'_> {
    fn deref_mut(&mut self) -> &mut MergeQueue {
        &mut self.slot.queue
    }
}

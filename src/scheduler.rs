//! Cross-workspace scheduling: two counting semaphores plus a
//! non-reentrancy guard, coordinating scan/embed phases across workspaces.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Per-workspace lifecycle state during a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    Scan,
    Embed,
    Save,
    Done,
}

/// Coordinates scan and embed concurrency across workspaces.
///
/// `scan_slots` bounds how many workspaces may be scanning/chunking/cache-
/// probing at once; `embed_mutex` (effectively a single permit by default)
/// globally serialises embedding calls and VectorStore writes across every
/// workspace.
pub struct Scheduler {
    scan_slots: Arc<Semaphore>,
    embed_mutex: Arc<Semaphore>,
    active_set: Mutex<HashSet<PathBuf>>,
}

impl Scheduler {
    pub fn new(scan_slots: usize, embed_permits: usize) -> Arc<Self> {
        Arc::new(Self {
            scan_slots: Arc::new(Semaphore::new(scan_slots.max(1))),
            embed_mutex: Arc::new(Semaphore::new(embed_permits.max(1))),
            active_set: Mutex::new(HashSet::new()),
        })
    }

    /// Enter the scan phase for `workspace`: registers it in the
    /// non-reentrancy guard and acquires a scan slot.
    ///
    /// Returns `Error::AlreadyIndexing` if the workspace is already active.
    pub async fn enter(self: &Arc<Self>, workspace: &Path) -> Result<WorkspaceGuard> {
        {
            let mut active = self.active_set.lock();
            if !active.insert(workspace.to_path_buf()) {
                return Err(Error::AlreadyIndexing {
                    path: workspace.to_path_buf(),
                });
            }
        }

        let scan_permit = Arc::clone(&self.scan_slots)
            .acquire_owned()
            .await
            .map_err(|e| Error::RetrieveFailed(format!("scan semaphore closed: {e}")))?;

        Ok(WorkspaceGuard {
            scheduler: Arc::clone(self),
            workspace: workspace.to_path_buf(),
            state: WorkspaceState::Scan,
            scan_permit: Some(scan_permit),
            embed_permit: None,
        })
    }

    pub fn is_active(&self, workspace: &Path) -> bool {
        self.active_set.lock().contains(workspace)
    }

    pub fn active_count(&self) -> usize {
        self.active_set.lock().len()
    }
}

/// RAII guard for a single workspace's place in the scheduler: holds a scan
/// slot during the scan phase, upgrades to the embed mutex during embed,
/// releases everything (including the non-reentrancy membership) on drop.
pub struct WorkspaceGuard {
    scheduler: Arc<Scheduler>,
    workspace: PathBuf,
    state: WorkspaceState,
    scan_permit: Option<OwnedSemaphorePermit>,
    embed_permit: Option<OwnedSemaphorePermit>,
}

impl WorkspaceGuard {
    pub fn state(&self) -> WorkspaceState {
        self.state
    }

    /// Release the scan slot and acquire the embed mutex. Observation point
    /// for cancellation per spec §4.6 is the caller's responsibility (check
    /// the token immediately before calling this).
    pub async fn begin_embed(&mut self) -> Result<()> {
        self.scan_permit = None;
        let permit = Arc::clone(&self.scheduler.embed_mutex)
            .acquire_owned()
            .await
            .map_err(|e| Error::RetrieveFailed(format!("embed semaphore closed: {e}")))?;
        self.embed_permit = Some(permit);
        self.state = WorkspaceState::Embed;
        Ok(())
    }

    /// Mark the save phase: embed mutex stays held until drop (VectorStore
    /// writes happen under the same permit as the embedding calls, per the
    /// spec's "embed phase holds embed_mutex during ... VectorStore writes").
    pub fn begin_save(&mut self) {
        self.state = WorkspaceState::Save;
    }

    pub fn finish(mut self) {
        self.state = WorkspaceState::Done;
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        self.scheduler.active_set.lock().remove(&self.workspace);
    }
}

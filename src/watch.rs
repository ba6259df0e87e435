//! Watches a workspace for filesystem changes and drives incremental
//! refreshes through an `IndexOrchestrator`.
//!
//! Debounces raw filesystem events (`notify_debouncer_full`) into batches
//! of touched relative paths and hands each batch to
//! `IndexOrchestrator::on_files_changed` — the digest tree's `update()`
//! already tells the orchestrator whether a touched path was added,
//! modified, or deleted, so this module only needs to classify and batch.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_full::notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify_debouncer_full::notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::orchestrator::IndexOrchestrator;

/// A filesystem event relevant to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

impl FileEvent {
    /// Relative path(s) this event touches, for batching into a single
    /// `on_files_changed` call.
    fn touched_paths(&self) -> Vec<PathBuf> {
        match self {
            FileEvent::Created(p) | FileEvent::Modified(p) | FileEvent::Deleted(p) => vec![p.clone()],
            FileEvent::Renamed { from, to } => vec![from.clone(), to.clone()],
        }
    }
}

/// Watches a workspace's configured directory tree for file changes and
/// triggers `IndexOrchestrator::on_files_changed`.
pub struct Watcher {
    config: Config,
    workspace: PathBuf,
    orchestrator: Arc<IndexOrchestrator>,
}

impl Watcher {
    pub fn new(config: Config, workspace: &Path, orchestrator: Arc<IndexOrchestrator>) -> Self {
        Self {
            config,
            workspace: workspace.to_path_buf(),
            orchestrator,
        }
    }

    /// Start watching the workspace for changes.
    ///
    /// Blocks until `cancel` fires. Events are debounced by
    /// `config.watch_debounce_ms`, then each debounce tick's events are
    /// drained into one batch and applied as a single incremental refresh.
    pub async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<FileEvent>();

        let debounce_duration = Duration::from_millis(self.config.watch_debounce_ms);
        let workspace = self.workspace.clone();
        let include_extensions = self.config.include_extensions.clone();

        let mut debouncer = new_debouncer(debounce_duration, None, move |result: DebounceEventResult| {
            let events = match result {
                Ok(events) => events,
                Err(errs) => {
                    for e in errs {
                        error!("debouncer error: {e}");
                    }
                    return;
                }
            };

            for event in events {
                let file_events = classify_event(&event.event.kind, &event.paths, &workspace, &include_extensions);
                for fe in file_events {
                    if tx.send(fe).is_err() {
                        debug!("watcher channel closed, stopping event forwarding");
                        return;
                    }
                }
            }
        })
        .map_err(|e| Error::Io(std::io::Error::other(format!("failed to create debouncer: {e}"))))?;

        debouncer
            .watch(&self.workspace, RecursiveMode::Recursive)
            .map_err(|e| Error::Io(std::io::Error::other(format!("failed to watch {}: {e}", self.workspace.display()))))?;

        info!(workspace = %self.workspace.display(), debounce_ms = self.config.watch_debounce_ms, "file watcher started");

        loop {
            tokio::select! {
                Some(first) = rx.recv() => {
                    let mut touched: HashSet<PathBuf> = first.touched_paths().into_iter().collect();
                    while let Ok(more) = rx.try_recv() {
                        touched.extend(more.touched_paths());
                    }
                    let touched: Vec<PathBuf> = touched.into_iter().collect();
                    debug!(count = touched.len(), "applying incremental refresh for watched changes");
                    if let Err(e) = self.orchestrator.on_files_changed(&self.workspace, &touched).await {
                        warn!(error = %e, "incremental refresh failed");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("file watcher shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Classify a notify event into zero or more `FileEvent` values, filtering
/// out paths that fall outside `include_extensions`.
fn classify_event(
    kind: &EventKind,
    paths: &[PathBuf],
    workspace: &Path,
    include_extensions: &[String],
) -> Vec<FileEvent> {
    let mut result = Vec::new();

    let is_indexable_ext = |rel: &Path| -> bool {
        include_extensions.is_empty()
            || rel
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| include_extensions.iter().any(|allowed| allowed.trim_start_matches('.') == ext))
                .unwrap_or(false)
    };

    let to_relative = |abs: &Path| -> Option<PathBuf> {
        let rel = abs.strip_prefix(workspace).ok()?;
        if is_indexable_ext(rel) {
            Some(rel.to_path_buf())
        } else {
            None
        }
    };

    match kind {
        EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => {
            for path in paths {
                if let Some(rel) = to_relative(path) {
                    result.push(FileEvent::Created(rel));
                }
            }
        }
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) | EventKind::Modify(ModifyKind::Other) => {
            for path in paths {
                if let Some(rel) = to_relative(path) {
                    result.push(FileEvent::Modified(rel));
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if paths.len() >= 2 {
                let from_rel = paths[0].strip_prefix(workspace).ok().map(Path::to_path_buf);
                let to_rel = to_relative(&paths[1]);
                match (from_rel, to_rel) {
                    (Some(from), Some(to)) => result.push(FileEvent::Renamed { from, to }),
                    (Some(from), None) => {
                        if is_indexable_ext(&from) {
                            result.push(FileEvent::Deleted(from));
                        }
                    }
                    (None, Some(to)) => result.push(FileEvent::Created(to)),
                    _ => {}
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in paths {
                if let Ok(rel) = path.strip_prefix(workspace) {
                    if is_indexable_ext(rel) {
                        result.push(FileEvent::Deleted(rel.to_path_buf()));
                    }
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in paths {
                if let Some(rel) = to_relative(path) {
                    result.push(FileEvent::Created(rel));
                }
            }
        }
        EventKind::Remove(RemoveKind::File) | EventKind::Remove(RemoveKind::Any) => {
            for path in paths {
                if let Ok(rel) = path.strip_prefix(workspace) {
                    if is_indexable_ext(rel) {
                        result.push(FileEvent::Deleted(rel.to_path_buf()));
                    }
                }
            }
        }
        _ => {}
    }

    result
}

//! WorkerHost: runs indexing work in an isolated child process, talking
//! newline-delimited JSON over its stdin/stdout: one JSON object per line,
//! a `request_id` field correlating replies to requests. A background task
//! demultiplexes replies onto pending requests by `request_id`, and
//! unsolicited `progress` messages are routed to a caller-supplied callback
//! instead of being written back to a reply stream.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A request sent to the worker subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub request_id: u64,
    pub workspace: PathBuf,
    pub op: WorkerOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerOp {
    Index,
    OnFilesChanged { paths: Vec<PathBuf> },
    Cancel,
}

/// A message read back from the worker subprocess: either a terminal
/// result for some `request_id`, or an unsolicited progress update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Progress {
        request_id: u64,
        progress: f32,
        description: String,
        current_file: Option<PathBuf>,
    },
    Result {
        request_id: u64,
        ok: bool,
        error: Option<String>,
    },
}

/// Progress callback invoked as the worker reports `Progress` messages.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: f32, description: &str, current_file: Option<&std::path::Path>);
}

impl<F: Fn(f32, &str, Option<&std::path::Path>) + Send + Sync> ProgressSink for F {
    fn on_progress(&self, progress: f32, description: &str, current_file: Option<&std::path::Path>) {
        self(progress, description, current_file)
    }
}

struct PendingRequest {
    reply_tx: oneshot::Sender<Result<()>>,
    progress: Option<Arc<dyn ProgressSink>>,
}

/// Spawns and supervises one worker subprocess, demultiplexing concurrent
/// requests by `request_id`. Restarted lazily on the next call after a
/// crash is observed.
pub struct WorkerHost {
    command: PathBuf,
    args: Vec<String>,
    next_id: AtomicU64,
    inner: tokio::sync::Mutex<Option<WorkerProcess>>,
    cancelled_workspaces: Mutex<std::collections::HashSet<PathBuf>>,
}

struct WorkerProcess {
    child: Child,
    writer: FramedWrite<tokio::process::ChildStdin, LinesCodec>,
    pending: Arc<Mutex<HashMap<u64, PendingRequest>>>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl WorkerHost {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            next_id: AtomicU64::new(1),
            inner: tokio::sync::Mutex::new(None),
            cancelled_workspaces: Mutex::new(std::collections::HashSet::new()),
        }
    }

    async fn spawn(&self) -> Result<WorkerProcess> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::WorkerCrashed(format!("failed to spawn worker: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::WorkerCrashed("worker stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::WorkerCrashed("worker stdout not piped".into()))?;

        let writer = FramedWrite::new(stdin, LinesCodec::new());
        let mut reader = FramedRead::new(stdout, LinesCodec::new());

        let pending: Arc<Mutex<HashMap<u64, PendingRequest>>> = Arc::new(Mutex::new(HashMap::new()));
        let pending_for_task = Arc::clone(&pending);

        let reader_task = tokio::spawn(async move {
            while let Some(line) = reader.next().await {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        warn!(error = %e, "worker stdout line decode error");
                        continue;
                    }
                };

                let message: WorkerMessage = match serde_json::from_str(&line) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, line = %line, "worker emitted malformed JSON");
                        continue;
                    }
                };

                match message {
                    WorkerMessage::Progress {
                        request_id,
                        progress,
                        description,
                        current_file,
                    } => {
                        let sink = pending_for_task.lock().get(&request_id).and_then(|p| p.progress.clone());
                        if let Some(sink) = sink {
                            sink.on_progress(progress, &description, current_file.as_deref());
                        }
                    }
                    WorkerMessage::Result { request_id, ok, error } => {
                        let pending_req = pending_for_task.lock().remove(&request_id);
                        if let Some(pending_req) = pending_req {
                            let result = if ok {
                                Ok(())
                            } else {
                                Err(Error::WorkerCrashed(error.unwrap_or_else(|| "worker reported failure".into())))
                            };
                            let _ = pending_req.reply_tx.send(result);
                        }
                    }
                }
            }

            // stdout closed: fail every still-pending request as a crash.
            let remaining: Vec<PendingRequest> = pending_for_task.lock().drain().map(|(_, v)| v).collect();
            for pending_req in remaining {
                let _ = pending_req.reply_tx.send(Err(Error::WorkerCrashed("worker process exited".into())));
            }
        });

        Ok(WorkerProcess {
            child,
            writer,
            pending,
            reader_task,
        })
    }

    async fn ensure_running(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if let Some(process) = guard.as_mut() {
            if let Ok(Some(status)) = process.child.try_wait() {
                warn!(status = %status, "worker process exited, restarting on next call");
                *guard = None;
            } else {
                return Ok(());
            }
        }
        *guard = Some(self.spawn().await?);
        Ok(())
    }

    async fn send(&self, op: WorkerOp, workspace: PathBuf, progress: Option<Arc<dyn ProgressSink>>) -> Result<()> {
        self.ensure_running().await?;

        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = WorkerRequest { request_id, workspace, op };
        let payload = serde_json::to_string(&request).map_err(|e| Error::Serialization(e.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();

        let mut guard = self.inner.lock().await;
        let process = guard.as_mut().ok_or_else(|| Error::WorkerCrashed("worker not running".into()))?;
        process.pending.lock().insert(request_id, PendingRequest { reply_tx, progress });

        if let Err(e) = process.writer.send(payload).await {
            process.pending.lock().remove(&request_id);
            *guard = None;
            return Err(Error::WorkerCrashed(format!("failed to write to worker stdin: {e}")));
        }
        drop(guard);

        debug!(request_id, "worker request dispatched");
        reply_rx.await.map_err(|_| Error::WorkerCrashed("worker reply channel closed".into()))?
    }

    /// Run a full index refresh in the worker.
    pub async fn index(&self, workspace: PathBuf, progress: Option<Arc<dyn ProgressSink>>) -> Result<()> {
        self.send(WorkerOp::Index, workspace, progress).await
    }

    /// Run an incremental refresh in the worker.
    pub async fn on_files_changed(&self, workspace: PathBuf, paths: Vec<PathBuf>) -> Result<()> {
        self.send(WorkerOp::OnFilesChanged { paths }, workspace, None).await
    }

    /// Request cancellation of the single outstanding operation for
    /// `workspace`. At most one cancellation may be outstanding per
    /// workspace at a time; a second call before the first completes is a
    /// no-op.
    pub async fn cancel(&self, workspace: PathBuf) -> Result<()> {
        {
            let mut cancelled = self.cancelled_workspaces.lock();
            if !cancelled.insert(workspace.clone()) {
                return Ok(());
            }
        }

        let result = self.send(WorkerOp::Cancel, workspace.clone(), None).await;
        self.cancelled_workspaces.lock().remove(&workspace);
        result
    }

    /// Terminate the worker subprocess, if running.
    pub async fn shutdown(&self) {
        if let Some(mut process) = self.inner.lock().await.take() {
            process.reader_task.abort();
            let _ = process.child.kill().await;
        }
    }
}

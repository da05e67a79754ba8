//! Task registry — append-only task list + known servers behind one lock,
//! with broadcast fan-out to WebSocket clients.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::{Instrument, debug, info, warn};

use crate::backend::{ComputeBackend, StatusEvent};
use crate::config::Config;
use crate::error::{DownloadError, SubmitError};

use super::model::{
    DESC_DOWNLOAD_FAILED, DESC_RESULT_OK, Server, StatusArtifact, Task, TaskSnapshot, TaskStatus,
    TASK_DATA_DIR, TASK_RESULT_FILE, TASK_STATUS_FILE, WsMessage, validate_task_id,
};

/// Result of folding a status event into a task record.
pub struct AppliedStatus {
    /// The task's state after the update.
    pub snapshot: TaskSnapshot,
    /// True when this event moved the task into [`TaskStatus::Succeeded`],
    /// i.e. exactly the transitions that trigger a completion handler.
    pub newly_succeeded: bool,
}

struct RegistryState {
    tasks: Vec<Task>,
    servers: Vec<Server>,
    /// Ids reserved by in-flight submissions whose status artifact is still
    /// being written. Keeps concurrent duplicate submits from racing the
    /// artifact write.
    pending: Vec<String>,
}

/// In-memory registry of tasks and servers.
///
/// The task list is append-only and never reordered; per-task fields are
/// mutated in place by the notification loop and completion handlers, always
/// under the registry lock. No I/O runs while the lock is held.
pub struct TaskRegistry {
    state: RwLock<RegistryState>,
    tx: broadcast::Sender<WsMessage>,
    backend: Arc<dyn ComputeBackend>,
    data_dir: PathBuf,
    url_prefix: String,
}

impl TaskRegistry {
    /// Create a new registry.
    pub fn new(config: &Config, backend: Arc<dyn ComputeBackend>) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(config.broadcast_capacity);
        Arc::new(Self {
            state: RwLock::new(RegistryState {
                tasks: Vec::new(),
                servers: Vec::new(),
                pending: Vec::new(),
            }),
            tx,
            backend,
            data_dir: config.data_dir.clone(),
            url_prefix: config.url_prefix.clone(),
        })
    }

    /// Subscribe to task events. Each WS client calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<WsMessage> {
        self.tx.subscribe()
    }

    /// Point-in-time snapshots of all tasks, in submission order.
    pub async fn tasks(&self) -> Vec<TaskSnapshot> {
        let state = self.state.read().await;
        state
            .tasks
            .iter()
            .map(|t| t.snapshot(&self.url_prefix))
            .collect()
    }

    /// Point-in-time snapshots of all known servers.
    pub async fn servers(&self) -> Vec<Server> {
        self.state.read().await.servers.clone()
    }

    /// Where the result artifact for `task_id` is stored locally.
    pub fn result_file(&self, task_id: &str) -> PathBuf {
        self.data_dir
            .join(TASK_DATA_DIR)
            .join(task_id)
            .join(TASK_RESULT_FILE)
    }

    /// Register a brand-new task and hand it to the backend.
    ///
    /// Validates the identifier, rejects duplicates, and persists the initial
    /// status artifact before the task becomes visible; an I/O failure means
    /// the task was not registered. On success the task is visible to
    /// [`tasks`](Self::tasks) before this returns, and the backend submission
    /// runs on a detached task.
    pub async fn submit(&self, id: &str) -> Result<TaskSnapshot, SubmitError> {
        validate_task_id(id)?;

        // Reserve the id before touching the filesystem: a losing duplicate
        // submit must never write (or clobber) the winner's artifact.
        {
            let mut state = self.state.write().await;
            let taken = state.tasks.iter().any(|t| t.id == id)
                || state.pending.iter().any(|p| p == id);
            if taken {
                return Err(SubmitError::Duplicate { id: id.to_string() });
            }
            state.pending.push(id.to_string());
        }

        let task = Task::new(id);
        let written = self.write_status_artifact(&task).await;

        let snapshot;
        {
            let mut state = self.state.write().await;
            state.pending.retain(|p| p != id);
            written?;
            snapshot = task.snapshot(&self.url_prefix);
            state.tasks.push(task);
        }

        info!(task_id = %id, "Task registered");
        let _ = self.tx.send(WsMessage::TaskCreated {
            task: snapshot.clone(),
        });

        self.dispatch_submission(&snapshot);

        Ok(snapshot)
    }

    /// Fold a backend status event into the matching task.
    ///
    /// Returns `None` when no task matches (benign race against registry
    /// population) or when the task is already terminal; neither mutates
    /// anything nor broadcasts. Otherwise updates status/description, records
    /// the worker (a non-empty worker is never overwritten by an empty one),
    /// and broadcasts the refreshed snapshot.
    pub async fn apply_status(&self, event: &StatusEvent) -> Option<AppliedStatus> {
        let new_status = TaskStatus::from_code(&event.code);

        let snapshot;
        let newly_succeeded;
        {
            let mut state = self.state.write().await;
            let RegistryState { tasks, servers, .. } = &mut *state;

            let Some(task) = tasks.iter_mut().find(|t| t.id == event.task_id) else {
                debug!(task_id = %event.task_id, "Status event for unknown task, dropped");
                return None;
            };

            if task.status.is_terminal() {
                debug!(
                    task_id = %task.id,
                    status = %task.status,
                    code = %event.code,
                    "Status event for terminal task, ignored"
                );
                return None;
            }

            task.status = new_status;
            task.desc = event.desc.clone();

            if let Some(worker) = event.worker.as_deref().filter(|w| !w.is_empty()) {
                task.server = worker.to_string();
                match servers.iter_mut().find(|s| s.id == worker) {
                    Some(server) => server.last_seen = chrono::Utc::now(),
                    None => {
                        info!(server = %worker, "New server observed");
                        servers.push(Server::new(worker));
                    }
                }
            }

            snapshot = task.snapshot(&self.url_prefix);
            newly_succeeded = task.status == TaskStatus::Succeeded;
        }

        info!(
            task_id = %snapshot.id,
            status = %snapshot.status,
            server = %snapshot.server,
            "Task status updated"
        );
        let _ = self.tx.send(WsMessage::TaskUpdated {
            task: snapshot.clone(),
        });

        Some(AppliedStatus {
            snapshot,
            newly_succeeded,
        })
    }

    /// Record the outcome of a completion handler's result download and
    /// broadcast the refreshed snapshot.
    pub async fn finish_download(
        &self,
        task_id: &str,
        outcome: Result<usize, DownloadError>,
    ) -> Option<TaskSnapshot> {
        let snapshot;
        {
            let mut state = self.state.write().await;
            let task = state.tasks.iter_mut().find(|t| t.id == task_id)?;

            task.desc = match &outcome {
                Ok(_) => DESC_RESULT_OK.to_string(),
                Err(e) => format!("{}: {}", DESC_DOWNLOAD_FAILED, e),
            };
            snapshot = task.snapshot(&self.url_prefix);
        }

        match outcome {
            Ok(bytes) => info!(task_id = %task_id, bytes, "Result stored"),
            Err(ref e) => warn!(task_id = %task_id, error = %e, "Result download failed"),
        }

        let _ = self.tx.send(WsMessage::TaskUpdated {
            task: snapshot.clone(),
        });

        Some(snapshot)
    }

    /// Persist the initial status snapshot for a new task.
    async fn write_status_artifact(&self, task: &Task) -> Result<(), std::io::Error> {
        let artifact = StatusArtifact {
            created_at: task.created_at,
            status: task.status.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&artifact)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let dir = self.data_dir.join(TASK_DATA_DIR).join(&task.id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(TASK_STATUS_FILE), bytes).await
    }

    /// Issue the backend submission on a detached task, carrying the task id
    /// in its span. The call's own result is only logged; the real outcome
    /// arrives later on the status channel.
    fn dispatch_submission(&self, snapshot: &TaskSnapshot) {
        let backend = Arc::clone(&self.backend);
        let task_id = snapshot.id.clone();
        let input_url = snapshot.data_url.clone();
        let param_url = snapshot.param_url.clone();

        let span = tracing::info_span!("backend_submit", task_id = %task_id);
        tokio::spawn(
            async move {
                if let Err(e) = backend.submit(&task_id, &input_url, &param_url).await {
                    warn!(error = %e, "Backend submission failed");
                }
            }
            .instrument(span),
        );
    }
}

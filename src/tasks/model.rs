//! Task data model — tasks, servers, status state machine, and WebSocket
//! message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SubmitError;

/// Directory holding per-task artifact subdirectories.
pub const TASK_DATA_DIR: &str = "tasks";
/// Fixed length of a task identifier (lowercase hex).
pub const TASK_ID_LEN: usize = 8;

pub const TASK_DATA_FILE: &str = "data.gz";
pub const TASK_PARAM_FILE: &str = "param.json";
pub const TASK_RESULT_FILE: &str = "result.gz";
pub const TASK_STATUS_FILE: &str = "status.json";

/// Outcome description once the result artifact was stored locally.
pub const DESC_RESULT_OK: &str = "OK";
/// Outcome description when the result artifact could not be retrieved.
pub const DESC_DOWNLOAD_FAILED: &str = "Download failed";

/// Symbolic task state.
///
/// Moves forward only: `New → Pending → Running → Succeeded | Failed |
/// Canceled`. Unrecognized backend codes are carried verbatim as `Other` —
/// their own descriptive state, never a crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Created locally, not yet picked up by the backend.
    New,
    /// Accepted by the backend, waiting for a worker.
    Pending,
    /// Being processed by a worker.
    Running,
    /// Finished successfully — terminal.
    Succeeded,
    /// Finished with an error — terminal.
    Failed,
    /// Canceled before completion — terminal.
    Canceled,
    /// Unrecognized backend code, passed through.
    Other(String),
}

impl TaskStatus {
    /// Map a backend status code to a state. Unknown codes become `Other`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "new" => Self::New,
            "pending" => Self::Pending,
            "running" => Self::Running,
            "done" => Self::Succeeded,
            "failed" => Self::Failed,
            "canceled" => Self::Canceled,
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire code for this state.
    pub fn as_code(&self) -> &str {
        match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "done",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Other(code) => code,
        }
    }

    /// Human-readable description of this state.
    pub fn description(&self) -> &str {
        match self {
            Self::New => "New",
            Self::Pending => "Waiting for a worker",
            Self::Running => "Running",
            Self::Succeeded => "Done",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
            Self::Other(code) => code,
        }
    }

    /// Whether no further transition is expected from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_code())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Self::from_code(&code))
    }
}

/// One submitted optimization job, tracked in the registry.
#[derive(Debug, Clone)]
pub struct Task {
    /// Opaque identifier, unique for the lifetime of the registry.
    pub id: String,
    /// Set once at submission, immutable thereafter.
    pub created_at: DateTime<Utc>,
    /// Mutated only by the notification loop.
    pub status: TaskStatus,
    /// Free-text detail accompanying the current status.
    pub desc: String,
    /// Worker that processed/is processing the task; empty until a status
    /// event reports a non-empty worker.
    pub server: String,
}

impl Task {
    /// Create a brand-new task record with status [`TaskStatus::New`].
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            status: TaskStatus::New,
            desc: String::new(),
            server: String::new(),
        }
    }

    // Derived locations — pure functions of identity under the fixed
    // directory convention, never stored as mutable fields.

    pub fn data_path(&self) -> String {
        format!("{}/{}/{}", TASK_DATA_DIR, self.id, TASK_DATA_FILE)
    }

    pub fn param_path(&self) -> String {
        format!("{}/{}/{}", TASK_DATA_DIR, self.id, TASK_PARAM_FILE)
    }

    pub fn result_path(&self) -> String {
        format!("{}/{}/{}", TASK_DATA_DIR, self.id, TASK_RESULT_FILE)
    }

    pub fn status_path(&self) -> String {
        format!("{}/{}/{}", TASK_DATA_DIR, self.id, TASK_STATUS_FILE)
    }

    /// Point-in-time serialized view of this task for clients.
    pub fn snapshot(&self, url_prefix: &str) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            created_at: self.created_at,
            status: self.status.clone(),
            status_desc: self.status.description().to_string(),
            desc: self.desc.clone(),
            server: self.server.clone(),
            data_url: format!("{}/{}", url_prefix, self.data_path()),
            param_url: format!("{}/{}", url_prefix, self.param_path()),
            result_url: format!("{}/{}", url_prefix, self.result_path()),
        }
    }
}

/// Serialized client view of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub status_desc: String,
    pub desc: String,
    pub server: String,
    pub data_url: String,
    pub param_url: String,
    pub result_url: String,
}

/// A known worker node. Added when first observed, never removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Server {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            first_seen: now,
            last_seen: now,
        }
    }
}

/// Best-effort status snapshot persisted at submission time.
///
/// Written once to the task's status path; not kept in sync with in-memory
/// updates afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusArtifact {
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
}

/// Messages broadcast to WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// A task was submitted.
    TaskCreated { task: TaskSnapshot },
    /// A task's state changed.
    TaskUpdated { task: TaskSnapshot },
    /// Full registry sync (sent on connect).
    TasksSync { tasks: Vec<TaskSnapshot> },
}

/// Validate a caller-supplied task identifier: fixed length, lowercase hex.
pub fn validate_task_id(id: &str) -> Result<(), SubmitError> {
    if id.len() != TASK_ID_LEN {
        return Err(SubmitError::InvalidId {
            id: id.to_string(),
            reason: format!("expected {} characters", TASK_ID_LEN),
        });
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(SubmitError::InvalidId {
            id: id.to_string(),
            reason: "expected lowercase hex".to_string(),
        });
    }
    Ok(())
}

/// Generate a fresh random task identifier.
pub fn generate_task_id() -> String {
    use rand::Rng;

    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..TASK_ID_LEN)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

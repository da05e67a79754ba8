//! Compute backend abstraction — submission seam, status events, result fetch.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, DownloadError};

pub use http::HttpBackend;

/// An asynchronous status update from the backend for one task.
///
/// Ephemeral: consumed once by the notification loop and folded into the
/// matching task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Identifier of the task this event refers to.
    pub task_id: String,
    /// Backend status code (see [`crate::tasks::model::TaskStatus::from_code`]).
    pub code: String,
    /// Free-text detail accompanying the status (e.g. failure reason).
    #[serde(default)]
    pub desc: String,
    /// Worker that processed/is processing the task, if the backend knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

/// The remote distributed optimization service.
///
/// `submit` is fire-and-forget from the registry's perspective: the eventual
/// outcome arrives later as [`StatusEvent`]s on the notification channel.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Submit a new task, identified by `task_id`, with absolute URLs for its
    /// input data and parameter artifacts.
    async fn submit(
        &self,
        task_id: &str,
        input_url: &str,
        param_url: &str,
    ) -> Result<(), BackendError>;
}

/// Retrieval of a finished task's result artifact by its derived URL.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Fetch the raw result bytes, or fail.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_deserializes_without_optional_fields() {
        let json = r#"{"task_id": "abcd1234", "code": "running"}"#;
        let event: StatusEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.task_id, "abcd1234");
        assert_eq!(event.code, "running");
        assert_eq!(event.desc, "");
        assert!(event.worker.is_none());
    }

    #[test]
    fn status_event_omits_empty_worker_on_serialize() {
        let event = StatusEvent {
            task_id: "abcd1234".into(),
            code: "done".into(),
            desc: "".into(),
            worker: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("worker"));
    }
}

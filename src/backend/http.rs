//! HTTP implementation of the compute backend collaborators.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::{BackendError, DownloadError};

use super::{ComputeBackend, ResultStore};

/// Header carrying the task identifier on backend requests, for correlating
/// asynchronous responses and logs.
pub const TASK_ID_HEADER: &str = "X-Task-Id";

/// Compute backend reached over HTTP. Submissions are POSTed to the
/// configured endpoint; result artifacts are fetched by their derived URL.
pub struct HttpBackend {
    client: reqwest::Client,
    submit_url: String,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    task_id: &'a str,
    input_url: &'a str,
    param_url: &'a str,
}

impl HttpBackend {
    pub fn new(submit_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            submit_url: submit_url.into(),
        }
    }
}

#[async_trait]
impl ComputeBackend for HttpBackend {
    async fn submit(
        &self,
        task_id: &str,
        input_url: &str,
        param_url: &str,
    ) -> Result<(), BackendError> {
        let body = SubmitRequest {
            task_id,
            input_url,
            param_url,
        };

        let response = self
            .client
            .post(&self.submit_url)
            .header(TASK_ID_HEADER, task_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let reason = format!("HTTP {}", response.status());
            return Err(BackendError::Rejected {
                task_id: task_id.to_string(),
                reason,
            });
        }

        debug!(task_id = %task_id, "Task submitted to backend");
        Ok(())
    }
}

#[async_trait]
impl ResultStore for HttpBackend {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DownloadError::Http(format!("HTTP {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DownloadError::Http(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}

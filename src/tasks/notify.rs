//! Status notification loop and completion handling.
//!
//! A single consumer folds backend status events into the registry; tasks
//! that reach terminal success get a detached completion handler that
//! downloads the result artifact and re-notifies clients.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::backend::{ResultStore, StatusEvent};
use crate::error::DownloadError;

use super::registry::TaskRegistry;

/// Run the notification loop until the event channel closes or `shutdown`
/// flips to `true`.
///
/// Events for a given task are applied strictly in arrival order. Completion
/// handlers run concurrently in a [`JoinSet`] and are drained before this
/// returns, so no download is leaked across shutdown.
pub async fn run_notify_loop(
    registry: Arc<TaskRegistry>,
    store: Arc<dyn ResultStore>,
    mut events: mpsc::Receiver<StatusEvent>,
    mut shutdown: watch::Receiver<bool>,
    download_timeout: Duration,
) {
    let mut downloads: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                // A dropped shutdown sender counts as shutdown.
                if changed.is_err() || *shutdown.borrow() {
                    info!("Notification loop shutting down");
                    break;
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    info!("Status channel closed, notification loop exiting");
                    break;
                };
                handle_event(&registry, &store, &mut downloads, event, download_timeout).await;
            }
            // Reap finished completion handlers as we go.
            Some(result) = downloads.join_next(), if !downloads.is_empty() => {
                if let Err(e) = result {
                    warn!(error = %e, "Completion handler panicked");
                }
            }
        }
    }

    // Let in-flight downloads finish; each one still notifies clients.
    while let Some(result) = downloads.join_next().await {
        if let Err(e) = result {
            warn!(error = %e, "Completion handler panicked");
        }
    }
}

async fn handle_event(
    registry: &Arc<TaskRegistry>,
    store: &Arc<dyn ResultStore>,
    downloads: &mut JoinSet<()>,
    event: StatusEvent,
    download_timeout: Duration,
) {
    debug!(
        task_id = %event.task_id,
        code = %event.code,
        worker = event.worker.as_deref().unwrap_or(""),
        "Status event received"
    );

    let Some(applied) = registry.apply_status(&event).await else {
        return;
    };

    if applied.newly_succeeded {
        let registry = Arc::clone(registry);
        let store = Arc::clone(store);
        downloads.spawn(async move {
            download_result(registry, store, applied.snapshot.id, applied.snapshot.result_url, download_timeout)
                .await;
        });
    }
}

/// Completion handler: fetch the result artifact, store it locally, and
/// record the outcome on the task. Failures degrade to a download-failure
/// description; clients always get exactly one follow-up notification.
async fn download_result(
    registry: Arc<TaskRegistry>,
    store: Arc<dyn ResultStore>,
    task_id: String,
    result_url: String,
    download_timeout: Duration,
) {
    info!(task_id = %task_id, url = %result_url, "Fetching result");

    let outcome = match tokio::time::timeout(download_timeout, store.fetch(&result_url)).await {
        Ok(Ok(bytes)) => store_result(&registry, &task_id, &bytes).await,
        Ok(Err(e)) => Err(e),
        Err(_) => Err(DownloadError::TimedOut {
            after: download_timeout,
        }),
    };

    registry.finish_download(&task_id, outcome).await;
}

async fn store_result(
    registry: &TaskRegistry,
    task_id: &str,
    bytes: &[u8],
) -> Result<usize, DownloadError> {
    let path = registry.result_file(task_id);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, bytes).await?;
    Ok(bytes.len())
}

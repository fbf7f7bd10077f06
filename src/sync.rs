use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::fetch::{Fetch, Request};
use crate::lifecycle::{ClientHub, ClientMessage};

/// Failure of the external durable queue itself, as opposed to a delivery
/// failure of one record.
#[derive(Debug, Clone, Error)]
#[error("submission queue unavailable: {0}")]
pub struct QueueError(pub String);

/// One deferred submission captured while offline: an opaque id plus the
/// request to replay.
#[derive(Debug, Clone)]
pub struct QueuedSubmission {
    pub id: String,
    pub request: Request,
}

/// External durable queue collaborator. The runtime never persists queued
/// submissions itself; it only drains this interface when the scheduler
/// fires.
#[async_trait]
pub trait SubmissionQueue: Send + Sync {
    async fn pending(&self) -> Result<Vec<QueuedSubmission>, QueueError>;
    async fn remove(&self, id: &str) -> Result<(), QueueError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Attempts to deliver every pending submission. A failed record is left in
/// the queue for the next trigger and never aborts the remaining records;
/// each delivered record is acknowledged and announced to clients.
pub async fn flush_pending(
    queue: &dyn SubmissionQueue,
    fetcher: &dyn Fetch,
    clients: &ClientHub,
) -> Result<FlushReport, QueueError> {
    let pending = queue.pending().await?;
    let mut report = FlushReport::default();

    for submission in pending {
        match fetcher.fetch(&submission.request).await {
            Ok(response) if response.status.is_success() => {
                match queue.remove(&submission.id).await {
                    Ok(()) => {
                        debug!(id = %submission.id, "queued submission delivered");
                        crate::metrics::record_sync_submission("delivered");
                        clients.broadcast(ClientMessage::SubmissionSynced {
                            id: submission.id.clone(),
                        });
                        report.delivered += 1;
                    }
                    Err(err) => {
                        // Delivered but not acknowledged; it will be retried
                        // and the receiver must tolerate the duplicate.
                        warn!(id = %submission.id, error = %err, "failed to acknowledge submission");
                        crate::metrics::record_sync_submission("failed");
                        report.failed += 1;
                    }
                }
            }
            Ok(response) => {
                warn!(
                    id = %submission.id,
                    status = response.status.as_u16(),
                    "submission rejected by server; leaving queued"
                );
                crate::metrics::record_sync_submission("failed");
                report.failed += 1;
            }
            Err(err) => {
                warn!(id = %submission.id, error = %err, "submission delivery failed; leaving queued");
                crate::metrics::record_sync_submission("failed");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

//! Periodic reclamation of pending operations that never saw a result.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pipeline::PendingOperationPipeline;

/// Run `cleanup_orphaned(max_age)` every `interval` until `cancel` fires.
pub fn spawn_sweeper(
    pipeline: Arc<PendingOperationPipeline>,
    interval: Duration,
    max_age: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("orphan sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    pipeline.cleanup_orphaned(max_age);
                }
            }
        }
    })
}

//! Worker that executes builds taken from the queue.

use futures::FutureExt;
use hookci_core::{BuildId, BuildStatus};
use hookci_db::BuildRepo;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::queue::QueueShared;

/// Delay before a build whose claim hit a store error is queued again.
pub(crate) const CLAIM_RETRY_DELAY: Duration = Duration::from_secs(1);

pub(crate) struct Worker {
    id: usize,
    queue: Arc<QueueShared>,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(id: usize, queue: Arc<QueueShared>, shutdown: CancellationToken) -> Self {
        Self {
            id,
            queue,
            shutdown,
        }
    }

    /// Run the worker loop until shutdown is requested.
    pub async fn run(self) {
        info!(worker_id = self.id, "Starting worker");

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                next = self.queue.next() => Some(next),
            };
            let Some((build_id, ticket, token)) = next else {
                break;
            };

            let claimed = self.process(build_id, &token).await;
            self.queue.finish(build_id, ticket).await;
            if !claimed {
                self.retry_later(build_id);
            }
        }

        info!(worker_id = self.id, "Worker stopped");
    }

    /// Claim and execute one build. Returns false when the claim failed and
    /// the build is still Queued in the store.
    async fn process(&self, build_id: BuildId, token: &CancellationToken) -> bool {
        match self.queue.store.claim(build_id).await {
            Ok(Some(_)) => {
                info!(worker_id = self.id, build_id = %build_id, "Claimed build");
            }
            Ok(None) => {
                info!(worker_id = self.id, build_id = %build_id, "Build no longer queued, skipping");
                return true;
            }
            Err(e) => {
                warn!(worker_id = self.id, build_id = %build_id, error = %e, "Failed to claim build, retrying");
                return false;
            }
        }

        let run = self
            .queue
            .runner
            .execute(build_id, self.queue.client.as_ref(), token);
        if AssertUnwindSafe(run).catch_unwind().await.is_err() {
            error!(worker_id = self.id, build_id = %build_id, "Build runner panicked");
            let status = if token.is_cancelled() {
                BuildStatus::Stopped
            } else {
                BuildStatus::Error
            };
            if let Err(e) = self.queue.store.transition(build_id, status).await {
                warn!(build_id = %build_id, error = %e, "Failed to record build failure");
            }
        }
        true
    }

    fn retry_later(&self, build_id: BuildId) {
        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(CLAIM_RETRY_DELAY) => {
                    queue.push(build_id).await;
                }
            }
        });
    }
}

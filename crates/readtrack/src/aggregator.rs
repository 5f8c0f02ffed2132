//! Summary aggregation and the background refresh queue.
//!
//! Writes never recompute summaries inline. They submit a refresh to a
//! bounded [`SummaryQueue`]; a single worker task drains it, coalesces
//! duplicate posts, and retries failed refreshes with exponential backoff.
//! Nothing here reports back to the writer.

use std::sync::Arc;

use readtrack_core::{now_millis, ChannelId, PostId, Summary};
use readtrack_store::{ReceiptStore, Result as StoreResult};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::RefreshPolicy;

/// Recomputes and stores the summary row of a post.
pub struct SummaryAggregator<S> {
    store: Arc<S>,
}

impl<S> Clone for SummaryAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: ReceiptStore> SummaryAggregator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Recompute the summary of `post_id` from its current receipts and the
    /// channel's current member count, then upsert it.
    ///
    /// A post with no receipts and no stored summary is left without one and
    /// `None` is returned; summary rows appear with the first receipt and
    /// stay gone once purged. Repeated refreshes over an unchanged receipt
    /// set produce the same counts.
    pub async fn refresh(
        &self,
        post_id: &PostId,
        channel_id: &ChannelId,
    ) -> StoreResult<Option<Summary>> {
        let receipts = self.store.list_receipts_for_post(post_id).await?;
        let previous = self.store.get_summary(post_id).await?;
        if receipts.is_empty() && previous.is_none() {
            debug!(post_id = %post_id, "no receipts and no summary, skipping refresh");
            return Ok(None);
        }
        let total_recipients = self.store.count_channel_members(channel_id).await?;

        let summary = Summary::compute(
            post_id,
            channel_id,
            &receipts,
            total_recipients,
            now_millis(),
            previous.as_ref(),
        );
        self.store.upsert_summary(&summary).await?;

        debug!(
            post_id = %post_id,
            channel_id = %channel_id,
            read_count = summary.read_count,
            total_recipients = summary.total_recipients,
            "summary refreshed"
        );
        Ok(Some(summary))
    }
}

enum Job {
    Refresh { post_id: PostId, channel_id: ChannelId },
    Flush(oneshot::Sender<()>),
}

/// Handle to the background refresh worker.
///
/// Cloning the handle shares the same queue. The worker stops once every
/// handle is dropped and the queue is drained.
#[derive(Clone)]
pub struct SummaryQueue {
    tx: mpsc::Sender<Job>,
}

impl SummaryQueue {
    /// Start the worker on the current tokio runtime.
    pub fn spawn<S>(aggregator: SummaryAggregator<S>, policy: RefreshPolicy) -> Self
    where
        S: ReceiptStore + 'static,
    {
        let (tx, rx) = mpsc::channel(policy.queue_capacity.max(1));
        tokio::spawn(run_worker(aggregator, policy, rx));
        Self { tx }
    }

    /// Request a refresh. Returns false if the request was dropped because
    /// the queue is full or the worker is gone.
    pub fn submit(&self, post_id: PostId, channel_id: ChannelId) -> bool {
        let job = Job::Refresh {
            post_id: post_id.clone(),
            channel_id,
        };
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(post_id = %post_id, "summary refresh queue full, dropping refresh");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(post_id = %post_id, "summary refresh worker stopped, dropping refresh");
                false
            }
        }
    }

    /// Wait until every refresh submitted before this call has finished.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Job::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

async fn run_worker<S: ReceiptStore>(
    aggregator: SummaryAggregator<S>,
    policy: RefreshPolicy,
    mut rx: mpsc::Receiver<Job>,
) {
    debug!("summary refresh worker started");

    while let Some(first) = rx.recv().await {
        // Drain whatever is already queued so duplicates collapse.
        let mut pending: Vec<(PostId, ChannelId)> = Vec::new();
        let mut waiters: Vec<oneshot::Sender<()>> = Vec::new();

        let mut next = Some(first);
        while let Some(job) = next {
            match job {
                Job::Refresh {
                    post_id,
                    channel_id,
                } => {
                    if !pending.iter().any(|(p, _)| p == &post_id) {
                        pending.push((post_id, channel_id));
                    }
                }
                Job::Flush(done) => waiters.push(done),
            }
            next = rx.try_recv().ok();
        }

        for (post_id, channel_id) in &pending {
            refresh_with_retry(&aggregator, &policy, post_id, channel_id).await;
        }
        for done in waiters {
            let _ = done.send(());
        }
    }

    debug!("summary refresh worker stopped");
}

async fn refresh_with_retry<S: ReceiptStore>(
    aggregator: &SummaryAggregator<S>,
    policy: &RefreshPolicy,
    post_id: &PostId,
    channel_id: &ChannelId,
) {
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match aggregator.refresh(post_id, channel_id).await {
            Ok(_) => return,
            Err(e) if attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                debug!(
                    post_id = %post_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "summary refresh failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(
                    post_id = %post_id,
                    channel_id = %channel_id,
                    attempts = max_attempts,
                    error = %e,
                    "summary refresh failed, giving up"
                );
            }
        }
    }
}

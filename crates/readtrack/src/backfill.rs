//! Backfill: reconstruct receipts from channel last-viewed times.
//!
//! Before receipts existed, the platform only tracked when each member last
//! viewed a channel. Backfill turns that into per-post receipts: every post
//! created before a member's last view, and not authored by them, counts as
//! read at that view time.

use std::collections::BTreeSet;
use std::sync::Arc;

use readtrack_core::{
    now_millis, validate_receipt, ChannelId, DeviceType, PostId, ReceiptBuilder,
};
use readtrack_store::ReceiptStore;
use tracing::{debug, info, warn};

use crate::aggregator::SummaryQueue;
use crate::collaborators::{Directory, MembershipResolver};
use crate::config::ReceiptConfig;
use crate::error::{PolicyViolation, Result};

/// Counts from one backfill run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Members with a recorded view time.
    pub members_scanned: usize,
    /// Members skipped because they never viewed the channel.
    pub members_skipped: usize,
    /// Posts in the scanned window.
    pub posts_scanned: usize,
    /// Receipts written.
    pub created: usize,
    /// Candidate pairs that already had a receipt, left untouched.
    pub already_present: usize,
    /// Candidate pairs whose write failed.
    pub failed: usize,
}

/// Synthesizes receipts for a channel from member view times.
pub struct BackfillReconstructor<S> {
    store: Arc<S>,
    directory: Arc<dyn Directory>,
    membership: Arc<dyn MembershipResolver>,
    config: ReceiptConfig,
    queue: SummaryQueue,
}

impl<S: ReceiptStore> BackfillReconstructor<S> {
    pub fn new(
        store: Arc<S>,
        directory: Arc<dyn Directory>,
        membership: Arc<dyn MembershipResolver>,
        config: ReceiptConfig,
        queue: SummaryQueue,
    ) -> Self {
        Self {
            store,
            directory,
            membership,
            config,
            queue,
        }
    }

    /// Backfill one channel.
    ///
    /// Fails only if the channel is ineligible or its members/posts cannot
    /// be listed. Individual write failures are logged and counted.
    pub async fn backfill_channel(&self, channel_id: &ChannelId) -> Result<BackfillReport> {
        let channel = self.directory.get_channel(channel_id).await?;
        if !self.config.is_channel_eligible(channel.channel_type) {
            return Err(PolicyViolation::ChannelIneligible.into());
        }

        let members = self.membership.list_members(channel_id).await?;
        let posts = self
            .directory
            .recent_posts(channel_id, self.config.backfill_post_window)
            .await?;

        let mut report = BackfillReport {
            posts_scanned: posts.len(),
            ..BackfillReport::default()
        };
        if posts.is_empty() {
            return Ok(report);
        }

        let created_at = now_millis();
        let mut touched: BTreeSet<PostId> = BTreeSet::new();

        for member in &members {
            if !member.has_viewed() {
                report.members_skipped += 1;
                continue;
            }
            report.members_scanned += 1;

            for post in &posts {
                if post.create_at >= member.last_viewed_at || post.user_id == member.user_id {
                    continue;
                }
                let receipt = ReceiptBuilder::new(
                    post.id.clone(),
                    member.user_id.clone(),
                    channel_id.clone(),
                )
                .read_at(member.last_viewed_at)
                .created_at(created_at)
                .device_type(DeviceType::Unknown)
                .build();

                if let Err(e) = validate_receipt(&receipt) {
                    warn!(
                        post_id = %post.id,
                        user_id = %member.user_id,
                        error = %e,
                        "backfill skipped invalid receipt"
                    );
                    report.failed += 1;
                    continue;
                }

                // Never overwrite: a live read may land while the scan runs.
                match self.store.insert_receipt_if_absent(&receipt).await {
                    Ok(true) => {
                        report.created += 1;
                        touched.insert(post.id.clone());
                    }
                    Ok(false) => report.already_present += 1,
                    Err(e) => {
                        warn!(
                            post_id = %post.id,
                            user_id = %member.user_id,
                            error = %e,
                            "backfill receipt write failed"
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        for post_id in touched {
            self.queue.submit(post_id, channel_id.clone());
        }

        debug!(channel_id = %channel_id, members = members.len(), "backfill scan finished");
        info!(
            channel_id = %channel_id,
            created = report.created,
            already_present = report.already_present,
            failed = report.failed,
            skipped_members = report.members_skipped,
            "backfill complete"
        );
        Ok(report)
    }
}

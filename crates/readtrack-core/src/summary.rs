//! Summary: the precomputed read-state rollup for one post.

use serde::{Deserialize, Serialize};

use crate::receipt::Receipt;
use crate::types::{ChannelId, PostId};

/// Read-count rollup for a post.
///
/// `read_count <= total_recipients` holds only at computation time:
/// `total_recipients` is a point-in-time membership count and drifts as the
/// channel changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub post_id: PostId,
    pub channel_id: ChannelId,
    pub read_count: u64,
    pub total_recipients: u64,
    /// When this row was last recomputed (Unix ms). Never decreases.
    pub last_updated: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_read_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_at: Option<i64>,
}

impl Summary {
    /// Compute a summary from the full receipt set of a post.
    ///
    /// `previous` is the currently stored row, if any; `last_updated` is
    /// clamped so it never moves backwards relative to it. Receipts for other
    /// posts are ignored.
    pub fn compute(
        post_id: &PostId,
        channel_id: &ChannelId,
        receipts: &[Receipt],
        total_recipients: u64,
        now: i64,
        previous: Option<&Summary>,
    ) -> Self {
        let reads = receipts
            .iter()
            .filter(|r| &r.post_id == post_id)
            .map(|r| r.read_at);

        let mut read_count = 0u64;
        let mut first_read_at: Option<i64> = None;
        let mut last_read_at: Option<i64> = None;
        for read_at in reads {
            read_count += 1;
            first_read_at = Some(first_read_at.map_or(read_at, |f| f.min(read_at)));
            last_read_at = Some(last_read_at.map_or(read_at, |l| l.max(read_at)));
        }

        let last_updated = previous.map_or(now, |p| p.last_updated.max(now));

        Self {
            post_id: post_id.clone(),
            channel_id: channel_id.clone(),
            read_count,
            total_recipients,
            last_updated,
            first_read_at,
            last_read_at,
        }
    }

    /// Every recipient has read the post.
    pub fn all_read(&self) -> bool {
        self.read_count >= self.total_recipients
    }

    /// Some, but not all, recipients have read the post.
    pub fn partially_read(&self) -> bool {
        self.read_count > 0 && self.read_count < self.total_recipients
    }

    /// True if two summaries agree on everything except `last_updated`.
    pub fn same_counts(&self, other: &Summary) -> bool {
        self.post_id == other.post_id
            && self.channel_id == other.channel_id
            && self.read_count == other.read_count
            && self.total_recipients == other.total_recipients
            && self.first_read_at == other.first_read_at
            && self.last_read_at == other.last_read_at
    }
}

/// Receipt totals for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub channel_id: ChannelId,
    /// Stored receipts across every post of the channel.
    pub total_receipts: u64,
    /// When the totals were taken (Unix ms).
    pub computed_at: i64,
}

//! ReceiptInfo: the per-post read view returned to a viewer.

use serde::{Deserialize, Serialize};

use crate::privacy::{self, VisibilityMode};
use crate::receipt::Receipt;
use crate::types::{ChannelId, PostId, UserId};

/// Read state of one post as seen by one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptInfo {
    pub post_id: PostId,
    pub channel_id: ChannelId,
    /// Receipts visible to the viewer, newest read first.
    pub receipts: Vec<Receipt>,
    pub total_users: u64,
    pub read_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_read: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read: Option<i64>,
    pub partially_read: bool,
    pub all_read: bool,
}

impl ReceiptInfo {
    /// Build the unfiltered view of a post from its receipts.
    pub fn from_receipts(
        post_id: PostId,
        channel_id: ChannelId,
        mut receipts: Vec<Receipt>,
        total_users: u64,
    ) -> Self {
        receipts.sort_by(|a, b| b.read_at.cmp(&a.read_at));
        let first_read = receipts.iter().map(|r| r.read_at).min();
        let last_read = receipts.iter().map(|r| r.read_at).max();

        let mut info = Self {
            post_id,
            channel_id,
            read_count: receipts.len() as u64,
            receipts,
            total_users,
            first_read,
            last_read,
            partially_read: false,
            all_read: false,
        };
        info.refresh_flags();
        info
    }

    /// Narrow the receipts to what `viewer` may see.
    ///
    /// When the filter removes anything, `read_count` follows the visible
    /// set rather than the true number of readers. `first_read`/`last_read`
    /// keep the unfiltered values.
    pub fn apply_privacy(mut self, viewer: &UserId, mode: VisibilityMode) -> Self {
        if mode == VisibilityMode::ShowAll {
            return self;
        }
        self.receipts = privacy::filter(self.receipts, viewer, mode);
        self.read_count = self.receipts.len() as u64;
        self.refresh_flags();
        self
    }

    /// Share of recipients who have read the post, in percent.
    pub fn read_percentage(&self) -> f64 {
        if self.total_users == 0 {
            return 0.0;
        }
        self.read_count as f64 / self.total_users as f64 * 100.0
    }

    fn refresh_flags(&mut self) {
        self.all_read = self.read_count >= self.total_users;
        self.partially_read = self.read_count > 0 && self.read_count < self.total_users;
    }
}

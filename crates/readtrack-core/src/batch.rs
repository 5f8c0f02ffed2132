//! BatchRequest: transient input for bulk mark-as-read.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, PostId};

/// Default upper bound on the number of posts in one batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// A request to mark several posts as read for one user.
///
/// Never persisted as such; it is decomposed into one receipt per post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub post_ids: Vec<PostId>,
    /// Channel the caller believes the posts belong to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    /// Read time for every post; 0 means "now".
    #[serde(default)]
    pub read_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl BatchRequest {
    pub fn new(post_ids: impl IntoIterator<Item = PostId>) -> Self {
        Self {
            post_ids: post_ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn channel(mut self, channel_id: ChannelId) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    pub fn read_at(mut self, ts: i64) -> Self {
        self.read_at = ts;
        self
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Post ids with duplicates removed, first occurrence wins.
    pub fn distinct_post_ids(&self) -> Vec<PostId> {
        let mut seen = HashSet::with_capacity(self.post_ids.len());
        self.post_ids
            .iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect()
    }
}

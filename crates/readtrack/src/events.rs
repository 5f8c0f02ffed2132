//! Notification events published after receipts are written.

use readtrack_core::{ChannelId, PostId, Receipt, UserId};
use serde::{Deserialize, Serialize};

/// An event handed to the notification sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReceiptEvent {
    /// A single post was marked read.
    PostRead {
        post_id: PostId,
        user_id: UserId,
        channel_id: ChannelId,
        read_at: i64,
    },
    /// Several posts in one channel were marked read in one call.
    PostReadBatch {
        channel_id: ChannelId,
        user_id: UserId,
        receipts: Vec<Receipt>,
        count: usize,
    },
}

impl ReceiptEvent {
    pub fn single(receipt: &Receipt) -> Self {
        ReceiptEvent::PostRead {
            post_id: receipt.post_id.clone(),
            user_id: receipt.user_id.clone(),
            channel_id: receipt.channel_id.clone(),
            read_at: receipt.read_at,
        }
    }

    pub fn batch(channel_id: ChannelId, user_id: UserId, receipts: Vec<Receipt>) -> Self {
        ReceiptEvent::PostReadBatch {
            channel_id,
            user_id,
            count: receipts.len(),
            receipts,
        }
    }

    pub fn channel_id(&self) -> &ChannelId {
        match self {
            ReceiptEvent::PostRead { channel_id, .. } => channel_id,
            ReceiptEvent::PostReadBatch { channel_id, .. } => channel_id,
        }
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            ReceiptEvent::PostRead { .. } => "post_read",
            ReceiptEvent::PostReadBatch { .. } => "post_read_batch",
        }
    }
}

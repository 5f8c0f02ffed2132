//! Service configuration.
//!
//! [`ReceiptConfig`] is an immutable value handed to the service at
//! construction. Hosts usually load it from JSON; every field has a default.

use std::time::Duration;

use readtrack_core::{ChannelType, ReceiptMode, MAX_BATCH_SIZE};
use serde::{Deserialize, Serialize};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Configuration for the read receipt service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptConfig {
    /// Master switch for the feature.
    pub enabled: bool,
    /// Whether open and private team channels take receipts. Direct and
    /// group conversations always do.
    pub team_channels_eligible: bool,
    /// Receipt mode for users without an explicit preference.
    pub default_receipt_mode: ReceiptMode,
    /// Whether users may delete their own receipts.
    pub privacy_deletion_allowed: bool,
    /// Upper bound on post ids per batch request.
    pub max_batch_size: usize,
    /// Upper bound on history/audit page size.
    pub max_history_limit: usize,
    /// How many recent posts per channel backfill considers.
    pub backfill_post_window: usize,
    /// How many recent posts per channel an unread count scans.
    pub unread_post_window: usize,
    /// Receipts older than this are removed by retention cleanup. 0 keeps
    /// receipts forever.
    pub retention_days: u32,
    /// Summary refresh queue settings.
    pub refresh: RefreshPolicy,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            team_channels_eligible: false,
            default_receipt_mode: ReceiptMode::Enabled,
            privacy_deletion_allowed: true,
            max_batch_size: MAX_BATCH_SIZE,
            max_history_limit: 200,
            backfill_post_window: 200,
            unread_post_window: 1000,
            retention_days: 30,
            refresh: RefreshPolicy::default(),
        }
    }
}

impl ReceiptConfig {
    /// Whether a channel of this type takes receipts.
    pub fn is_channel_eligible(&self, channel_type: ChannelType) -> bool {
        channel_type.is_conversation() || self.team_channels_eligible
    }

    /// Clamp a requested page size. 0 means the maximum.
    pub fn history_limit(&self, requested: usize) -> usize {
        if requested == 0 {
            self.max_history_limit
        } else {
            requested.min(self.max_history_limit)
        }
    }

    /// `created_at` cutoff for retention cleanup at `now`, or `None` when
    /// retention is unlimited.
    pub fn retention_cutoff(&self, now: i64) -> Option<i64> {
        if self.retention_days == 0 {
            return None;
        }
        Some(now.saturating_sub(i64::from(self.retention_days) * MILLIS_PER_DAY))
    }
}

/// Retry and capacity settings for background summary refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    /// Pending refreshes beyond this are dropped.
    pub queue_capacity: usize,
    /// Attempts per refresh, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub initial_backoff_ms: u64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_attempts: 3,
            initial_backoff_ms: 50,
        }
    }
}

impl RefreshPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(multiplier))
    }
}

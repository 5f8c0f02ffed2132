//! ReceiptStore trait: the abstract interface for read-tracking persistence.
//!
//! This trait keeps the service storage-agnostic. Implementations include
//! SQLite (primary) and in-memory (for tests).

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use readtrack_core::{
    AuditLogEntry, ChannelId, ChannelMember, PostId, Receipt, Summary, UserId,
};

use crate::error::Result;

/// The ReceiptStore trait: async interface for receipts, summaries, audit
/// entries, and the membership rows summaries are computed against.
///
/// # Design Notes
///
/// - **Upsert, not append**: receipts are unique per `(post_id, user_id)`.
///   A second write for the same key overwrites `read_at`, `created_at`,
///   and the device/session fields; `channel_id` keeps its first value.
/// - **Insert-if-absent** never touches an existing row; it is the write
///   used for reconstructed receipts.
/// - **Atomic batches**: `upsert_receipts_batch` commits every row or none.
/// - **Idempotent deletes**: deleting an absent row is not an error.
/// - **Ordering**: receipt listings are newest `read_at` first; audit
///   listings are newest `created_at` first; summary listings are newest
///   `last_updated` first.
/// - **`since` bounds** are inclusive; `0` means unbounded.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Receipt Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or overwrite a receipt. Returns the row as stored.
    async fn upsert_receipt(&self, receipt: &Receipt) -> Result<Receipt>;

    /// Upsert many receipts in one all-or-nothing write.
    ///
    /// Callers must filter out invalid rows first.
    async fn upsert_receipts_batch(&self, receipts: &[Receipt]) -> Result<()>;

    /// Insert a receipt only if its `(post, user)` key is free.
    ///
    /// Returns false, leaving the stored row untouched, when a receipt
    /// already exists.
    async fn insert_receipt_if_absent(&self, receipt: &Receipt) -> Result<bool>;

    /// Get the receipt for a `(post, user)` pair.
    async fn get_receipt(&self, post_id: &PostId, user_id: &UserId) -> Result<Option<Receipt>>;

    /// All receipts for a post, newest read first.
    async fn list_receipts_for_post(&self, post_id: &PostId) -> Result<Vec<Receipt>>;

    /// Receipts for several posts, grouped by post id.
    ///
    /// Posts without receipts are absent from the map.
    async fn list_receipts_for_posts(
        &self,
        post_ids: &[PostId],
    ) -> Result<HashMap<PostId, Vec<Receipt>>>;

    /// A user's receipts, newest read first, optionally scoped to a channel.
    ///
    /// At most `limit` rows are returned.
    async fn list_receipts_for_user(
        &self,
        user_id: &UserId,
        channel_id: Option<&ChannelId>,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Receipt>>;

    /// Receipts in a channel read at or after `since`, newest first.
    async fn list_receipts_for_channel(
        &self,
        channel_id: &ChannelId,
        since: i64,
    ) -> Result<Vec<Receipt>>;

    /// Number of stored receipts in a channel.
    async fn count_receipts_for_channel(&self, channel_id: &ChannelId) -> Result<u64>;

    /// Delete one receipt.
    async fn delete_receipt(&self, post_id: &PostId, user_id: &UserId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Bulk Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Delete every receipt for a post. Returns the number removed.
    async fn delete_receipts_for_post(&self, post_id: &PostId) -> Result<u64>;

    /// Delete every receipt in a channel. Returns the number removed.
    async fn delete_receipts_for_channel(&self, channel_id: &ChannelId) -> Result<u64>;

    /// Delete every receipt by a user. Returns the number removed.
    async fn delete_receipts_for_user(&self, user_id: &UserId) -> Result<u64>;

    /// Delete receipts whose `created_at` is strictly before `cutoff`.
    /// Returns the removed rows.
    async fn delete_receipts_created_before(&self, cutoff: i64) -> Result<Vec<Receipt>>;

    /// Clear device and session identifiers on a user's receipts.
    async fn anonymize_receipts_for_user(&self, user_id: &UserId) -> Result<u64>;

    // ─────────────────────────────────────────────────────────────────────────
    // Summary Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the summary row for a post.
    async fn get_summary(&self, post_id: &PostId) -> Result<Option<Summary>>;

    /// Replace the summary row for `summary.post_id`.
    async fn upsert_summary(&self, summary: &Summary) -> Result<()>;

    /// Summaries in a channel updated at or after `since`.
    async fn list_summaries_for_channel(
        &self,
        channel_id: &ChannelId,
        since: i64,
    ) -> Result<Vec<Summary>>;

    /// Remove the summary row for a post.
    async fn delete_summary(&self, post_id: &PostId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Audit Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Append an audit entry.
    async fn save_audit(&self, entry: &AuditLogEntry) -> Result<()>;

    /// A user's audit entries created at or after `since`, newest first.
    async fn list_audit(
        &self,
        user_id: &UserId,
        since: i64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Membership Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or update a channel member row.
    async fn upsert_channel_member(&self, member: &ChannelMember) -> Result<()>;

    /// Remove a member from a channel.
    async fn remove_channel_member(&self, channel_id: &ChannelId, user_id: &UserId)
        -> Result<()>;

    /// All members of a channel, ordered by user id.
    async fn list_channel_members(&self, channel_id: &ChannelId) -> Result<Vec<ChannelMember>>;

    /// Number of members in a channel right now.
    async fn count_channel_members(&self, channel_id: &ChannelId) -> Result<u64>;
}

/// Extension trait for common lookups built on [`ReceiptStore`].
pub trait ReceiptStoreExt: ReceiptStore {
    /// True if the user has a stored receipt for the post.
    fn is_read_by(
        &self,
        post_id: &PostId,
        user_id: &UserId,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// The most recent `read_at` of a user in a channel.
    fn last_read_at(
        &self,
        channel_id: &ChannelId,
        user_id: &UserId,
    ) -> impl Future<Output = Result<Option<i64>>> + Send;
}

impl<S: ReceiptStore + ?Sized> ReceiptStoreExt for S {
    async fn is_read_by(&self, post_id: &PostId, user_id: &UserId) -> Result<bool> {
        Ok(self.get_receipt(post_id, user_id).await?.is_some())
    }

    async fn last_read_at(&self, channel_id: &ChannelId, user_id: &UserId) -> Result<Option<i64>> {
        let latest = self
            .list_receipts_for_user(user_id, Some(channel_id), 0, 1)
            .await?;
        Ok(latest.first().map(|r| r.read_at))
    }
}

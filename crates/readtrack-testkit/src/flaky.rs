//! Fault-injecting store wrapper.
//!
//! [`FlakyStore`] forwards every call to an inner store, but can be told to
//! fail writes with [`StoreError::Unavailable`]: all of them, the receipt
//! writes of chosen `(post, user)` pairs, or the next few summary upserts.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use readtrack_core::{AuditLogEntry, ChannelId, ChannelMember, PostId, Receipt, Summary, UserId};
use readtrack_store::{ReceiptStore, Result, StoreError};

/// A store that fails on demand.
pub struct FlakyStore<S> {
    inner: S,
    fail_writes: AtomicBool,
    failing_pairs: Mutex<HashSet<(PostId, UserId)>>,
    fail_summary_writes: AtomicU32,
}

impl<S: ReceiptStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            failing_pairs: Mutex::new(HashSet::new()),
            fail_summary_writes: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail every write until switched off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail every receipt write for one `(post, user)` pair.
    pub fn fail_receipt_writes_for(&self, post_id: &PostId, user_id: &UserId) {
        self.failing_pairs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((post_id.clone(), user_id.clone()));
    }

    /// Fail the next `n` summary upserts, then recover.
    pub fn fail_next_summary_writes(&self, n: u32) {
        self.fail_summary_writes.store(n, Ordering::SeqCst);
    }

    fn check_write(&self, op: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected(op));
        }
        Ok(())
    }

    fn check_receipt_write(&self, op: &str, receipt: &Receipt) -> Result<()> {
        self.check_write(op)?;
        let failing = self
            .failing_pairs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(receipt.post_id.clone(), receipt.user_id.clone()));
        if failing {
            return Err(injected(op));
        }
        Ok(())
    }
}

fn injected(op: &str) -> StoreError {
    StoreError::Unavailable(format!("injected failure in {}", op))
}

#[async_trait]
impl<S: ReceiptStore> ReceiptStore for FlakyStore<S> {
    async fn upsert_receipt(&self, receipt: &Receipt) -> Result<Receipt> {
        self.check_receipt_write("upsert_receipt", receipt)?;
        self.inner.upsert_receipt(receipt).await
    }

    async fn upsert_receipts_batch(&self, receipts: &[Receipt]) -> Result<()> {
        self.check_write("upsert_receipts_batch")?;
        for receipt in receipts {
            self.check_receipt_write("upsert_receipts_batch", receipt)?;
        }
        self.inner.upsert_receipts_batch(receipts).await
    }

    async fn insert_receipt_if_absent(&self, receipt: &Receipt) -> Result<bool> {
        self.check_receipt_write("insert_receipt_if_absent", receipt)?;
        self.inner.insert_receipt_if_absent(receipt).await
    }

    async fn get_receipt(&self, post_id: &PostId, user_id: &UserId) -> Result<Option<Receipt>> {
        self.inner.get_receipt(post_id, user_id).await
    }

    async fn list_receipts_for_post(&self, post_id: &PostId) -> Result<Vec<Receipt>> {
        self.inner.list_receipts_for_post(post_id).await
    }

    async fn list_receipts_for_posts(
        &self,
        post_ids: &[PostId],
    ) -> Result<HashMap<PostId, Vec<Receipt>>> {
        self.inner.list_receipts_for_posts(post_ids).await
    }

    async fn list_receipts_for_user(
        &self,
        user_id: &UserId,
        channel_id: Option<&ChannelId>,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Receipt>> {
        self.inner
            .list_receipts_for_user(user_id, channel_id, since, limit)
            .await
    }

    async fn list_receipts_for_channel(
        &self,
        channel_id: &ChannelId,
        since: i64,
    ) -> Result<Vec<Receipt>> {
        self.inner.list_receipts_for_channel(channel_id, since).await
    }

    async fn count_receipts_for_channel(&self, channel_id: &ChannelId) -> Result<u64> {
        self.inner.count_receipts_for_channel(channel_id).await
    }

    async fn delete_receipt(&self, post_id: &PostId, user_id: &UserId) -> Result<()> {
        self.check_write("delete_receipt")?;
        self.inner.delete_receipt(post_id, user_id).await
    }

    async fn delete_receipts_for_post(&self, post_id: &PostId) -> Result<u64> {
        self.check_write("delete_receipts_for_post")?;
        self.inner.delete_receipts_for_post(post_id).await
    }

    async fn delete_receipts_for_channel(&self, channel_id: &ChannelId) -> Result<u64> {
        self.check_write("delete_receipts_for_channel")?;
        self.inner.delete_receipts_for_channel(channel_id).await
    }

    async fn delete_receipts_for_user(&self, user_id: &UserId) -> Result<u64> {
        self.check_write("delete_receipts_for_user")?;
        self.inner.delete_receipts_for_user(user_id).await
    }

    async fn delete_receipts_created_before(&self, cutoff: i64) -> Result<Vec<Receipt>> {
        self.check_write("delete_receipts_created_before")?;
        self.inner.delete_receipts_created_before(cutoff).await
    }

    async fn anonymize_receipts_for_user(&self, user_id: &UserId) -> Result<u64> {
        self.check_write("anonymize_receipts_for_user")?;
        self.inner.anonymize_receipts_for_user(user_id).await
    }

    async fn get_summary(&self, post_id: &PostId) -> Result<Option<Summary>> {
        self.inner.get_summary(post_id).await
    }

    async fn upsert_summary(&self, summary: &Summary) -> Result<()> {
        self.check_write("upsert_summary")?;
        let failing = self
            .fail_summary_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(injected("upsert_summary"));
        }
        self.inner.upsert_summary(summary).await
    }

    async fn list_summaries_for_channel(
        &self,
        channel_id: &ChannelId,
        since: i64,
    ) -> Result<Vec<Summary>> {
        self.inner.list_summaries_for_channel(channel_id, since).await
    }

    async fn delete_summary(&self, post_id: &PostId) -> Result<()> {
        self.check_write("delete_summary")?;
        self.inner.delete_summary(post_id).await
    }

    async fn save_audit(&self, entry: &AuditLogEntry) -> Result<()> {
        self.check_write("save_audit")?;
        self.inner.save_audit(entry).await
    }

    async fn list_audit(
        &self,
        user_id: &UserId,
        since: i64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>> {
        self.inner.list_audit(user_id, since, limit).await
    }

    async fn upsert_channel_member(&self, member: &ChannelMember) -> Result<()> {
        self.check_write("upsert_channel_member")?;
        self.inner.upsert_channel_member(member).await
    }

    async fn remove_channel_member(
        &self,
        channel_id: &ChannelId,
        user_id: &UserId,
    ) -> Result<()> {
        self.check_write("remove_channel_member")?;
        self.inner.remove_channel_member(channel_id, user_id).await
    }

    async fn list_channel_members(&self, channel_id: &ChannelId) -> Result<Vec<ChannelMember>> {
        self.inner.list_channel_members(channel_id).await
    }

    async fn count_channel_members(&self, channel_id: &ChannelId) -> Result<u64> {
        self.inner.count_channel_members(channel_id).await
    }
}

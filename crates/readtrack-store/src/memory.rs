//! In-memory implementation of the ReceiptStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use readtrack_core::{
    AuditLogEntry, ChannelId, ChannelMember, PostId, Receipt, Summary, UserId,
};

use crate::error::{Result, StoreError};
use crate::traits::ReceiptStore;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Receipts keyed by (post, user).
    receipts: HashMap<(PostId, UserId), Receipt>,

    /// Summaries keyed by post.
    summaries: HashMap<PostId, Summary>,

    /// Audit entries in insertion order.
    audit: Vec<AuditLogEntry>,

    /// Channel membership, ordered by user id within a channel.
    members: HashMap<ChannelId, BTreeMap<UserId, ChannelMember>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    fn upsert(&mut self, receipt: &Receipt) -> Receipt {
        let key = (receipt.post_id.clone(), receipt.user_id.clone());
        let stored = self
            .receipts
            .entry(key)
            .and_modify(|existing| {
                existing.read_at = receipt.read_at;
                existing.created_at = receipt.created_at;
                existing.device_id = receipt.device_id.clone();
                existing.device_type = receipt.device_type;
                existing.session_id = receipt.session_id.clone();
            })
            .or_insert_with(|| receipt.clone());
        stored.clone()
    }

    fn delete_where(&mut self, pred: impl Fn(&Receipt) -> bool) -> u64 {
        let before = self.receipts.len();
        self.receipts.retain(|_, r| !pred(r));
        (before - self.receipts.len()) as u64
    }
}

/// Newest read first; ties broken by key so listings are deterministic.
fn sort_newest_first(receipts: &mut [Receipt]) {
    receipts.sort_by(|a, b| {
        b.read_at
            .cmp(&a.read_at)
            .then_with(|| a.post_id.cmp(&b.post_id))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
}

#[async_trait]
impl ReceiptStore for MemoryStore {
    async fn upsert_receipt(&self, receipt: &Receipt) -> Result<Receipt> {
        let mut inner = self.write()?;
        Ok(inner.upsert(receipt))
    }

    async fn upsert_receipts_batch(&self, receipts: &[Receipt]) -> Result<()> {
        let mut inner = self.write()?;
        for receipt in receipts {
            inner.upsert(receipt);
        }
        Ok(())
    }

    async fn insert_receipt_if_absent(&self, receipt: &Receipt) -> Result<bool> {
        let mut inner = self.write()?;
        let key = (receipt.post_id.clone(), receipt.user_id.clone());
        match inner.receipts.entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(receipt.clone());
                Ok(true)
            }
        }
    }

    async fn get_receipt(&self, post_id: &PostId, user_id: &UserId) -> Result<Option<Receipt>> {
        let inner = self.read()?;
        Ok(inner
            .receipts
            .get(&(post_id.clone(), user_id.clone()))
            .cloned())
    }

    async fn list_receipts_for_post(&self, post_id: &PostId) -> Result<Vec<Receipt>> {
        let inner = self.read()?;
        let mut out: Vec<Receipt> = inner
            .receipts
            .values()
            .filter(|r| &r.post_id == post_id)
            .cloned()
            .collect();
        sort_newest_first(&mut out);
        Ok(out)
    }

    async fn list_receipts_for_posts(
        &self,
        post_ids: &[PostId],
    ) -> Result<HashMap<PostId, Vec<Receipt>>> {
        let inner = self.read()?;
        let mut grouped: HashMap<PostId, Vec<Receipt>> = HashMap::new();
        for receipt in inner.receipts.values() {
            if post_ids.contains(&receipt.post_id) {
                grouped
                    .entry(receipt.post_id.clone())
                    .or_default()
                    .push(receipt.clone());
            }
        }
        for receipts in grouped.values_mut() {
            sort_newest_first(receipts);
        }
        Ok(grouped)
    }

    async fn list_receipts_for_user(
        &self,
        user_id: &UserId,
        channel_id: Option<&ChannelId>,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Receipt>> {
        let inner = self.read()?;
        let mut out: Vec<Receipt> = inner
            .receipts
            .values()
            .filter(|r| &r.user_id == user_id)
            .filter(|r| channel_id.map_or(true, |c| &r.channel_id == c))
            .filter(|r| since <= 0 || r.read_at >= since)
            .cloned()
            .collect();
        sort_newest_first(&mut out);
        out.truncate(limit);
        Ok(out)
    }

    async fn list_receipts_for_channel(
        &self,
        channel_id: &ChannelId,
        since: i64,
    ) -> Result<Vec<Receipt>> {
        let inner = self.read()?;
        let mut out: Vec<Receipt> = inner
            .receipts
            .values()
            .filter(|r| &r.channel_id == channel_id)
            .filter(|r| since <= 0 || r.read_at >= since)
            .cloned()
            .collect();
        sort_newest_first(&mut out);
        Ok(out)
    }

    async fn count_receipts_for_channel(&self, channel_id: &ChannelId) -> Result<u64> {
        let inner = self.read()?;
        Ok(inner
            .receipts
            .values()
            .filter(|r| &r.channel_id == channel_id)
            .count() as u64)
    }

    async fn delete_receipt(&self, post_id: &PostId, user_id: &UserId) -> Result<()> {
        let mut inner = self.write()?;
        inner.receipts.remove(&(post_id.clone(), user_id.clone()));
        Ok(())
    }

    async fn delete_receipts_for_post(&self, post_id: &PostId) -> Result<u64> {
        let mut inner = self.write()?;
        Ok(inner.delete_where(|r| &r.post_id == post_id))
    }

    async fn delete_receipts_for_channel(&self, channel_id: &ChannelId) -> Result<u64> {
        let mut inner = self.write()?;
        Ok(inner.delete_where(|r| &r.channel_id == channel_id))
    }

    async fn delete_receipts_for_user(&self, user_id: &UserId) -> Result<u64> {
        let mut inner = self.write()?;
        Ok(inner.delete_where(|r| &r.user_id == user_id))
    }

    async fn delete_receipts_created_before(&self, cutoff: i64) -> Result<Vec<Receipt>> {
        let mut inner = self.write()?;
        let expired: Vec<(PostId, UserId)> = inner
            .receipts
            .iter()
            .filter(|(_, r)| r.created_at < cutoff)
            .map(|(key, _)| key.clone())
            .collect();
        let mut removed: Vec<Receipt> = expired
            .iter()
            .filter_map(|key| inner.receipts.remove(key))
            .collect();
        sort_newest_first(&mut removed);
        Ok(removed)
    }

    async fn anonymize_receipts_for_user(&self, user_id: &UserId) -> Result<u64> {
        let mut inner = self.write()?;
        let mut touched = 0;
        for receipt in inner.receipts.values_mut() {
            if &receipt.user_id == user_id {
                receipt.anonymize();
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn get_summary(&self, post_id: &PostId) -> Result<Option<Summary>> {
        let inner = self.read()?;
        Ok(inner.summaries.get(post_id).cloned())
    }

    async fn upsert_summary(&self, summary: &Summary) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .summaries
            .insert(summary.post_id.clone(), summary.clone());
        Ok(())
    }

    async fn list_summaries_for_channel(
        &self,
        channel_id: &ChannelId,
        since: i64,
    ) -> Result<Vec<Summary>> {
        let inner = self.read()?;
        let mut out: Vec<Summary> = inner
            .summaries
            .values()
            .filter(|s| &s.channel_id == channel_id)
            .filter(|s| since <= 0 || s.last_updated >= since)
            .cloned()
            .collect();
        out.sort_by_key(|s| (Reverse(s.last_updated), s.post_id.clone()));
        Ok(out)
    }

    async fn delete_summary(&self, post_id: &PostId) -> Result<()> {
        let mut inner = self.write()?;
        inner.summaries.remove(post_id);
        Ok(())
    }

    async fn save_audit(&self, entry: &AuditLogEntry) -> Result<()> {
        let mut inner = self.write()?;
        if inner.audit.iter().any(|e| e.id == entry.id) {
            return Err(StoreError::InvalidData(format!(
                "duplicate audit id {}",
                entry.id
            )));
        }
        inner.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit(
        &self,
        user_id: &UserId,
        since: i64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>> {
        let inner = self.read()?;
        let mut out: Vec<AuditLogEntry> = inner
            .audit
            .iter()
            .filter(|e| &e.user_id == user_id)
            .filter(|e| since <= 0 || e.created_at >= since)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        out.truncate(limit);
        Ok(out)
    }

    async fn upsert_channel_member(&self, member: &ChannelMember) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .members
            .entry(member.channel_id.clone())
            .or_default()
            .insert(member.user_id.clone(), member.clone());
        Ok(())
    }

    async fn remove_channel_member(
        &self,
        channel_id: &ChannelId,
        user_id: &UserId,
    ) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(members) = inner.members.get_mut(channel_id) {
            members.remove(user_id);
        }
        Ok(())
    }

    async fn list_channel_members(&self, channel_id: &ChannelId) -> Result<Vec<ChannelMember>> {
        let inner = self.read()?;
        Ok(inner
            .members
            .get(channel_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn count_channel_members(&self, channel_id: &ChannelId) -> Result<u64> {
        let inner = self.read()?;
        Ok(inner
            .members
            .get(channel_id)
            .map_or(0, |m| m.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ReceiptStoreExt;
    use readtrack_core::{AuditAction, AuditMetadata, DeviceType, ReceiptBuilder};

    fn receipt(post: &str, user: &str, channel: &str, read_at: i64) -> Receipt {
        ReceiptBuilder::new(PostId::new(post), UserId::new(user), ChannelId::new(channel))
            .read_at(read_at)
            .created_at(read_at)
            .device_type(DeviceType::Web)
            .build()
    }

    #[tokio::test]
    async fn test_upsert_overwrites_read_at() {
        let store = MemoryStore::new();

        store.upsert_receipt(&receipt("p1", "u1", "c1", 1000)).await.unwrap();
        let stored = store
            .upsert_receipt(&receipt("p1", "u1", "c1", 2000))
            .await
            .unwrap();
        assert_eq!(stored.read_at, 2000);

        let all = store.list_receipts_for_post(&PostId::new("p1")).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].read_at, 2000);
    }

    #[tokio::test]
    async fn test_upsert_keeps_first_channel() {
        let store = MemoryStore::new();

        store.upsert_receipt(&receipt("p1", "u1", "c1", 1000)).await.unwrap();
        let stored = store
            .upsert_receipt(&receipt("p1", "u1", "c2", 2000))
            .await
            .unwrap();
        assert_eq!(stored.channel_id, ChannelId::new("c1"));
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_existing() {
        let store = MemoryStore::new();
        let mut live = receipt("p1", "u1", "c1", 900);
        live.device_type = DeviceType::Mobile;
        store.upsert_receipt(&live).await.unwrap();

        let inserted = store
            .insert_receipt_if_absent(&receipt("p1", "u1", "c1", 500))
            .await
            .unwrap();
        assert!(!inserted);
        let stored = store
            .get_receipt(&PostId::new("p1"), &UserId::new("u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, live);

        assert!(store
            .insert_receipt_if_absent(&receipt("p1", "u2", "c1", 500))
            .await
            .unwrap());
        assert_eq!(
            store.count_receipts_for_channel(&ChannelId::new("c1")).await.unwrap(),
            2
        );
        assert_eq!(
            store.count_receipts_for_channel(&ChannelId::new("c9")).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_list_for_post_newest_first() {
        let store = MemoryStore::new();
        store
            .upsert_receipts_batch(&[
                receipt("p1", "u1", "c1", 100),
                receipt("p1", "u2", "c1", 300),
                receipt("p1", "u3", "c1", 200),
                receipt("p2", "u1", "c1", 999),
            ])
            .await
            .unwrap();

        let reads: Vec<i64> = store
            .list_receipts_for_post(&PostId::new("p1"))
            .await
            .unwrap()
            .iter()
            .map(|r| r.read_at)
            .collect();
        assert_eq!(reads, vec![300, 200, 100]);
    }

    #[tokio::test]
    async fn test_list_for_user_scoped_and_limited() {
        let store = MemoryStore::new();
        store
            .upsert_receipts_batch(&[
                receipt("p1", "u1", "c1", 100),
                receipt("p2", "u1", "c1", 200),
                receipt("p3", "u1", "c2", 300),
                receipt("p4", "u2", "c1", 400),
            ])
            .await
            .unwrap();

        let user = UserId::new("u1");
        let all = store.list_receipts_for_user(&user, None, 0, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].post_id, PostId::new("p3"));

        let c1 = ChannelId::new("c1");
        let scoped = store
            .list_receipts_for_user(&user, Some(&c1), 0, 10)
            .await
            .unwrap();
        assert_eq!(scoped.len(), 2);

        let limited = store.list_receipts_for_user(&user, None, 0, 1).await.unwrap();
        assert_eq!(limited.len(), 1);

        let since = store.list_receipts_for_user(&user, None, 200, 10).await.unwrap();
        assert_eq!(since.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        let post = PostId::new("p1");
        let user = UserId::new("u1");

        store.delete_receipt(&post, &user).await.unwrap();
        store.upsert_receipt(&receipt("p1", "u1", "c1", 100)).await.unwrap();
        store.delete_receipt(&post, &user).await.unwrap();
        store.delete_receipt(&post, &user).await.unwrap();

        assert!(!store.is_read_by(&post, &user).await.unwrap());
    }

    #[tokio::test]
    async fn test_bulk_deletes_and_cleanup() {
        let store = MemoryStore::new();
        store
            .upsert_receipts_batch(&[
                receipt("p1", "u1", "c1", 100),
                receipt("p1", "u2", "c1", 200),
                receipt("p2", "u1", "c2", 300),
                receipt("p3", "u3", "c3", 400),
            ])
            .await
            .unwrap();

        let expired = store.delete_receipts_created_before(150).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].post_id, PostId::new("p1"));
        assert_eq!(expired[0].user_id, UserId::new("u1"));
        assert_eq!(
            store.delete_receipts_for_post(&PostId::new("p1")).await.unwrap(),
            1
        );
        assert_eq!(
            store.delete_receipts_for_channel(&ChannelId::new("c2")).await.unwrap(),
            1
        );
        assert_eq!(
            store.delete_receipts_for_user(&UserId::new("u3")).await.unwrap(),
            1
        );
        assert_eq!(
            store.delete_receipts_for_user(&UserId::new("u3")).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_anonymize_clears_device_fields() {
        let store = MemoryStore::new();
        let mut r = receipt("p1", "u1", "c1", 100);
        r.device_id = Some("mobile-123".into());
        r.session_id = Some("s-1".into());
        store.upsert_receipt(&r).await.unwrap();

        let touched = store
            .anonymize_receipts_for_user(&UserId::new("u1"))
            .await
            .unwrap();
        assert_eq!(touched, 1);

        let stored = store
            .get_receipt(&PostId::new("p1"), &UserId::new("u1"))
            .await
            .unwrap()
            .unwrap();
        assert!(stored.device_id.is_none());
        assert!(stored.session_id.is_none());
        assert_eq!(stored.read_at, 100);
    }

    #[tokio::test]
    async fn test_last_read_at() {
        let store = MemoryStore::new();
        let channel = ChannelId::new("c1");
        let user = UserId::new("u1");

        assert_eq!(store.last_read_at(&channel, &user).await.unwrap(), None);

        store
            .upsert_receipts_batch(&[
                receipt("p1", "u1", "c1", 100),
                receipt("p2", "u1", "c1", 500),
                receipt("p3", "u1", "c2", 900),
            ])
            .await
            .unwrap();

        assert_eq!(store.last_read_at(&channel, &user).await.unwrap(), Some(500));
    }

    #[tokio::test]
    async fn test_summaries_for_channel() {
        let store = MemoryStore::new();
        let channel = ChannelId::new("c1");

        for (post, updated) in [("p1", 100), ("p2", 300), ("p3", 200)] {
            let summary = Summary::compute(&PostId::new(post), &channel, &[], 5, updated, None);
            store.upsert_summary(&summary).await.unwrap();
        }

        let all = store.list_summaries_for_channel(&channel, 0).await.unwrap();
        let order: Vec<&str> = all.iter().map(|s| s.post_id.as_str()).collect();
        assert_eq!(order, vec!["p2", "p3", "p1"]);

        let recent = store.list_summaries_for_channel(&channel, 200).await.unwrap();
        assert_eq!(recent.len(), 2);

        store.delete_summary(&PostId::new("p2")).await.unwrap();
        assert!(store.get_summary(&PostId::new("p2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_audit_newest_first() {
        let store = MemoryStore::new();
        let user = UserId::new("u1");

        for ts in [100, 300, 200] {
            let entry = AuditLogEntry::new(
                user.clone(),
                PostId::new("p1"),
                AuditAction::GhostRead,
                AuditMetadata::GhostRead {
                    channel_id: ChannelId::new("c1"),
                    device_type: DeviceType::Web,
                },
                ts,
            );
            store.save_audit(&entry).await.unwrap();
        }

        let entries = store.list_audit(&user, 0, 10).await.unwrap();
        let times: Vec<i64> = entries.iter().map(|e| e.created_at).collect();
        assert_eq!(times, vec![300, 200, 100]);

        let other = store.list_audit(&UserId::new("u2"), 0, 10).await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_channel_members() {
        let store = MemoryStore::new();
        let channel = ChannelId::new("c1");

        for user in ["u3", "u1", "u2"] {
            store
                .upsert_channel_member(&ChannelMember::new(channel.clone(), UserId::new(user), 0))
                .await
                .unwrap();
        }
        assert_eq!(store.count_channel_members(&channel).await.unwrap(), 3);

        store
            .remove_channel_member(&channel, &UserId::new("u2"))
            .await
            .unwrap();
        let members = store.list_channel_members(&channel).await.unwrap();
        let ids: Vec<&str> = members.iter().map(|m| m.user_id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u3"]);
    }
}

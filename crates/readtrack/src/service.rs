//! ReceiptService: the public API of read tracking.
//!
//! The service checks the feature switch and policies, writes receipts
//! through the store, schedules summary refreshes, and publishes
//! notifications. Summary refresh and notification failures are logged and
//! never reach the caller.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use readtrack_core::{
    now_millis, validate_batch_request, validate_receipt, AuditAction, AuditLogEntry,
    AuditMetadata, BatchRequest, ChannelId, ChannelStats, DeletionReason, PostId, Receipt,
    ReceiptBuilder, ReceiptInfo, Summary, UserId, UserReceiptSettings,
};
use readtrack_store::{ReceiptStore, ReceiptStoreExt};
use tracing::{debug, info, warn};

use crate::aggregator::{SummaryAggregator, SummaryQueue};
use crate::backfill::{BackfillReconstructor, BackfillReport};
use crate::collaborators::{
    DeviceClassifier, Directory, MembershipResolver, NotificationSink, PreferenceResolver,
};
use crate::config::ReceiptConfig;
use crate::error::{PolicyViolation, Result, ServiceError};
use crate::events::ReceiptEvent;

/// The external services the receipt service reads from and writes to.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn Directory>,
    pub membership: Arc<dyn MembershipResolver>,
    pub preferences: Arc<dyn PreferenceResolver>,
    pub devices: Arc<dyn DeviceClassifier>,
    pub notifications: Arc<dyn NotificationSink>,
}

/// Read receipt service over a [`ReceiptStore`].
///
/// Must be constructed inside a tokio runtime; construction starts the
/// summary refresh worker.
pub struct ReceiptService<S: ReceiptStore> {
    store: Arc<S>,
    collaborators: Collaborators,
    config: ReceiptConfig,
    queue: SummaryQueue,
    backfill: BackfillReconstructor<S>,
}

impl<S: ReceiptStore + 'static> ReceiptService<S> {
    /// Create a service that owns `store`.
    pub fn new(store: S, collaborators: Collaborators, config: ReceiptConfig) -> Self {
        Self::with_shared_store(Arc::new(store), collaborators, config)
    }

    /// Create a service over a store shared with other components.
    pub fn with_shared_store(
        store: Arc<S>,
        collaborators: Collaborators,
        config: ReceiptConfig,
    ) -> Self {
        let queue = SummaryQueue::spawn(
            SummaryAggregator::new(store.clone()),
            config.refresh.clone(),
        );
        let backfill = BackfillReconstructor::new(
            store.clone(),
            collaborators.directory.clone(),
            collaborators.membership.clone(),
            config.clone(),
            queue.clone(),
        );
        Self {
            store,
            collaborators,
            config,
            queue,
            backfill,
        }
    }
}

impl<S: ReceiptStore> ReceiptService<S> {
    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ReceiptConfig {
        &self.config
    }

    /// Wait for every summary refresh scheduled so far.
    pub async fn flush_summaries(&self) {
        self.queue.flush().await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Write Path
    // ─────────────────────────────────────────────────────────────────────────

    /// Mark one post as read by `user_id` at `read_at`.
    ///
    /// Returns the receipt as stored. A repeat call for the same post and
    /// user overwrites the read time.
    pub async fn mark_read(
        &self,
        user_id: &UserId,
        post_id: &PostId,
        read_at: i64,
        device_id: Option<&str>,
    ) -> Result<Receipt> {
        self.ensure_enabled()?;

        let post = self.collaborators.directory.get_post(post_id).await?;
        self.ensure_channel_eligible(&post.channel_id).await?;
        self.ensure_opted_in(user_id).await?;

        let device_type = self.collaborators.devices.classify(device_id);
        let receipt = ReceiptBuilder::new(post.id.clone(), user_id.clone(), post.channel_id.clone())
            .read_at(read_at)
            .created_at(now_millis())
            .device_id(device_id)
            .device_type(device_type)
            .build();
        validate_receipt(&receipt)?;

        let stored = self.store.upsert_receipt(&receipt).await?;
        debug!(
            post_id = %stored.post_id,
            user_id = %stored.user_id,
            channel_id = %stored.channel_id,
            read_at = stored.read_at,
            "receipt stored"
        );

        self.queue
            .submit(stored.post_id.clone(), stored.channel_id.clone());
        self.publish(ReceiptEvent::single(&stored)).await;

        Ok(stored)
    }

    /// Mark many posts as read in one call.
    ///
    /// Posts that do not resolve, sit in an ineligible channel, or produce an
    /// invalid receipt are dropped. The returned receipts are the ones
    /// written, so the result may be shorter than the request.
    pub async fn mark_read_batch(
        &self,
        user_id: &UserId,
        request: &BatchRequest,
    ) -> Result<Vec<Receipt>> {
        self.ensure_enabled()?;
        validate_batch_request(request, self.config.max_batch_size)?;

        if let Some(channel_id) = &request.channel_id {
            self.ensure_channel_eligible(channel_id).await?;
        }
        self.ensure_opted_in(user_id).await?;

        let read_at = if request.read_at == 0 {
            now_millis()
        } else {
            request.read_at
        };
        let created_at = now_millis();
        let device_id = request.device_id.as_deref();
        let device_type = self.collaborators.devices.classify(device_id);

        let mut eligible: HashMap<ChannelId, bool> = HashMap::new();
        let mut receipts: Vec<Receipt> = Vec::new();
        let requested = request.distinct_post_ids();

        for post_id in &requested {
            let post = match self.collaborators.directory.get_post(post_id).await {
                Ok(post) => post,
                Err(e) => {
                    debug!(post_id = %post_id, error = %e, "batch dropped unresolved post");
                    continue;
                }
            };

            if let Some(channel_id) = &request.channel_id {
                if &post.channel_id != channel_id {
                    debug!(post_id = %post_id, "batch dropped post from another channel");
                    continue;
                }
            }

            let channel_ok = match eligible.get(&post.channel_id) {
                Some(ok) => *ok,
                None => {
                    let ok = match self.channel_eligible(&post.channel_id).await {
                        Ok(ok) => ok,
                        Err(e) => {
                            warn!(
                                channel_id = %post.channel_id,
                                error = %e,
                                "batch could not resolve channel"
                            );
                            false
                        }
                    };
                    eligible.insert(post.channel_id.clone(), ok);
                    ok
                }
            };
            if !channel_ok {
                debug!(post_id = %post_id, channel_id = %post.channel_id, "batch dropped ineligible post");
                continue;
            }

            let receipt = ReceiptBuilder::new(post.id, user_id.clone(), post.channel_id)
                .read_at(read_at)
                .created_at(created_at)
                .device_id(device_id)
                .device_type(device_type)
                .build();
            if let Err(e) = validate_receipt(&receipt) {
                warn!(post_id = %post_id, error = %e, "batch dropped invalid receipt");
                continue;
            }
            receipts.push(receipt);
        }

        if receipts.len() < requested.len() {
            warn!(
                user_id = %user_id,
                requested = requested.len(),
                processed = receipts.len(),
                "batch partially processed"
            );
        }
        if receipts.is_empty() {
            return Ok(receipts);
        }

        self.store.upsert_receipts_batch(&receipts).await?;
        debug!(user_id = %user_id, count = receipts.len(), "batch receipts stored");

        let mut by_channel: BTreeMap<ChannelId, Vec<Receipt>> = BTreeMap::new();
        for receipt in &receipts {
            self.queue
                .submit(receipt.post_id.clone(), receipt.channel_id.clone());
            by_channel
                .entry(receipt.channel_id.clone())
                .or_default()
                .push(receipt.clone());
        }

        for (channel_id, channel_receipts) in by_channel {
            self.record_bulk_read(user_id, &channel_id, &channel_receipts)
                .await;
            self.publish(ReceiptEvent::batch(channel_id, user_id.clone(), channel_receipts))
                .await;
        }

        Ok(receipts)
    }

    /// Read a post without leaving a receipt.
    ///
    /// Only an audit entry is written; no receipt, summary change, or event.
    pub async fn ghost_read(
        &self,
        user_id: &UserId,
        post_id: &PostId,
        device_id: Option<&str>,
    ) -> Result<AuditLogEntry> {
        self.ensure_enabled()?;

        let post = self.collaborators.directory.get_post(post_id).await?;
        self.ensure_channel_eligible(&post.channel_id).await?;

        let entry = AuditLogEntry::new(
            user_id.clone(),
            post.id,
            AuditAction::GhostRead,
            AuditMetadata::GhostRead {
                channel_id: post.channel_id,
                device_type: self.collaborators.devices.classify(device_id),
            },
            now_millis(),
        );
        self.store.save_audit(&entry).await?;
        debug!(post_id = %post_id, user_id = %user_id, "ghost read recorded");
        Ok(entry)
    }

    /// Delete the user's own receipt for a post and audit the deletion.
    ///
    /// Succeeds whether or not a receipt existed.
    pub async fn delete_receipt(&self, user_id: &UserId, post_id: &PostId) -> Result<()> {
        self.ensure_enabled()?;
        if !self.config.privacy_deletion_allowed {
            return Err(PolicyViolation::PrivacyDeletionDisabled.into());
        }

        let existing = self.store.get_receipt(post_id, user_id).await?;
        self.store.delete_receipt(post_id, user_id).await?;

        let entry = AuditLogEntry::new(
            user_id.clone(),
            post_id.clone(),
            AuditAction::PrivacyView,
            AuditMetadata::ReceiptDeleted {
                reason: DeletionReason::UserPrivacyRequest,
                existed: existing.is_some(),
                channel_id: existing.as_ref().map(|r| r.channel_id.clone()),
            },
            now_millis(),
        );
        self.store.save_audit(&entry).await?;

        if let Some(receipt) = existing {
            self.queue.submit(receipt.post_id, receipt.channel_id);
        }
        debug!(post_id = %post_id, user_id = %user_id, "receipt deleted");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read Path
    // ─────────────────────────────────────────────────────────────────────────

    /// Read state of a post as seen by `viewer_id`.
    ///
    /// If the viewer hides others' receipts, the receipts and `read_count`
    /// only cover the viewer's own read.
    pub async fn get_info(&self, post_id: &PostId, viewer_id: &UserId) -> Result<ReceiptInfo> {
        self.ensure_enabled()?;

        let post = self.collaborators.directory.get_post(post_id).await?;
        let receipts = self.store.list_receipts_for_post(post_id).await?;
        let total_users = self.store.count_channel_members(&post.channel_id).await?;
        let settings = self.user_settings(viewer_id).await?;

        Ok(ReceiptInfo::from_receipts(post.id, post.channel_id, receipts, total_users)
            .apply_privacy(viewer_id, settings.visibility))
    }

    /// [`get_info`](Self::get_info) for several posts.
    ///
    /// Posts that cannot be resolved are left out of the result.
    pub async fn get_info_batch(
        &self,
        post_ids: &[PostId],
        viewer_id: &UserId,
    ) -> Result<Vec<ReceiptInfo>> {
        self.ensure_enabled()?;

        let settings = self.user_settings(viewer_id).await?;
        let mut seen = HashSet::new();
        let distinct: Vec<PostId> = post_ids
            .iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();
        let mut grouped = self.store.list_receipts_for_posts(&distinct).await?;
        let mut member_counts: HashMap<ChannelId, u64> = HashMap::new();
        let mut infos = Vec::with_capacity(distinct.len());

        for post_id in &distinct {
            let post = match self.collaborators.directory.get_post(post_id).await {
                Ok(post) => post,
                Err(e) => {
                    debug!(post_id = %post_id, error = %e, "info batch skipped post");
                    continue;
                }
            };

            let total_users = match member_counts.get(&post.channel_id) {
                Some(n) => *n,
                None => match self.store.count_channel_members(&post.channel_id).await {
                    Ok(n) => {
                        member_counts.insert(post.channel_id.clone(), n);
                        n
                    }
                    Err(e) => {
                        warn!(post_id = %post_id, error = %e, "info batch skipped post");
                        continue;
                    }
                },
            };

            let receipts = grouped.remove(post_id).unwrap_or_default();
            infos.push(
                ReceiptInfo::from_receipts(post.id, post.channel_id, receipts, total_users)
                    .apply_privacy(viewer_id, settings.visibility),
            );
        }

        Ok(infos)
    }

    /// Summaries of a channel updated at or after `since` (0 for all).
    pub async fn get_channel_summaries(
        &self,
        channel_id: &ChannelId,
        viewer_id: &UserId,
        since: i64,
    ) -> Result<Vec<Summary>> {
        self.ensure_enabled()?;
        self.ensure_channel_eligible(channel_id).await?;

        let summaries = self
            .store
            .list_summaries_for_channel(channel_id, since)
            .await?;
        debug!(
            channel_id = %channel_id,
            viewer_id = %viewer_id,
            count = summaries.len(),
            "channel summaries fetched"
        );
        Ok(summaries)
    }

    /// The user's own receipts, newest first.
    ///
    /// `limit` is clamped to the configured maximum; 0 means the maximum.
    pub async fn get_user_history(
        &self,
        user_id: &UserId,
        channel_id: Option<&ChannelId>,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Receipt>> {
        self.ensure_enabled()?;

        let limit = self.config.history_limit(limit);
        Ok(self
            .store
            .list_receipts_for_user(user_id, channel_id, since, limit)
            .await?)
    }

    /// The user's audit entries, newest first.
    pub async fn audit_history(
        &self,
        user_id: &UserId,
        since: i64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>> {
        self.ensure_enabled()?;

        let limit = self.config.history_limit(limit);
        Ok(self.store.list_audit(user_id, since, limit).await?)
    }

    pub async fn is_read_by(&self, post_id: &PostId, user_id: &UserId) -> Result<bool> {
        self.ensure_enabled()?;
        Ok(self.store.is_read_by(post_id, user_id).await?)
    }

    /// Latest read time of the user anywhere in the channel.
    pub async fn last_read_at(
        &self,
        channel_id: &ChannelId,
        user_id: &UserId,
    ) -> Result<Option<i64>> {
        self.ensure_enabled()?;
        Ok(self.store.last_read_at(channel_id, user_id).await?)
    }

    /// Posts in the channel created at or after `since` that the user has
    /// no receipt for. Only the newest `unread_post_window` posts count.
    pub async fn unread_count(
        &self,
        channel_id: &ChannelId,
        user_id: &UserId,
        since: i64,
    ) -> Result<u64> {
        self.ensure_enabled()?;
        self.ensure_channel_eligible(channel_id).await?;

        let posts: Vec<PostId> = self
            .collaborators
            .directory
            .recent_posts(channel_id, self.config.unread_post_window)
            .await?
            .into_iter()
            .filter(|p| p.create_at >= since)
            .map(|p| p.id)
            .collect();
        if posts.is_empty() {
            return Ok(0);
        }

        let receipts = self.store.list_receipts_for_posts(&posts).await?;
        let unread = posts
            .iter()
            .filter(|post_id| {
                !receipts
                    .get(*post_id)
                    .is_some_and(|rs| rs.iter().any(|r| &r.user_id == user_id))
            })
            .count() as u64;
        debug!(
            channel_id = %channel_id,
            user_id = %user_id,
            scanned = posts.len(),
            count = unread,
            "unread posts counted"
        );
        Ok(unread)
    }

    /// Receipt totals for a channel.
    pub async fn channel_stats(&self, channel_id: &ChannelId) -> Result<ChannelStats> {
        self.ensure_enabled()?;
        self.ensure_channel_eligible(channel_id).await?;

        let total_receipts = self.store.count_receipts_for_channel(channel_id).await?;
        Ok(ChannelStats {
            channel_id: channel_id.clone(),
            total_receipts,
            computed_at: now_millis(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    //
    // Purges, retention cleanup, and anonymization run with the feature
    // switched off so stored data can still be removed after disabling.
    // ─────────────────────────────────────────────────────────────────────────

    /// Reconstruct receipts for a channel from member view times.
    pub async fn backfill_channel(&self, channel_id: &ChannelId) -> Result<BackfillReport> {
        self.ensure_enabled()?;
        self.backfill.backfill_channel(channel_id).await
    }

    /// Remove every receipt and the summary of a post.
    ///
    /// Waits for refreshes already queued so none of them writes the summary
    /// back after it is deleted.
    pub async fn purge_post(&self, post_id: &PostId) -> Result<u64> {
        let removed = self.store.delete_receipts_for_post(post_id).await?;
        self.queue.flush().await;
        self.store.delete_summary(post_id).await?;
        info!(post_id = %post_id, count = removed, "post receipts purged");
        Ok(removed)
    }

    /// Remove every receipt and summary of a channel.
    pub async fn purge_channel(&self, channel_id: &ChannelId) -> Result<u64> {
        let removed = self.store.delete_receipts_for_channel(channel_id).await?;
        self.queue.flush().await;
        for summary in self.store.list_summaries_for_channel(channel_id, 0).await? {
            self.store.delete_summary(&summary.post_id).await?;
        }
        info!(channel_id = %channel_id, count = removed, "channel receipts purged");
        Ok(removed)
    }

    /// Remove every receipt of a user and refresh the affected summaries.
    pub async fn purge_user(&self, user_id: &UserId) -> Result<u64> {
        let affected = self
            .store
            .list_receipts_for_user(user_id, None, 0, usize::MAX)
            .await?;
        let removed = self.store.delete_receipts_for_user(user_id).await?;

        for receipt in affected {
            self.queue.submit(receipt.post_id, receipt.channel_id);
        }
        info!(user_id = %user_id, count = removed, "user receipts purged");
        Ok(removed)
    }

    /// Delete receipts created before the retention window ending at `now`
    /// and refresh the summaries of the affected posts.
    pub async fn cleanup_expired(&self, now: i64) -> Result<u64> {
        let Some(cutoff) = self.config.retention_cutoff(now) else {
            return Ok(0);
        };
        let expired = self.store.delete_receipts_created_before(cutoff).await?;

        let mut touched: BTreeMap<PostId, ChannelId> = BTreeMap::new();
        for receipt in &expired {
            touched
                .entry(receipt.post_id.clone())
                .or_insert_with(|| receipt.channel_id.clone());
        }
        for (post_id, channel_id) in touched {
            self.queue.submit(post_id, channel_id);
        }
        info!(cutoff, count = expired.len(), "expired receipts removed");
        Ok(expired.len() as u64)
    }

    /// Strip device and session identifiers from a user's receipts.
    pub async fn anonymize_user(&self, user_id: &UserId) -> Result<u64> {
        let touched = self.store.anonymize_receipts_for_user(user_id).await?;
        info!(user_id = %user_id, count = touched, "user receipts anonymized");
        Ok(touched)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Policy
    // ─────────────────────────────────────────────────────────────────────────

    fn ensure_enabled(&self) -> Result<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(ServiceError::FeatureDisabled)
        }
    }

    async fn channel_eligible(&self, channel_id: &ChannelId) -> Result<bool> {
        let channel = self.collaborators.directory.get_channel(channel_id).await?;
        Ok(self.config.is_channel_eligible(channel.channel_type))
    }

    async fn ensure_channel_eligible(&self, channel_id: &ChannelId) -> Result<()> {
        if self.channel_eligible(channel_id).await? {
            Ok(())
        } else {
            Err(PolicyViolation::ChannelIneligible.into())
        }
    }

    async fn user_settings(&self, user_id: &UserId) -> Result<UserReceiptSettings> {
        let preferences = self
            .collaborators
            .preferences
            .get_user_preferences(user_id)
            .await?;
        let (settings, ignored) =
            UserReceiptSettings::resolve(self.config.default_receipt_mode, &preferences);
        for pref in ignored {
            warn!(
                user_id = %user_id,
                name = %pref.name,
                value = %pref.value,
                "ignoring unrecognised read receipt preference"
            );
        }
        Ok(settings)
    }

    async fn ensure_opted_in(&self, user_id: &UserId) -> Result<()> {
        if self.user_settings(user_id).await?.opted_out() {
            Err(PolicyViolation::UserOptedOut.into())
        } else {
            Ok(())
        }
    }

    async fn publish(&self, event: ReceiptEvent) {
        let name = event.name();
        let channel_id = event.channel_id().clone();
        if let Err(e) = self.collaborators.notifications.publish(event).await {
            warn!(event = name, channel_id = %channel_id, error = %e, "notification publish failed");
        }
    }

    async fn record_bulk_read(&self, user_id: &UserId, channel_id: &ChannelId, receipts: &[Receipt]) {
        let Some(first) = receipts.first() else {
            return;
        };
        let entry = AuditLogEntry::new(
            user_id.clone(),
            first.post_id.clone(),
            AuditAction::BulkRead,
            AuditMetadata::BulkRead {
                channel_id: channel_id.clone(),
                post_count: receipts.len() as u64,
            },
            now_millis(),
        );
        if let Err(e) = self.store.save_audit(&entry).await {
            warn!(user_id = %user_id, channel_id = %channel_id, error = %e, "bulk read audit failed");
        }
    }
}

//! Test fixtures and helpers.
//!
//! [`ServiceFixture`] wires a [`ReceiptService`] over in-memory collaborators
//! and keeps handles to each of them so tests can seed data and inspect
//! side effects.

use std::sync::Arc;

use readtrack::collaborators::memory::{MemoryDirectory, MemoryPreferences, RecordingSink};
use readtrack::collaborators::{DeviceIdClassifier, StoreMembership};
use readtrack::{Collaborators, ReceiptConfig, ReceiptService};
use readtrack_core::{
    Channel, ChannelId, ChannelMember, ChannelType, Post, PostId, Preference, UserId,
};
use readtrack_store::{MemoryStore, ReceiptStore};

/// A fully wired service plus handles to its collaborators.
pub struct ServiceFixture<S: ReceiptStore = MemoryStore> {
    pub service: ReceiptService<S>,
    pub store: Arc<S>,
    pub directory: Arc<MemoryDirectory>,
    pub preferences: Arc<MemoryPreferences>,
    pub sink: Arc<RecordingSink>,
}

impl ServiceFixture<MemoryStore> {
    /// In-memory store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ReceiptConfig::default())
    }

    pub fn with_config(config: ReceiptConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }
}

impl Default for ServiceFixture<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ReceiptStore + 'static> ServiceFixture<S> {
    /// Wire the service over an existing store.
    ///
    /// Membership is served from the store's member rows.
    pub fn with_store(store: Arc<S>, config: ReceiptConfig) -> Self {
        let directory = Arc::new(MemoryDirectory::new());
        let preferences = Arc::new(MemoryPreferences::new());
        let sink = Arc::new(RecordingSink::new());

        let collaborators = Collaborators {
            directory: directory.clone(),
            membership: Arc::new(StoreMembership::new(store.clone())),
            preferences: preferences.clone(),
            devices: Arc::new(DeviceIdClassifier),
            notifications: sink.clone(),
        };

        Self {
            service: ReceiptService::with_shared_store(store.clone(), collaborators, config),
            store,
            directory,
            preferences,
            sink,
        }
    }

    /// Register a channel.
    pub fn channel(&self, id: &str, channel_type: ChannelType) -> ChannelId {
        let channel_id = ChannelId::new(id);
        self.directory.add_channel(Channel {
            id: channel_id.clone(),
            channel_type,
        });
        channel_id
    }

    /// Register a post.
    pub fn post(&self, id: &str, channel_id: &ChannelId, author: &str, create_at: i64) -> PostId {
        let post_id = PostId::new(id);
        self.directory.add_post(Post {
            id: post_id.clone(),
            channel_id: channel_id.clone(),
            user_id: UserId::new(author),
            create_at,
        });
        post_id
    }

    /// Add a member row. `last_viewed_at` of 0 means never viewed.
    pub async fn member(&self, channel_id: &ChannelId, user: &str, last_viewed_at: i64) -> UserId {
        let user_id = UserId::new(user);
        self.store
            .upsert_channel_member(&ChannelMember::new(
                channel_id.clone(),
                user_id.clone(),
                last_viewed_at,
            ))
            .await
            .unwrap_or_else(|e| panic!("failed to seed member {}: {}", user, e));
        user_id
    }

    /// Add several members who have never viewed the channel.
    pub async fn members(&self, channel_id: &ChannelId, users: &[&str]) -> Vec<UserId> {
        let mut ids = Vec::with_capacity(users.len());
        for user in users {
            ids.push(self.member(channel_id, user, 0).await);
        }
        ids
    }

    /// Set a read receipt preference for a user.
    pub fn preference(&self, user_id: &UserId, name: &str, value: &str) {
        self.preferences.set(
            user_id,
            Preference::new(readtrack_core::settings::PREFERENCE_CATEGORY, name, value),
        );
    }
}

/// A direct message channel `dm` with members `alice` and `bob`, and one
/// post from `alice`.
pub async fn direct_message_fixture() -> (ServiceFixture, ChannelId, PostId) {
    let fixture = ServiceFixture::new();
    let dm = fixture.channel("dm", ChannelType::Direct);
    fixture.members(&dm, &["alice", "bob"]).await;
    let post = fixture.post("hello", &dm, "alice", 1);
    (fixture, dm, post)
}

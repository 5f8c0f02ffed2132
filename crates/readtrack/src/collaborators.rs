//! Interfaces to the platform around the receipt service.
//!
//! The service never owns posts, channels, memberships, or preferences. It
//! reads them through these traits, and publishes events through
//! [`NotificationSink`]. The [`memory`] module has in-process
//! implementations used by tests and embedded hosts.

use std::sync::Arc;

use async_trait::async_trait;
use readtrack_core::{
    Channel, ChannelId, ChannelMember, DeviceType, Post, PostId, Preference, UserId,
};
use readtrack_store::ReceiptStore;
use thiserror::Error;

use crate::events::ReceiptEvent;

/// Failure of an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The requested entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The collaborator could not answer.
    #[error("{0}")]
    Unavailable(String),
}

/// Result type for collaborator calls.
pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Resolves posts and channels.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn get_post(&self, post_id: &PostId) -> CollaboratorResult<Post>;

    async fn get_channel(&self, channel_id: &ChannelId) -> CollaboratorResult<Channel>;

    /// The newest `limit` posts of a channel, newest first.
    async fn recent_posts(&self, channel_id: &ChannelId, limit: usize)
        -> CollaboratorResult<Vec<Post>>;
}

/// Lists channel members with their last-viewed time.
#[async_trait]
pub trait MembershipResolver: Send + Sync {
    async fn list_members(&self, channel_id: &ChannelId) -> CollaboratorResult<Vec<ChannelMember>>;
}

/// Looks up a user's preference rows.
#[async_trait]
pub trait PreferenceResolver: Send + Sync {
    async fn get_user_preferences(&self, user_id: &UserId) -> CollaboratorResult<Vec<Preference>>;
}

/// Maps a device/session identifier to a [`DeviceType`].
pub trait DeviceClassifier: Send + Sync {
    fn classify(&self, device_id: Option<&str>) -> DeviceType;
}

/// Receives read receipt notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: ReceiptEvent) -> CollaboratorResult<()>;
}

/// Classifies by substring of the device id.
///
/// No id is `unknown`; an id containing `mobile` or `desktop` maps to that
/// type; anything else is `web`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceIdClassifier;

impl DeviceClassifier for DeviceIdClassifier {
    fn classify(&self, device_id: Option<&str>) -> DeviceType {
        match device_id {
            None | Some("") => DeviceType::Unknown,
            Some(id) => {
                let id = id.to_ascii_lowercase();
                if id.contains("mobile") {
                    DeviceType::Mobile
                } else if id.contains("desktop") {
                    DeviceType::Desktop
                } else {
                    DeviceType::Web
                }
            }
        }
    }
}

/// Serves membership from the receipt store's `channel_members` rows.
pub struct StoreMembership<S> {
    store: Arc<S>,
}

impl<S: ReceiptStore> StoreMembership<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: ReceiptStore> MembershipResolver for StoreMembership<S> {
    async fn list_members(&self, channel_id: &ChannelId) -> CollaboratorResult<Vec<ChannelMember>> {
        self.store
            .list_channel_members(channel_id)
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))
    }
}

/// In-process collaborator implementations.
pub mod memory {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, PoisonError, RwLock};

    use super::*;

    /// Posts and channels held in maps.
    #[derive(Default)]
    pub struct MemoryDirectory {
        posts: RwLock<HashMap<PostId, Post>>,
        channels: RwLock<HashMap<ChannelId, Channel>>,
    }

    impl MemoryDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_channel(&self, channel: Channel) {
            self.channels
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(channel.id.clone(), channel);
        }

        pub fn add_post(&self, post: Post) {
            self.posts
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(post.id.clone(), post);
        }

        pub fn remove_post(&self, post_id: &PostId) {
            self.posts
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(post_id);
        }
    }

    #[async_trait]
    impl Directory for MemoryDirectory {
        async fn get_post(&self, post_id: &PostId) -> CollaboratorResult<Post> {
            self.posts
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(post_id)
                .cloned()
                .ok_or_else(|| CollaboratorError::NotFound(format!("post {}", post_id)))
        }

        async fn get_channel(&self, channel_id: &ChannelId) -> CollaboratorResult<Channel> {
            self.channels
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(channel_id)
                .cloned()
                .ok_or_else(|| CollaboratorError::NotFound(format!("channel {}", channel_id)))
        }

        async fn recent_posts(
            &self,
            channel_id: &ChannelId,
            limit: usize,
        ) -> CollaboratorResult<Vec<Post>> {
            let posts = self.posts.read().unwrap_or_else(PoisonError::into_inner);
            let mut out: Vec<Post> = posts
                .values()
                .filter(|p| &p.channel_id == channel_id)
                .cloned()
                .collect();
            out.sort_by(|a, b| b.create_at.cmp(&a.create_at).then_with(|| a.id.cmp(&b.id)));
            out.truncate(limit);
            Ok(out)
        }
    }

    /// Preference rows keyed by user.
    #[derive(Default)]
    pub struct MemoryPreferences {
        rows: RwLock<HashMap<UserId, Vec<Preference>>>,
    }

    impl MemoryPreferences {
        pub fn new() -> Self {
            Self::default()
        }

        /// Set a preference, replacing any row with the same category and name.
        pub fn set(&self, user_id: &UserId, preference: Preference) {
            let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
            let prefs = rows.entry(user_id.clone()).or_default();
            prefs.retain(|p| !(p.category == preference.category && p.name == preference.name));
            prefs.push(preference);
        }
    }

    #[async_trait]
    impl PreferenceResolver for MemoryPreferences {
        async fn get_user_preferences(
            &self,
            user_id: &UserId,
        ) -> CollaboratorResult<Vec<Preference>> {
            Ok(self
                .rows
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(user_id)
                .cloned()
                .unwrap_or_default())
        }
    }

    /// Records every published event. Can be switched to fail.
    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<ReceiptEvent>>,
        failing: AtomicBool,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<ReceiptEvent> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn publish(&self, event: ReceiptEvent) -> CollaboratorResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(CollaboratorError::Unavailable("sink offline".into()));
            }
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
            Ok(())
        }
    }
}

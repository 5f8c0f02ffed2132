//! Value types supplied by the surrounding platform: posts, channels,
//! memberships, and preferences.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{ChannelId, PostId, UserId};

/// A post as resolved by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub channel_id: ChannelId,
    /// Author of the post.
    pub user_id: UserId,
    /// Creation time (Unix ms).
    pub create_at: i64,
}

/// Kind of channel a post lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// One-to-one conversation.
    Direct,
    /// Small group conversation.
    Group,
    /// Public team channel.
    Open,
    /// Private team channel.
    Private,
}

impl ChannelType {
    /// Direct and group conversations.
    pub fn is_conversation(self) -> bool {
        matches!(self, Self::Direct | Self::Group)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Open => "open",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "group" => Ok(Self::Group),
            "open" => Ok(Self::Open),
            "private" => Ok(Self::Private),
            other => Err(ValidationError::InvalidChannelType(other.to_string())),
        }
    }
}

/// A channel as resolved by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub channel_type: ChannelType,
}

/// Membership of a user in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMember {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    /// Last time the member viewed the channel (Unix ms); 0 if never.
    pub last_viewed_at: i64,
}

impl ChannelMember {
    pub fn new(channel_id: ChannelId, user_id: UserId, last_viewed_at: i64) -> Self {
        Self {
            channel_id,
            user_id,
            last_viewed_at,
        }
    }

    /// True if the platform has recorded a view for this member.
    pub fn has_viewed(&self) -> bool {
        self.last_viewed_at > 0
    }
}

/// A single user preference row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    pub category: String,
    pub name: String,
    pub value: String,
}

impl Preference {
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            value: value.into(),
        }
    }
}

//! Receipt: the record that one user read one post at one time.
//!
//! A receipt is keyed by `(post_id, user_id)`. Marking the same post as read
//! again overwrites the timing and device fields instead of appending.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{ChannelId, PostId, UserId};

/// The kind of device a read was recorded from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Web,
    #[default]
    Unknown,
}

impl DeviceType {
    /// All device types, in storage order.
    pub const ALL: [DeviceType; 4] = [
        DeviceType::Desktop,
        DeviceType::Mobile,
        DeviceType::Web,
        DeviceType::Unknown,
    ];

    /// The wire/storage name of this device type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Web => "web",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "desktop" => Ok(Self::Desktop),
            "mobile" => Ok(Self::Mobile),
            "web" => Ok(Self::Web),
            "unknown" | "" => Ok(Self::Unknown),
            other => Err(ValidationError::InvalidDeviceType(other.to_string())),
        }
    }
}

/// A single read receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// The post that was read.
    pub post_id: PostId,

    /// The user who read it.
    pub user_id: UserId,

    /// The channel the post belongs to.
    pub channel_id: ChannelId,

    /// When the post was read (Unix ms, > 0).
    pub read_at: i64,

    /// When this row was written (Unix ms, > 0).
    pub created_at: i64,

    /// Client-supplied device identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Classified device kind.
    #[serde(default)]
    pub device_type: DeviceType,

    /// Session the read was recorded under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Receipt {
    /// The `(post_id, user_id)` key this receipt is unique under.
    pub fn key(&self) -> (&PostId, &UserId) {
        (&self.post_id, &self.user_id)
    }

    /// Strip device and session identifiers.
    pub fn anonymize(&mut self) {
        self.device_id = None;
        self.session_id = None;
        self.device_type = DeviceType::Unknown;
    }
}

/// Builder for creating receipts.
pub struct ReceiptBuilder {
    post_id: PostId,
    user_id: UserId,
    channel_id: ChannelId,
    read_at: i64,
    created_at: i64,
    device_id: Option<String>,
    device_type: DeviceType,
    session_id: Option<String>,
}

impl ReceiptBuilder {
    /// Start building a receipt for a post read by a user.
    pub fn new(post_id: PostId, user_id: UserId, channel_id: ChannelId) -> Self {
        Self {
            post_id,
            user_id,
            channel_id,
            read_at: 0,
            created_at: 0,
            device_id: None,
            device_type: DeviceType::Unknown,
            session_id: None,
        }
    }

    /// Set the read time.
    pub fn read_at(mut self, ts: i64) -> Self {
        self.read_at = ts;
        self
    }

    /// Set the row creation time.
    pub fn created_at(mut self, ts: i64) -> Self {
        self.created_at = ts;
        self
    }

    /// Set the device id. Empty strings are treated as absent.
    pub fn device_id(mut self, device_id: Option<impl Into<String>>) -> Self {
        self.device_id = device_id.map(Into::into).filter(|d| !d.is_empty());
        self
    }

    /// Set the device type.
    pub fn device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    /// Set the session id.
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Finish the receipt. Use [`crate::validate_receipt`] before persisting.
    pub fn build(self) -> Receipt {
        Receipt {
            post_id: self.post_id,
            user_id: self.user_id,
            channel_id: self.channel_id,
            read_at: self.read_at,
            created_at: self.created_at,
            device_id: self.device_id,
            device_type: self.device_type,
            session_id: self.session_id,
        }
    }
}

//! Audit trail entries for privacy-sensitive actions.
//!
//! Entries are append-only. Metadata is a closed, versioned record rather
//! than an open key/value bag so that stored entries stay typed.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::receipt::DeviceType;
use crate::types::{ChannelId, PostId, UserId};

/// Current version of [`AuditMetadata`].
pub const AUDIT_METADATA_VERSION: u16 = 1;

/// Unique identifier of an audit entry (16 random bytes, hex encoded).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditId(String);

impl AuditId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wrap an existing id (e.g. one loaded from storage).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuditId({})", self.0)
    }
}

impl fmt::Display for AuditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of action was audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Read,
    GhostRead,
    BulkRead,
    PrivacyView,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::GhostRead => "ghost_read",
            Self::BulkRead => "bulk_read",
            Self::PrivacyView => "privacy_view",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "ghost_read" => Ok(Self::GhostRead),
            "bulk_read" => Ok(Self::BulkRead),
            "privacy_view" => Ok(Self::PrivacyView),
            other => Err(ValidationError::InvalidAuditAction(other.to_string())),
        }
    }
}

/// Why a receipt was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionReason {
    UserPrivacyRequest,
}

/// Structured metadata attached to an audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditMetadata {
    /// A user removed their own receipt.
    ReceiptDeleted {
        reason: DeletionReason,
        /// Whether a stored receipt existed at deletion time.
        existed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel_id: Option<ChannelId>,
    },
    /// A post was read without emitting a receipt.
    GhostRead {
        channel_id: ChannelId,
        device_type: DeviceType,
    },
    /// Several posts were marked read in one call.
    BulkRead { channel_id: ChannelId, post_count: u64 },
}

/// Immutable record of a privacy-sensitive action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: AuditId,
    pub user_id: UserId,
    pub post_id: PostId,
    pub action: AuditAction,
    pub metadata_version: u16,
    pub metadata: AuditMetadata,
    pub created_at: i64,
}

impl AuditLogEntry {
    /// Create a new entry with a fresh id and the current metadata version.
    pub fn new(
        user_id: UserId,
        post_id: PostId,
        action: AuditAction,
        metadata: AuditMetadata,
        created_at: i64,
    ) -> Self {
        Self {
            id: AuditId::generate(),
            user_id,
            post_id,
            action,
            metadata_version: AUDIT_METADATA_VERSION,
            metadata,
            created_at,
        }
    }
}

//! # Readtrack Core
//!
//! Pure data model for per-post read tracking: receipts, summaries, audit
//! entries, and the privacy filter applied on read.
//!
//! This crate contains no I/O and no storage. It is pure computation over
//! plain data.
//!
//! ## Key Types
//!
//! - [`Receipt`] - One user read one post at one time, keyed by `(post, user)`
//! - [`Summary`] - Precomputed read-count rollup for a post
//! - [`ReceiptInfo`] - The per-post view handed to a viewer
//! - [`AuditLogEntry`] - Append-only record of a privacy-sensitive action
//! - [`BatchRequest`] - Input for bulk mark-as-read
//!
//! ## Privacy
//!
//! [`privacy::filter`] reduces a receipt set to what a viewer may see. See
//! [`VisibilityMode`].

pub mod audit;
pub mod batch;
pub mod directory;
pub mod error;
pub mod info;
pub mod privacy;
pub mod receipt;
pub mod settings;
pub mod summary;
pub mod types;
pub mod validation;

pub use audit::{
    AuditAction, AuditId, AuditLogEntry, AuditMetadata, DeletionReason, AUDIT_METADATA_VERSION,
};
pub use batch::{BatchRequest, MAX_BATCH_SIZE};
pub use directory::{Channel, ChannelMember, ChannelType, Post, Preference};
pub use error::ValidationError;
pub use info::ReceiptInfo;
pub use privacy::VisibilityMode;
pub use receipt::{DeviceType, Receipt, ReceiptBuilder};
pub use settings::{ReceiptMode, UserReceiptSettings};
pub use summary::{ChannelStats, Summary};
pub use types::{is_valid_id, now_millis, ChannelId, PostId, UserId, MAX_ID_LEN};
pub use validation::{validate_batch_request, validate_receipt};

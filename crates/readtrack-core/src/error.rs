//! Error types for the read tracking core.

use thiserror::Error;

/// Validation errors for receipts and requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid {field}: {value:?}")]
    InvalidId { field: &'static str, value: String },

    #[error("{field} must be a positive timestamp")]
    ZeroTimestamp { field: &'static str },

    #[error("invalid device type: {0}")]
    InvalidDeviceType(String),

    #[error("batch request contains no post ids")]
    EmptyBatch,

    #[error("batch of {len} posts exceeds maximum of {max}")]
    BatchTooLarge { len: usize, max: usize },

    #[error("invalid audit action: {0}")]
    InvalidAuditAction(String),

    #[error("invalid channel type: {0}")]
    InvalidChannelType(String),
}

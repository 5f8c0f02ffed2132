//! Error types for the read receipt service.

use readtrack_core::ValidationError;
use readtrack_store::StoreError;
use thiserror::Error;

use crate::collaborators::CollaboratorError;

/// Which policy rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    /// The channel type does not take read receipts.
    #[error("channel is not eligible for read receipts")]
    ChannelIneligible,

    /// The acting user has turned read receipts off.
    #[error("user has opted out of read receipts")]
    UserOptedOut,

    /// Receipt deletion is administratively disabled.
    #[error("privacy deletion is disabled")]
    PrivacyDeletionDisabled,
}

/// Errors that can occur during service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The read receipt feature is switched off.
    #[error("read receipts are disabled")]
    FeatureDisabled,

    /// A configured policy rejected the request.
    #[error("policy violation: {0}")]
    PolicyViolation(PolicyViolation),

    /// Malformed receipt or request.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A referenced post or channel does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Persistence failure.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// An external resolver failed for a reason other than absence.
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

impl ServiceError {
    /// True if retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Storage(_) | ServiceError::Collaborator(_))
    }
}

impl From<PolicyViolation> for ServiceError {
    fn from(v: PolicyViolation) -> Self {
        ServiceError::PolicyViolation(v)
    }
}

impl From<CollaboratorError> for ServiceError {
    fn from(e: CollaboratorError) -> Self {
        match e {
            CollaboratorError::NotFound(what) => ServiceError::NotFound(what),
            CollaboratorError::Unavailable(why) => ServiceError::Collaborator(why),
        }
    }
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

//! Receipt and request validation.

use crate::batch::BatchRequest;
use crate::error::ValidationError;
use crate::receipt::Receipt;
use crate::types::is_valid_id;

fn check_id(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if is_valid_id(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidId {
            field,
            value: value.to_string(),
        })
    }
}

/// Validate a receipt before it is persisted.
///
/// This performs:
/// - Id checks on post, user, and channel
/// - Non-zero `read_at` and `created_at`
///
/// The device type is an enum and is checked when parsed from storage or
/// wire input.
pub fn validate_receipt(receipt: &Receipt) -> Result<(), ValidationError> {
    check_id("post_id", receipt.post_id.as_str())?;
    check_id("user_id", receipt.user_id.as_str())?;
    check_id("channel_id", receipt.channel_id.as_str())?;

    if receipt.read_at <= 0 {
        return Err(ValidationError::ZeroTimestamp { field: "read_at" });
    }
    if receipt.created_at <= 0 {
        return Err(ValidationError::ZeroTimestamp { field: "created_at" });
    }

    Ok(())
}

/// Validate the shape of a batch request.
///
/// Checks that there is at least one post, no more than `max_batch_size`,
/// and that every id is well formed.
pub fn validate_batch_request(
    request: &BatchRequest,
    max_batch_size: usize,
) -> Result<(), ValidationError> {
    if request.post_ids.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    if request.post_ids.len() > max_batch_size {
        return Err(ValidationError::BatchTooLarge {
            len: request.post_ids.len(),
            max: max_batch_size,
        });
    }
    for post_id in &request.post_ids {
        check_id("post_id", post_id.as_str())?;
    }
    if let Some(channel_id) = &request.channel_id {
        check_id("channel_id", channel_id.as_str())?;
    }
    if request.read_at < 0 {
        return Err(ValidationError::ZeroTimestamp { field: "read_at" });
    }
    Ok(())
}

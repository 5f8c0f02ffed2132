//! Privacy filtering: reduce a receipt set to what a viewer may see.

use serde::{Deserialize, Serialize};

use crate::receipt::Receipt;
use crate::types::UserId;

/// Whether a viewer sees other users' receipts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityMode {
    /// All receipts are visible.
    #[default]
    ShowAll,
    /// Only the viewer's own receipt is visible.
    ShowNone,
}

impl VisibilityMode {
    /// Parse the preference value (`all` / `none`).
    pub fn from_preference(value: &str) -> Option<Self> {
        match value {
            "all" => Some(Self::ShowAll),
            "none" => Some(Self::ShowNone),
            _ => None,
        }
    }
}

/// Filter `receipts` down to what `viewer` may see under `mode`.
///
/// Order is preserved. The function is total: any input, including an empty
/// list, yields a valid output.
pub fn filter(receipts: Vec<Receipt>, viewer: &UserId, mode: VisibilityMode) -> Vec<Receipt> {
    match mode {
        VisibilityMode::ShowAll => receipts,
        VisibilityMode::ShowNone => receipts
            .into_iter()
            .filter(|r| &r.user_id == viewer)
            .collect(),
    }
}

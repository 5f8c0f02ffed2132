//! Per-user read receipt settings derived from preference rows.

use serde::{Deserialize, Serialize};

use crate::directory::Preference;
use crate::privacy::VisibilityMode;

/// Preference category holding read receipt settings.
pub const PREFERENCE_CATEGORY: &str = "read_receipts";
/// Preference name for [`ReceiptMode`].
pub const PREF_RECEIPT_MODE: &str = "receipt_mode";
/// Preference name for [`VisibilityMode`].
pub const PREF_SHOW_OTHERS: &str = "show_others_receipts";

/// Whether a user emits read receipts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptMode {
    #[default]
    Enabled,
    Disabled,
}

impl ReceiptMode {
    pub fn from_preference(value: &str) -> Option<Self> {
        match value {
            "enabled" => Some(Self::Enabled),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// Effective settings for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserReceiptSettings {
    pub mode: ReceiptMode,
    pub visibility: VisibilityMode,
}

impl UserReceiptSettings {
    /// Resolve settings from preference rows on top of `default_mode`.
    ///
    /// Returns the settings plus any read receipt preferences whose value
    /// was not recognised; those are left at their defaults.
    pub fn resolve<'a>(
        default_mode: ReceiptMode,
        preferences: &'a [Preference],
    ) -> (Self, Vec<&'a Preference>) {
        let mut settings = Self {
            mode: default_mode,
            visibility: VisibilityMode::ShowAll,
        };
        let mut ignored = Vec::new();

        for pref in preferences.iter().filter(|p| p.category == PREFERENCE_CATEGORY) {
            match pref.name.as_str() {
                PREF_RECEIPT_MODE => match ReceiptMode::from_preference(&pref.value) {
                    Some(mode) => settings.mode = mode,
                    None => ignored.push(pref),
                },
                PREF_SHOW_OTHERS => match VisibilityMode::from_preference(&pref.value) {
                    Some(visibility) => settings.visibility = visibility,
                    None => ignored.push(pref),
                },
                _ => {}
            }
        }

        (settings, ignored)
    }

    pub fn opted_out(&self) -> bool {
        self.mode == ReceiptMode::Disabled
    }
}

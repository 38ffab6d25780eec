use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of asking the ledger whether an operation has resolved.
///
/// `Included { success: false }` means the operation made it onto the ledger
/// and reverted there. It is distinct from `NotFound` (not yet visible) and
/// from a local submission error, which never produces an outcome at all.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Included { success: bool },
    NotFound,
}

impl Outcome {
    pub fn confirmed() -> Self {
        Self::Included { success: true }
    }

    pub fn reverted() -> Self {
        Self::Included { success: false }
    }

    /// Whether the outcome is final for the operation it describes.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Included { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Included { success: true })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Included { success: true } => "confirmed",
            Self::Included { success: false } => "reverted",
            Self::NotFound => "not_found",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A named step of the approve-then-act flow.
///
/// Exactly one phase is active at a time. `Succeeded` and `Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    SubmittingFirst,
    AwaitingFirst,
    SubmittingSecond,
    AwaitingSecond,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::SubmittingFirst => "submitting_first",
            Self::AwaitingFirst => "awaiting_first",
            Self::SubmittingSecond => "submitting_second",
            Self::AwaitingSecond => "awaiting_second",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "submitting_first" => Some(Self::SubmittingFirst),
            "awaiting_first" => Some(Self::AwaitingFirst),
            "submitting_second" => Some(Self::SubmittingSecond),
            "awaiting_second" => Some(Self::AwaitingSecond),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Phases in which an operation id is recorded and outcomes are awaited.
    pub fn is_awaiting(&self) -> bool {
        matches!(self, Self::AwaitingFirst | Self::AwaitingSecond)
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self, Self::SubmittingFirst | Self::SubmittingSecond)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::UnknownPhase(s.to_string()))
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::phase::Phase;
use crate::error::CoreError;

/// Classification of why a flow failed.
///
/// Callers choose their own copy per kind; `default_message` is a fallback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Signer or user declined before broadcast.
    SubmissionRejected,
    /// Signer cannot pay for the submission (fee balance too low).
    InsufficientResources,
    /// Second-phase action rejected because the allowance was missing or too small.
    InsufficientPermission,
    /// Included on the ledger but reported as failed.
    Reverted,
    /// Automatic confirmation never arrived and the user gave up waiting.
    Timeout,
    /// The caller cancelled the flow.
    Cancelled,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubmissionRejected => "submission_rejected",
            Self::InsufficientResources => "insufficient_resources",
            Self::InsufficientPermission => "insufficient_permission",
            Self::Reverted => "reverted",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submission_rejected" => Some(Self::SubmissionRejected),
            "insufficient_resources" => Some(Self::InsufficientResources),
            "insufficient_permission" => Some(Self::InsufficientPermission),
            "reverted" => Some(Self::Reverted),
            "timeout" => Some(Self::Timeout),
            "cancelled" => Some(Self::Cancelled),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            Self::SubmissionRejected => "The request was declined in the wallet.",
            Self::InsufficientResources => "Not enough balance to pay the network fee.",
            Self::InsufficientPermission => {
                "The spending allowance is missing or not yet visible to the contract."
            }
            Self::Reverted => "The operation was included but the ledger reported a failure.",
            Self::Timeout => "Confirmation did not arrive in time.",
            Self::Cancelled => "The operation was cancelled.",
            Self::Unknown => "Something went wrong.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::UnknownErrorKind(s.to_string()))
    }
}

/// A classified failure, recorded the moment a flow is forced into `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    /// Phase that was active when the failure was raised
    pub raised_at: Phase,
    /// Underlying message, preserved verbatim
    pub message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, raised_at: Phase) -> Self {
        Self {
            kind,
            raised_at,
            message: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Message suitable for display: the underlying message if any, else the kind's default copy.
    pub fn display_message(&self) -> &str {
        self.message
            .as_deref()
            .unwrap_or_else(|| self.kind.default_message())
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} during {}: {}", self.kind, self.raised_at, message),
            None => write!(f, "{} during {}", self.kind, self.raised_at),
        }
    }
}

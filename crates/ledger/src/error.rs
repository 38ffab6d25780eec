use thiserror::Error;

/// Failure reading from the ledger.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Failure submitting an operation. No handle was produced.
///
/// Bindings map what their signer reports onto the structured variants when
/// they can, and fall back to `Other` with the raw message otherwise.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("Submission rejected by signer: {0}")]
    Rejected(String),

    #[error("Insufficient funds for submission: {0}")]
    InsufficientFunds(String),

    #[error("Insufficient allowance: {0}")]
    InsufficientAllowance(String),

    #[error("Transport error during submission: {0}")]
    Transport(String),

    #[error("{0}")]
    Other(String),
}

impl SubmissionError {
    /// The raw message reported by the signer or transport.
    pub fn message(&self) -> &str {
        match self {
            Self::Rejected(m)
            | Self::InsufficientFunds(m)
            | Self::InsufficientAllowance(m)
            | Self::Transport(m)
            | Self::Other(m) => m,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

use commit_core::{ErrorKind, ErrorRecord, Phase};
use ledger::SubmissionError;

/// Phrases signers commonly use when they cannot pay for a submission.
/// Checked before the allowance phrases: geth reports fee shortfalls as
/// "gas required exceeds allowance".
const RESOURCE_PHRASES: &[&str] = &[
    "insufficient funds",
    "insufficient balance",
    "gas required exceeds",
    "exceeds balance",
];

const REJECTION_PHRASES: &[&str] = &[
    "user rejected",
    "user denied",
    "rejected the request",
    "request rejected",
    "user cancelled",
    "user canceled",
];

const PERMISSION_PHRASES: &[&str] = &[
    "insufficient allowance",
    "exceeds allowance",
    "allowance exceeded",
    "not approved",
];

/// Turns submission failures into classified error records, so callers pick
/// copy by `ErrorKind` instead of matching raw transport strings.
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn kind_of(error: &SubmissionError) -> ErrorKind {
        match error {
            SubmissionError::Rejected(_) => ErrorKind::SubmissionRejected,
            SubmissionError::InsufficientFunds(_) => ErrorKind::InsufficientResources,
            SubmissionError::InsufficientAllowance(_) => ErrorKind::InsufficientPermission,
            SubmissionError::Transport(_) => ErrorKind::Unknown,
            SubmissionError::Other(message) => Self::kind_from_message(message),
        }
    }

    /// Classify `error` as raised during `phase`, keeping the raw message verbatim.
    pub fn classify(error: &SubmissionError, phase: Phase) -> ErrorRecord {
        ErrorRecord::new(Self::kind_of(error), phase).with_message(error.message())
    }

    fn kind_from_message(message: &str) -> ErrorKind {
        let lowered = message.to_lowercase();
        let mentions = |phrases: &[&str]| phrases.iter().any(|p| lowered.contains(p));

        if mentions(REJECTION_PHRASES) {
            ErrorKind::SubmissionRejected
        } else if mentions(RESOURCE_PHRASES) {
            ErrorKind::InsufficientResources
        } else if mentions(PERMISSION_PHRASES) {
            ErrorKind::InsufficientPermission
        } else {
            ErrorKind::Unknown
        }
    }
}

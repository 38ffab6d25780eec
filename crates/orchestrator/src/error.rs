use commit_core::{CoreError, OperationId};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Operation {0} was already used by the first phase")]
    DuplicateOperationId(OperationId),

    #[error("Invalid flow: {0}")]
    InvalidFlow(#[from] CoreError),

    #[error("Flow {0} is no longer running")]
    FlowClosed(Uuid),

    #[error("Flow task failed: {0}")]
    FlowAborted(String),
}

impl OrchestratorError {
    /// Create an invalid transition error from two displayable phases.
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

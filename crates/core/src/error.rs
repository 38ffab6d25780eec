use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    #[error("Unknown error kind: {0}")]
    UnknownErrorKind(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub mod error_classifier;
pub mod outcome_poller;

pub use error_classifier::ErrorClassifier;
pub use outcome_poller::OutcomePoller;

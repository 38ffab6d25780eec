pub mod client;
pub mod error;
pub mod sim;

pub use client::{InclusionNotice, LedgerClient, PushSubscription};
pub use error::{LedgerError, Result, SubmissionError};
pub use sim::{SimulatedLedger, SubmissionScript};

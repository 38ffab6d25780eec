//! Core data model for two-phase ledger commits.
//!
//! Everything in this crate is plain data: identifiers, requests, phases,
//! outcomes and error records. Orchestration lives in the `orchestrator`
//! crate and the ledger capabilities in the `ledger` crate.

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::CoreError;

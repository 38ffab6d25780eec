//! Event system for two-phase commit flows
//!
//! This crate provides the event bus and event types through which flow
//! progress is broadcast to interested components (UI bridges, audit logs).

mod bus;
mod types;

pub use bus::{EventBus, FlowSubscription};
pub use types::*;

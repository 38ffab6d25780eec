//! Core abstractions shared by every flow:
//!
//! - [`FlowObserver`] - Caller-facing phase/error callbacks
//! - [`FlowCallbacks`] - Observer built from two closures
//! - [`FlowEventEmitter`] - Per-flow event emitter with sequence numbers

mod events;
mod observer;

pub use events::FlowEventEmitter;
pub use observer::{FlowCallbacks, FlowObserver, NoopObserver};

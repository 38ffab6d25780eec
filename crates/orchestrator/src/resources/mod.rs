//! RAII resource guards for automatic cleanup.
//!
//! - [`TimeoutGuard`] / [`CancelToken`] - Confirmation countdown, cancelled on drop

mod timeout_guard;

pub use timeout_guard::{CancelToken, GuardState, TimeoutGuard};

//! Cancellable countdown bounding how long a phase waits for confirmation.
//!
//! A guard moves `Armed -> Cancelled` or `Armed -> Expired`, and from
//! `Expired` only to `ManualCheckOffered`. The expiry callback runs at most
//! once per arm.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Lifecycle of a single armed countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Armed,
    Cancelled,
    Expired,
    ManualCheckOffered,
}

/// Factory for countdowns of a fixed, configured duration.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    duration: Duration,
}

impl TimeoutGuard {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Start a countdown that runs `on_expire` unless cancelled first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, on_expire: F) -> CancelToken
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let state = Arc::new(Mutex::new(GuardState::Armed));
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let task_state = Arc::clone(&state);
        let duration = self.duration;

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    let expired = {
                        let mut state = lock(&task_state);
                        if *state == GuardState::Armed {
                            *state = GuardState::Expired;
                            true
                        } else {
                            false
                        }
                    };
                    if expired {
                        debug!(timeout_ms = duration.as_millis() as u64, "Timeout guard expired");
                        on_expire().await;
                    }
                }
                // Fires on explicit cancel and when the token is dropped.
                _ = cancel_rx => {}
            }
        });

        CancelToken {
            state,
            cancel_tx: Some(cancel_tx),
        }
    }
}

/// Handle to an armed countdown.
///
/// Dropping the token cancels the countdown if it has not expired yet.
pub struct CancelToken {
    state: Arc<Mutex<GuardState>>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl CancelToken {
    pub fn state(&self) -> GuardState {
        *lock(&self.state)
    }

    pub fn is_armed(&self) -> bool {
        self.state() == GuardState::Armed
    }

    /// Stop the countdown. Returns `true` only for the call that actually
    /// cancelled an armed guard; later calls and calls after expiry are no-ops.
    pub fn cancel(&mut self) -> bool {
        let cancelled = {
            let mut state = lock(&self.state);
            if *state == GuardState::Armed {
                *state = GuardState::Cancelled;
                true
            } else {
                false
            }
        };
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        cancelled
    }

    /// `Expired -> ManualCheckOffered`. Returns `false` from any other state.
    pub fn offer_manual_check(&self) -> bool {
        let mut state = lock(&self.state);
        if *state == GuardState::Expired {
            *state = GuardState::ManualCheckOffered;
            true
        } else {
            false
        }
    }
}

impl Drop for CancelToken {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn lock(state: &Mutex<GuardState>) -> MutexGuard<'_, GuardState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

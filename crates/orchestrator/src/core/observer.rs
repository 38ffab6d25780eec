use commit_core::{ErrorRecord, Phase};
use std::sync::Arc;

/// Receives a flow's progress as it happens.
///
/// Callbacks run on the flow's task and must not block.
pub trait FlowObserver: Send + Sync {
    /// Called on every phase transition, in order.
    fn on_phase_change(&self, phase: Phase);

    /// Called exactly once if the flow fails.
    fn on_error(&self, error: &ErrorRecord);

    /// Called when the manual-check affordance appears or is withdrawn.
    fn on_manual_check(&self, available: bool) {
        let _ = available;
    }
}

impl<T: FlowObserver + ?Sized> FlowObserver for Arc<T> {
    fn on_phase_change(&self, phase: Phase) {
        (**self).on_phase_change(phase);
    }

    fn on_error(&self, error: &ErrorRecord) {
        (**self).on_error(error);
    }

    fn on_manual_check(&self, available: bool) {
        (**self).on_manual_check(available);
    }
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl FlowObserver for NoopObserver {
    fn on_phase_change(&self, _phase: Phase) {}

    fn on_error(&self, _error: &ErrorRecord) {}
}

/// Adapts a pair of closures into a [`FlowObserver`].
pub struct FlowCallbacks<P, E> {
    on_phase: P,
    on_error: E,
}

impl<P, E> FlowCallbacks<P, E>
where
    P: Fn(Phase) + Send + Sync,
    E: Fn(&ErrorRecord) + Send + Sync,
{
    pub fn new(on_phase: P, on_error: E) -> Self {
        Self { on_phase, on_error }
    }
}

impl<P, E> FlowObserver for FlowCallbacks<P, E>
where
    P: Fn(Phase) + Send + Sync,
    E: Fn(&ErrorRecord) + Send + Sync,
{
    fn on_phase_change(&self, phase: Phase) {
        (self.on_phase)(phase);
    }

    fn on_error(&self, error: &ErrorRecord) {
        (self.on_error)(error);
    }
}

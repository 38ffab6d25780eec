//! Drives a single approve-then-act flow to a terminal phase.
//!
//! One runner exists per flow invocation and owns everything mutable about
//! that flow: the tracker, the armed guard, the push subscription and the
//! caller-facing watch channels. Nothing here is shared with other flows.

use commit_core::{
    ErrorKind, ErrorRecord, OperationDescriptor, OperationHandle, OperationId, Outcome, Phase,
};
use events::{Event, OutcomeSource};
use ledger::{InclusionNotice, LedgerClient, PushSubscription};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{FlowEventEmitter, FlowObserver};
use crate::resources::{CancelToken, TimeoutGuard};
use crate::services::{ErrorClassifier, OutcomePoller};
use crate::state_machine::{PhaseTracker, Transition};

const SIGNAL_BUFFER: usize = 4;

/// Requests a caller can make of a running flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlowCommand {
    Cancel,
    CheckNow,
    ConfirmManually,
    Abandon,
}

/// Internal wake-ups.
#[derive(Debug)]
enum FlowSignal {
    GuardExpired(OperationId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    /// First phase confirmed; submit the second operation.
    Advance,
    /// Terminal phase reached.
    Finished,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    First,
    Second,
}

/// Final result of a flow.
#[derive(Debug, Clone)]
pub struct FlowReport {
    pub flow_id: Uuid,
    /// `Succeeded` or `Failed`
    pub phase: Phase,
    pub error: Option<ErrorRecord>,
    pub first: Option<OperationHandle>,
    pub second: Option<OperationHandle>,
}

impl FlowReport {
    pub fn is_success(&self) -> bool {
        self.phase == Phase::Succeeded
    }

    /// The flow's result expressed as an outcome of its last operation.
    ///
    /// A failure before anything was accepted maps to `NotFound`; a failure
    /// after acceptance other than a revert maps to `Pending`, since the
    /// operation may still land.
    pub fn outcome(&self) -> Outcome {
        match (&self.error, self.phase) {
            (_, Phase::Succeeded) => Outcome::confirmed(),
            (Some(error), _) if error.kind == ErrorKind::Reverted => Outcome::reverted(),
            _ if self.first.is_none() => Outcome::NotFound,
            _ => Outcome::Pending,
        }
    }
}

pub(crate) struct FlowRunner {
    flow_id: Uuid,
    tracker: PhaseTracker,
    ledger: Arc<dyn LedgerClient>,
    poller: OutcomePoller,
    push: Option<Arc<dyn PushSubscription>>,
    guard: TimeoutGuard,
    guard_token: Option<CancelToken>,
    notices: Option<mpsc::Receiver<InclusionNotice>>,
    observer: Arc<dyn FlowObserver>,
    emitter: FlowEventEmitter,
    phase_tx: watch::Sender<Phase>,
    manual_tx: watch::Sender<bool>,
    signal_tx: mpsc::Sender<FlowSignal>,
    signal_rx: mpsc::Receiver<FlowSignal>,
    commands: mpsc::Receiver<FlowCommand>,
    /// Cleared once every command sender is gone.
    commands_open: bool,
}

pub(crate) struct FlowChannels {
    pub phase: watch::Receiver<Phase>,
    pub manual_check: watch::Receiver<bool>,
}

impl FlowRunner {
    pub(crate) fn new(
        ledger: Arc<dyn LedgerClient>,
        poller: OutcomePoller,
        push: Option<Arc<dyn PushSubscription>>,
        guard: TimeoutGuard,
        observer: Arc<dyn FlowObserver>,
        emitter: FlowEventEmitter,
        commands: mpsc::Receiver<FlowCommand>,
    ) -> (Self, FlowChannels) {
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);
        let (manual_tx, manual_rx) = watch::channel(false);
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);

        let runner = Self {
            flow_id: emitter.flow_id(),
            tracker: PhaseTracker::new(),
            poller,
            ledger,
            push,
            guard,
            guard_token: None,
            notices: None,
            observer,
            emitter,
            phase_tx,
            manual_tx,
            signal_tx,
            signal_rx,
            commands,
            commands_open: true,
        };
        let channels = FlowChannels {
            phase: phase_rx,
            manual_check: manual_rx,
        };
        (runner, channels)
    }

    pub(crate) async fn execute(
        mut self,
        first: OperationDescriptor,
        second: OperationDescriptor,
    ) -> FlowReport {
        info!(
            flow_id = %self.flow_id,
            first = %first.kind,
            second = %second.kind,
            "Two-phase flow started"
        );
        self.emitter.emit(Event::FlowStarted {
            flow_id: self.flow_id,
            first_kind: first.kind.clone(),
            second_kind: second.kind.clone(),
        });

        if self.run_phase(&first, Slot::First).await == Step::Advance {
            self.run_phase(&second, Slot::Second).await;
        }

        self.finish()
    }

    /// Submit one operation and wait for it to resolve.
    async fn run_phase(&mut self, descriptor: &OperationDescriptor, slot: Slot) -> Step {
        if let Slot::First = slot {
            let from = self.tracker.phase();
            if let Err(e) = self.tracker.start_first() {
                return self.fail(ErrorKind::Unknown, Some(e.to_string()));
            }
            self.publish_phase(from);
        }

        let Some(handle) = self.submit(descriptor).await else {
            return Step::Finished;
        };

        let from = self.tracker.phase();
        let begun = match slot {
            Slot::First => self.tracker.begin_first(handle.clone()),
            Slot::Second => self.tracker.begin_second(handle.clone()),
        };
        if let Err(e) = begun {
            return self.fail(ErrorKind::Unknown, Some(e.to_string()));
        }
        self.publish_phase(from);

        self.arm(&handle.id);
        let step = self.await_resolution(&handle.id).await;
        self.disarm();
        step
    }

    /// Submit `descriptor`, honouring cancellation while the signer is busy.
    ///
    /// Returns `None` once the flow has been failed.
    async fn submit(&mut self, descriptor: &OperationDescriptor) -> Option<OperationHandle> {
        let ledger = Arc::clone(&self.ledger);
        let submission = ledger.submit(&descriptor.request);
        tokio::pin!(submission);

        let result = loop {
            tokio::select! {
                result = &mut submission => break Some(result),
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(FlowCommand::Cancel) => break None,
                    Some(command) => {
                        debug!(
                            flow_id = %self.flow_id,
                            ?command,
                            "Ignoring command while submitting"
                        );
                    }
                    None => self.commands_open = false,
                },
            }
        };

        match result {
            None => {
                self.fail(ErrorKind::Cancelled, None);
                None
            }
            Some(Err(e)) => {
                let record = ErrorClassifier::classify(&e, self.tracker.phase());
                warn!(
                    flow_id = %self.flow_id,
                    kind = %descriptor.kind,
                    error = %e,
                    "Submission failed"
                );
                self.fail_with(record);
                None
            }
            Some(Ok(handle)) => {
                info!(
                    flow_id = %self.flow_id,
                    operation_id = %handle.id,
                    kind = %descriptor.kind,
                    "Operation submitted"
                );
                self.emitter.emit(Event::OperationSubmitted {
                    flow_id: self.flow_id,
                    operation_id: handle.id.to_string(),
                    kind: descriptor.kind.clone(),
                });
                Some(handle)
            }
        }
    }

    async fn await_resolution(&mut self, id: &OperationId) -> Step {
        loop {
            let step = tokio::select! {
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => self.handle_command(command, id).await,
                    None => self.commands_closed(id),
                },
                Some(signal) = self.signal_rx.recv() => self.handle_signal(signal, id).await,
                notice = next_notice(&mut self.notices) => match notice {
                    Some(notice) => self.observe(&notice.id, notice.outcome, OutcomeSource::Push),
                    None => {
                        debug!(flow_id = %self.flow_id, "Push subscription closed");
                        self.notices = None;
                        Step::Continue
                    }
                },
            };

            if step != Step::Continue {
                return step;
            }
        }
    }

    async fn handle_command(&mut self, command: FlowCommand, id: &OperationId) -> Step {
        let offered = *self.manual_tx.borrow();
        match command {
            FlowCommand::Cancel => {
                info!(flow_id = %self.flow_id, operation_id = %id, "Flow cancelled by caller");
                self.fail(ErrorKind::Cancelled, None)
            }
            FlowCommand::CheckNow => match self.poll_or_cancel(id).await {
                Some(outcome) => self.observe(id, outcome, OutcomeSource::ManualPoll),
                None => self.cancelled_while_polling(id),
            },
            FlowCommand::ConfirmManually if offered => {
                info!(flow_id = %self.flow_id, operation_id = %id, "Operation confirmed manually");
                self.observe(id, Outcome::confirmed(), OutcomeSource::Acknowledged)
            }
            FlowCommand::Abandon if offered => {
                let message = self.timeout_message(id);
                self.fail(ErrorKind::Timeout, Some(message))
            }
            FlowCommand::ConfirmManually | FlowCommand::Abandon => {
                debug!(
                    flow_id = %self.flow_id,
                    ?command,
                    "Ignoring manual resolution before the manual check is offered"
                );
                Step::Continue
            }
        }
    }

    async fn handle_signal(&mut self, signal: FlowSignal, id: &OperationId) -> Step {
        let FlowSignal::GuardExpired(expired) = signal;
        if &expired != id {
            debug!(flow_id = %self.flow_id, operation_id = %expired, "Ignoring stale guard expiry");
            return Step::Continue;
        }

        warn!(
            flow_id = %self.flow_id,
            operation_id = %id,
            timeout_secs = self.guard.duration().as_secs(),
            "No confirmation before timeout, polling once"
        );
        let Some(outcome) = self.poll_or_cancel(id).await else {
            return self.cancelled_while_polling(id);
        };
        let step = self.observe(id, outcome, OutcomeSource::TimeoutPoll);
        if step != Step::Continue {
            return step;
        }

        self.offer_manual_check(id);
        if !self.commands_open {
            return self.unresolvable(id);
        }
        step
    }

    /// Poll `id` once while still honouring `Cancel`.
    ///
    /// Returns `None` when the caller cancelled before the poll answered.
    async fn poll_or_cancel(&mut self, id: &OperationId) -> Option<Outcome> {
        let poller = self.poller.clone();
        let poll = poller.poll(id);
        tokio::pin!(poll);

        loop {
            tokio::select! {
                outcome = &mut poll => return Some(outcome),
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(FlowCommand::Cancel) => return None,
                    Some(command) => {
                        debug!(
                            flow_id = %self.flow_id,
                            ?command,
                            "Ignoring command while polling"
                        );
                    }
                    None => self.commands_open = false,
                },
            }
        }
    }

    fn cancelled_while_polling(&mut self, id: &OperationId) -> Step {
        info!(flow_id = %self.flow_id, operation_id = %id, "Flow cancelled during outcome poll");
        self.fail(ErrorKind::Cancelled, None)
    }

    /// Every handle is gone; nobody can cancel, confirm or abandon any more.
    fn commands_closed(&mut self, id: &OperationId) -> Step {
        debug!(flow_id = %self.flow_id, "Command channel closed");
        self.commands_open = false;
        if *self.manual_tx.borrow() {
            return self.unresolvable(id);
        }
        Step::Continue
    }

    /// The manual check is offered but no caller is left to answer it.
    fn unresolvable(&mut self, id: &OperationId) -> Step {
        warn!(
            flow_id = %self.flow_id,
            operation_id = %id,
            "Manual check offered with no caller left to answer it"
        );
        let message = format!("{}; no caller left to resolve it", self.timeout_message(id));
        self.fail(ErrorKind::Timeout, Some(message))
    }

    fn timeout_message(&self, id: &OperationId) -> String {
        format!(
            "no confirmation for {id} within {}s",
            self.guard.duration().as_secs()
        )
    }

    fn observe(&mut self, id: &OperationId, outcome: Outcome, source: OutcomeSource) -> Step {
        let from = self.tracker.phase();
        let transition = self.tracker.observe_outcome(id, outcome);

        self.emitter.emit(Event::OutcomeObserved {
            flow_id: self.flow_id,
            operation_id: id.to_string(),
            outcome: outcome.to_string(),
            source,
            matched: transition != Transition::Ignored,
        });

        match transition {
            Transition::Ignored => {
                debug!(
                    flow_id = %self.flow_id,
                    operation_id = %id,
                    outcome = %outcome,
                    phase = %from,
                    "Ignoring outcome for an operation this phase is not waiting on"
                );
                Step::Continue
            }
            Transition::Unchanged => Step::Continue,
            Transition::Advanced { to, .. } => {
                self.publish_phase(from);
                if to == Phase::Succeeded {
                    Step::Finished
                } else {
                    Step::Advance
                }
            }
            Transition::Failed(record) => {
                self.publish_phase(from);
                self.report_error(&record);
                Step::Finished
            }
        }
    }

    fn fail(&mut self, kind: ErrorKind, message: Option<String>) -> Step {
        let mut record = ErrorRecord::new(kind, self.tracker.phase());
        if let Some(message) = message {
            record = record.with_message(message);
        }
        self.fail_with(record)
    }

    fn fail_with(&mut self, record: ErrorRecord) -> Step {
        let from = self.tracker.phase();
        if self.tracker.fail(record.clone()) {
            self.publish_phase(from);
            self.report_error(&record);
        }
        Step::Finished
    }

    fn report_error(&self, record: &ErrorRecord) {
        warn!(
            flow_id = %self.flow_id,
            kind = %record.kind,
            raised_at = %record.raised_at,
            message = ?record.message,
            "Flow failed"
        );
        self.observer.on_error(record);
    }

    fn publish_phase(&self, from: Phase) {
        let to = self.tracker.phase();
        if to == from {
            return;
        }

        debug!(flow_id = %self.flow_id, from = %from, to = %to, "Phase changed");
        self.phase_tx.send_replace(to);
        self.observer.on_phase_change(to);
        self.emitter.emit(Event::PhaseChanged {
            flow_id: self.flow_id,
            from_phase: from.as_str().to_string(),
            to_phase: to.as_str().to_string(),
        });
    }

    /// Subscribe to pushes for `id` and start its countdown.
    fn arm(&mut self, id: &OperationId) {
        if let Some(ref push) = self.push {
            self.notices = Some(push.subscribe(id));
        }

        let signals = self.signal_tx.clone();
        let expired = id.clone();
        self.guard_token = Some(self.guard.start(move || async move {
            let _ = signals.send(FlowSignal::GuardExpired(expired)).await;
        }));
    }

    /// Tear down the current phase's guard, subscription and manual-check offer.
    fn disarm(&mut self) {
        if let Some(mut token) = self.guard_token.take() {
            token.cancel();
        }
        self.notices = None;
        self.set_manual_check(false);
    }

    fn offer_manual_check(&mut self, id: &OperationId) {
        if let Some(ref token) = self.guard_token {
            token.offer_manual_check();
        }
        info!(flow_id = %self.flow_id, operation_id = %id, "Manual check offered");
        self.emitter.emit(Event::ManualCheckOffered {
            flow_id: self.flow_id,
            operation_id: id.to_string(),
        });
        self.set_manual_check(true);
    }

    fn set_manual_check(&self, available: bool) {
        if self.manual_tx.send_replace(available) != available {
            self.observer.on_manual_check(available);
        }
    }

    fn finish(mut self) -> FlowReport {
        self.disarm();
        let phase = self.tracker.phase();
        let error = self.tracker.error().cloned();

        info!(
            flow_id = %self.flow_id,
            phase = %phase,
            error_kind = ?error.as_ref().map(|e| e.kind),
            "Two-phase flow finished"
        );
        self.emitter.emit(Event::FlowCompleted {
            flow_id: self.flow_id,
            success: phase == Phase::Succeeded,
            error_kind: error.as_ref().map(|e| e.kind.as_str().to_string()),
            message: error.as_ref().and_then(|e| e.message.clone()),
        });

        FlowReport {
            flow_id: self.flow_id,
            phase,
            error,
            first: self.tracker.first().cloned(),
            second: self.tracker.second().cloned(),
        }
    }
}

async fn next_notice(
    notices: &mut Option<mpsc::Receiver<InclusionNotice>>,
) -> Option<InclusionNotice> {
    match notices {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

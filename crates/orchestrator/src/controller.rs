use commit_core::{OperationDescriptor, Phase};
use events::EventBus;
use ledger::{LedgerClient, PushSubscription};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ControllerConfig;
use crate::core::{FlowEventEmitter, FlowObserver};
use crate::error::{OrchestratorError, Result};
use crate::flow_runner::{FlowChannels, FlowCommand, FlowReport, FlowRunner};
use crate::flows::CommitFlow;
use crate::resources::TimeoutGuard;
use crate::services::OutcomePoller;

/// Runs approve-then-act flows against a ledger.
///
/// The controller itself is stateless between flows; every `run`/`start`
/// gets its own tracker, guard and channels, so one controller can drive any
/// number of concurrent flows.
pub struct TwoPhaseCommitController {
    ledger: Arc<dyn LedgerClient>,
    push: Option<Arc<dyn PushSubscription>>,
    event_bus: Option<EventBus>,
    config: ControllerConfig,
}

impl TwoPhaseCommitController {
    pub fn new(ledger: Arc<dyn LedgerClient>, config: ControllerConfig) -> Self {
        Self {
            ledger,
            push: None,
            event_bus: None,
            config,
        }
    }

    pub fn with_push_subscription(mut self, push: Arc<dyn PushSubscription>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Allocate a flow id and the command channel for a flow not yet started.
    ///
    /// Pass the [`FlowCommands`] half to [`run_with`](Self::run_with) or
    /// [`start_with`](Self::start_with); keep the [`FlowControl`] to steer it.
    pub fn control(&self) -> (FlowControl, FlowCommands) {
        let flow_id = Uuid::new_v4();
        let (commands, rx) = mpsc::channel(self.config.command_buffer);
        (FlowControl { flow_id, commands }, FlowCommands { flow_id, rx })
    }

    /// Run a flow to completion on the current task with nobody to steer it.
    ///
    /// A phase that reaches the manual check fails with `Timeout`, since no
    /// caller can answer it. Use [`run_with`](Self::run_with) or
    /// [`start`](Self::start) to keep that option.
    pub async fn run(
        &self,
        first: OperationDescriptor,
        second: OperationDescriptor,
        observer: impl FlowObserver + 'static,
    ) -> FlowReport {
        let (_, commands) = self.control();
        self.run_with(first, second, observer, commands).await
    }

    /// Run a flow on the current task, steered through the [`FlowControl`]
    /// paired with `commands`.
    pub async fn run_with(
        &self,
        first: OperationDescriptor,
        second: OperationDescriptor,
        observer: impl FlowObserver + 'static,
        commands: FlowCommands,
    ) -> FlowReport {
        let (runner, _channels) = self.runner(commands.flow_id, Arc::new(observer), commands.rx);
        runner.execute(first, second).await
    }

    /// Spawn a flow and return a handle for steering it.
    pub fn start(
        &self,
        first: OperationDescriptor,
        second: OperationDescriptor,
        observer: impl FlowObserver + 'static,
    ) -> FlowHandle {
        let (control, commands) = self.control();
        self.start_with(first, second, observer, control, commands)
    }

    /// Spawn a flow whose id was allocated up front by [`control`](Self::control).
    ///
    /// `control` and `commands` must come from the same `control()` call.
    pub fn start_with(
        &self,
        first: OperationDescriptor,
        second: OperationDescriptor,
        observer: impl FlowObserver + 'static,
        control: FlowControl,
        commands: FlowCommands,
    ) -> FlowHandle {
        debug_assert_eq!(control.flow_id, commands.flow_id);
        let (runner, channels) = self.runner(commands.flow_id, Arc::new(observer), commands.rx);
        let task = tokio::spawn(runner.execute(first, second));

        FlowHandle {
            control,
            phase: channels.phase,
            manual_check: channels.manual_check,
            task,
        }
    }

    /// Build and run a call-site flow.
    ///
    /// Fails without submitting anything when the flow's parameters are invalid.
    pub async fn run_flow(
        &self,
        flow: &impl CommitFlow,
        observer: impl FlowObserver + 'static,
    ) -> Result<FlowReport> {
        let (first, second) = flow.descriptors()?;
        Ok(self.run(first, second, observer).await)
    }

    pub fn start_flow(
        &self,
        flow: &impl CommitFlow,
        observer: impl FlowObserver + 'static,
    ) -> Result<FlowHandle> {
        let (first, second) = flow.descriptors()?;
        Ok(self.start(first, second, observer))
    }

    fn runner(
        &self,
        flow_id: Uuid,
        observer: Arc<dyn FlowObserver>,
        commands: mpsc::Receiver<FlowCommand>,
    ) -> (FlowRunner, FlowChannels) {
        let poller =
            OutcomePoller::new(Arc::clone(&self.ledger)).with_timeout(self.config.poll_timeout);
        FlowRunner::new(
            Arc::clone(&self.ledger),
            poller,
            self.push.clone(),
            TimeoutGuard::new(self.config.guard_timeout),
            observer,
            FlowEventEmitter::new(flow_id, self.event_bus.clone()),
            commands,
        )
    }
}

/// Sending half of a flow's command channel.
///
/// Cheap to clone. Once every clone is dropped the flow can no longer be
/// cancelled or manually resolved, and a phase left waiting on the manual
/// check fails with `Timeout`.
#[derive(Debug, Clone)]
pub struct FlowControl {
    flow_id: Uuid,
    commands: mpsc::Sender<FlowCommand>,
}

impl FlowControl {
    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    /// Stop the flow. Whatever was already broadcast stays broadcast.
    pub async fn cancel(&self) -> Result<()> {
        self.send(FlowCommand::Cancel).await
    }

    /// Poll the awaited operation once, right now.
    pub async fn check_now(&self) -> Result<()> {
        self.send(FlowCommand::CheckNow).await
    }

    /// Treat the awaited operation as confirmed. Ignored unless the manual
    /// check is currently offered.
    pub async fn confirm_manually(&self) -> Result<()> {
        self.send(FlowCommand::ConfirmManually).await
    }

    /// Stop waiting and fail with `Timeout`. Ignored unless the manual
    /// check is currently offered.
    pub async fn abandon(&self) -> Result<()> {
        self.send(FlowCommand::Abandon).await
    }

    async fn send(&self, command: FlowCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| OrchestratorError::FlowClosed(self.flow_id))
    }
}

/// Receiving half of a flow's command channel, consumed when the flow starts.
#[derive(Debug)]
pub struct FlowCommands {
    flow_id: Uuid,
    rx: mpsc::Receiver<FlowCommand>,
}

impl FlowCommands {
    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }
}

/// Handle to a spawned flow.
///
/// Dropping the handle does not stop the flow, but once it and every
/// [`FlowControl`] clone are gone the manual check can no longer be answered.
pub struct FlowHandle {
    control: FlowControl,
    phase: watch::Receiver<Phase>,
    manual_check: watch::Receiver<bool>,
    task: JoinHandle<FlowReport>,
}

impl FlowHandle {
    pub fn flow_id(&self) -> Uuid {
        self.control.flow_id
    }

    pub fn control(&self) -> FlowControl {
        self.control.clone()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn phase_receiver(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    /// Whether the flow has given up on automatic confirmation for the
    /// current phase and is waiting for the caller.
    pub fn manual_check_available(&self) -> bool {
        *self.manual_check.borrow()
    }

    pub fn manual_check_receiver(&self) -> watch::Receiver<bool> {
        self.manual_check.clone()
    }

    pub async fn cancel(&self) -> Result<()> {
        self.control.cancel().await
    }

    pub async fn check_now(&self) -> Result<()> {
        self.control.check_now().await
    }

    pub async fn confirm_manually(&self) -> Result<()> {
        self.control.confirm_manually().await
    }

    pub async fn abandon(&self) -> Result<()> {
        self.control.abandon().await
    }

    pub async fn wait(self) -> Result<FlowReport> {
        self.task
            .await
            .map_err(|e| OrchestratorError::FlowAborted(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NoopObserver;
    use async_trait::async_trait;
    use commit_core::{
        ErrorKind, ErrorRecord, OperationHandle, OperationId, OperationRequest, Outcome,
    };
    use events::{Event, EventEnvelope};
    use ledger::{
        InclusionNotice, LedgerError, SimulatedLedger, SubmissionError, SubmissionScript,
    };
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    const GUARD: Duration = Duration::from_secs(45);

    #[derive(Default)]
    struct RecordingObserver {
        phases: Mutex<Vec<Phase>>,
        errors: Mutex<Vec<ErrorRecord>>,
        manual: Mutex<Vec<bool>>,
    }

    impl RecordingObserver {
        fn phases(&self) -> Vec<Phase> {
            self.phases.lock().unwrap().clone()
        }

        fn errors(&self) -> Vec<ErrorRecord> {
            self.errors.lock().unwrap().clone()
        }

        fn manual(&self) -> Vec<bool> {
            self.manual.lock().unwrap().clone()
        }
    }

    impl FlowObserver for RecordingObserver {
        fn on_phase_change(&self, phase: Phase) {
            self.phases.lock().unwrap().push(phase);
        }

        fn on_error(&self, error: &ErrorRecord) {
            self.errors.lock().unwrap().push(error.clone());
        }

        fn on_manual_check(&self, available: bool) {
            self.manual.lock().unwrap().push(available);
        }
    }

    /// Signer that never answers, like a wallet prompt left open.
    struct HangingLedger;

    #[async_trait]
    impl LedgerClient for HangingLedger {
        async fn submit(
            &self,
            _request: &OperationRequest,
        ) -> std::result::Result<OperationHandle, SubmissionError> {
            futures::future::pending().await
        }

        async fn outcome(&self, _id: &OperationId) -> ledger::Result<Outcome> {
            Err(LedgerError::Transport("unreachable".to_string()))
        }
    }

    /// Accepts submissions like `inner` but never answers an outcome query.
    struct UnansweredPolls(Arc<SimulatedLedger>);

    #[async_trait]
    impl LedgerClient for UnansweredPolls {
        async fn submit(
            &self,
            request: &OperationRequest,
        ) -> std::result::Result<OperationHandle, SubmissionError> {
            self.0.submit(request).await
        }

        async fn outcome(&self, _id: &OperationId) -> ledger::Result<Outcome> {
            futures::future::pending().await
        }
    }

    fn approve() -> OperationDescriptor {
        OperationDescriptor::grant_allowance("usdc", "circle-1", 100)
    }

    fn pay() -> OperationDescriptor {
        OperationDescriptor::invoke("circle-1", "makePayment", vec![json!(1), json!("100")])
    }

    fn controller(ledger: &Arc<SimulatedLedger>) -> TwoPhaseCommitController {
        TwoPhaseCommitController::new(ledger.clone(), ControllerConfig::new(GUARD))
    }

    fn pushing_controller(ledger: &Arc<SimulatedLedger>) -> TwoPhaseCommitController {
        controller(ledger).with_push_subscription(ledger.clone())
    }

    async fn wait_for_phase(handle: &FlowHandle, phase: Phase) {
        let mut rx = handle.phase_receiver();
        rx.wait_for(|current| *current == phase).await.unwrap();
    }

    async fn wait_for_manual_check(handle: &FlowHandle) {
        let mut rx = handle.manual_check_receiver();
        rx.wait_for(|available| *available).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_phase_sequence() {
        let ledger = Arc::new(SimulatedLedger::new());
        let observer = Arc::new(RecordingObserver::default());

        let report = controller(&ledger).run(approve(), pay(), observer.clone()).await;

        assert!(report.is_success());
        assert_eq!(report.outcome(), Outcome::confirmed());
        assert_eq!(
            observer.phases(),
            vec![
                Phase::SubmittingFirst,
                Phase::AwaitingFirst,
                Phase::SubmittingSecond,
                Phase::AwaitingSecond,
                Phase::Succeeded,
            ]
        );
        assert!(observer.errors().is_empty());
        assert!(observer.manual().is_empty());
        assert_eq!(ledger.submission_count(), 2);
        // One fallback poll per phase.
        assert_eq!(ledger.poll_count(), 2);

        let ids = ledger.accepted_ids();
        assert_eq!(report.first.unwrap().id, ids[0]);
        assert_eq!(report.second.unwrap().id, ids[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_completes_before_timeout_without_polling() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::confirms_after(Duration::from_secs(2)).with_push(),
            SubmissionScript::confirms_after(Duration::from_secs(3)).with_push(),
        ]));
        let started = Instant::now();

        let report = pushing_controller(&ledger)
            .run(approve(), pay(), NoopObserver)
            .await;

        assert!(report.is_success());
        assert_eq!(ledger.poll_count(), 0);
        assert!(started.elapsed() < GUARD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_phase_reverts() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::reverts_after(Duration::from_secs(1)).with_push(),
        ]));
        let observer = Arc::new(RecordingObserver::default());

        let report = pushing_controller(&ledger)
            .run(approve(), pay(), observer.clone())
            .await;

        assert_eq!(report.phase, Phase::Failed);
        assert_eq!(report.outcome(), Outcome::reverted());
        let error = report.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Reverted);
        assert_eq!(error.raised_at, Phase::AwaitingFirst);

        assert_eq!(ledger.submission_count(), 1);
        assert_eq!(
            observer.phases(),
            vec![Phase::SubmittingFirst, Phase::AwaitingFirst, Phase::Failed]
        );
        assert_eq!(observer.errors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signer_declines_first_submission() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([SubmissionScript::rejected(
            SubmissionError::Rejected("User rejected the request.".to_string()),
        )]));
        let observer = Arc::new(RecordingObserver::default());

        let report = controller(&ledger).run(approve(), pay(), observer.clone()).await;

        let error = report.error.clone().unwrap();
        assert_eq!(error.kind, ErrorKind::SubmissionRejected);
        assert_eq!(error.raised_at, Phase::SubmittingFirst);
        assert_eq!(error.message.as_deref(), Some("User rejected the request."));
        assert_eq!(report.outcome(), Outcome::NotFound);
        assert!(report.first.is_none());

        assert_eq!(ledger.poll_count(), 0);
        assert_eq!(ledger.submission_count(), 1);
        assert_eq!(observer.phases(), vec![Phase::SubmittingFirst, Phase::Failed]);
        assert_eq!(observer.errors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_phase_missing_allowance() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::confirms_after(Duration::from_secs(1)).with_push(),
            SubmissionScript::rejected(SubmissionError::InsufficientAllowance(
                "ERC20: insufficient allowance".to_string(),
            )),
        ]));
        let observer = Arc::new(RecordingObserver::default());

        let report = pushing_controller(&ledger)
            .run(approve(), pay(), observer.clone())
            .await;

        let error = report.error.clone().unwrap();
        assert_eq!(error.kind, ErrorKind::InsufficientPermission);
        assert_eq!(error.raised_at, Phase::SubmittingSecond);
        assert_eq!(report.outcome(), Outcome::Pending);
        assert_eq!(
            observer.phases(),
            vec![
                Phase::SubmittingFirst,
                Phase::AwaitingFirst,
                Phase::SubmittingSecond,
                Phase::Failed,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_poll_resolves_without_manual_check() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::confirms_after(Duration::from_secs(10)),
            SubmissionScript::confirms_after(Duration::from_secs(10)),
        ]));
        let observer = Arc::new(RecordingObserver::default());

        let report = controller(&ledger).run(approve(), pay(), observer.clone()).await;

        assert!(report.is_success());
        assert_eq!(ledger.poll_count(), 2);
        assert!(observer.manual().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_pending_offers_manual_check() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::never_resolves(),
        ]));
        let observer = Arc::new(RecordingObserver::default());
        let handle = controller(&ledger).start(approve(), pay(), observer.clone());

        wait_for_manual_check(&handle).await;
        assert_eq!(handle.phase(), Phase::AwaitingFirst);
        assert!(handle.manual_check_available());
        assert_eq!(ledger.poll_count(), 1);

        // No further automatic polling once the manual check is offered.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(ledger.poll_count(), 1);
        assert_eq!(handle.phase(), Phase::AwaitingFirst);

        ledger.resolve(&ledger.accepted_ids()[0], true);
        handle.check_now().await.unwrap();

        let report = handle.wait().await.unwrap();
        assert!(report.is_success());
        assert_eq!(ledger.submission_count(), 2);
        assert_eq!(observer.manual(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_confirmation() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::never_resolves(),
        ]));
        let handle = controller(&ledger).start(approve(), pay(), NoopObserver);

        // Too early: the manual check has not been offered yet.
        handle.confirm_manually().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.phase(), Phase::AwaitingFirst);
        assert_eq!(ledger.submission_count(), 1);

        wait_for_manual_check(&handle).await;
        handle.confirm_manually().await.unwrap();

        let report = handle.wait().await.unwrap();
        assert!(report.is_success());
        assert_eq!(ledger.submission_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_fails_with_timeout() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::never_resolves(),
        ]));
        let observer = Arc::new(RecordingObserver::default());
        let handle = controller(&ledger).start(approve(), pay(), observer.clone());

        wait_for_manual_check(&handle).await;
        handle.abandon().await.unwrap();

        let report = handle.wait().await.unwrap();
        let error = report.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert_eq!(error.raised_at, Phase::AwaitingFirst);
        assert_eq!(ledger.submission_count(), 1);
        assert_eq!(observer.errors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::never_resolves(),
        ]));
        let observer = Arc::new(RecordingObserver::default());
        let handle = controller(&ledger).start(approve(), pay(), observer.clone());

        wait_for_phase(&handle, Phase::AwaitingFirst).await;
        handle.cancel().await.unwrap();

        let report = handle.wait().await.unwrap();
        assert_eq!(report.outcome(), Outcome::Pending);
        assert_eq!(report.error.unwrap().kind, ErrorKind::Cancelled);
        assert_eq!(observer.errors().len(), 1);

        tokio::time::sleep(GUARD * 2).await;
        assert_eq!(ledger.poll_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_signer_is_prompting() {
        let controller =
            TwoPhaseCommitController::new(Arc::new(HangingLedger), ControllerConfig::new(GUARD));
        let observer = Arc::new(RecordingObserver::default());
        let handle = controller.start(approve(), pay(), observer.clone());

        wait_for_phase(&handle, Phase::SubmittingFirst).await;
        handle.check_now().await.unwrap();
        handle.cancel().await.unwrap();

        let report = handle.wait().await.unwrap();
        assert_eq!(report.outcome(), Outcome::NotFound);
        let error = report.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Cancelled);
        assert_eq!(error.raised_at, Phase::SubmittingFirst);
        assert_eq!(observer.phases(), vec![Phase::SubmittingFirst, Phase::Failed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_after_completion_report_closed() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([SubmissionScript::rejected(
            SubmissionError::Other("boom".to_string()),
        )]));
        let handle = controller(&ledger).start(approve(), pay(), NoopObserver);

        wait_for_phase(&handle, Phase::Failed).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(
            handle.cancel().await,
            Err(OrchestratorError::FlowClosed(id)) if id == handle.flow_id()
        ));
        let report = handle.wait().await.unwrap();
        assert_eq!(report.error.unwrap().kind, ErrorKind::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_first_notice_never_completes_second_phase() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::confirms_after(Duration::from_secs(1))
                .with_push()
                .with_id("0xaaa"),
            SubmissionScript::never_resolves().with_id("0xbbb"),
        ]));
        let handle = pushing_controller(&ledger).start(approve(), pay(), NoopObserver);

        wait_for_phase(&handle, Phase::AwaitingSecond).await;

        // Late and duplicated first-phase notices.
        ledger.announce(InclusionNotice::new("0xaaa", Outcome::confirmed()));
        ledger.announce(InclusionNotice::new("0xaaa", Outcome::confirmed()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.phase(), Phase::AwaitingSecond);

        ledger.announce(InclusionNotice::new("0xbbb", Outcome::confirmed()));
        let report = handle.wait().await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.second.unwrap().id.as_str(), "0xbbb");
        assert_eq!(ledger.submission_count(), 2);
        assert_eq!(ledger.poll_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_notices_are_ignored() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::never_resolves().with_id("0x111"),
        ]));
        let handle = pushing_controller(&ledger).start(approve(), pay(), NoopObserver);

        wait_for_phase(&handle, Phase::AwaitingFirst).await;
        ledger.announce(InclusionNotice::new("0xdead", Outcome::confirmed()));
        ledger.announce(InclusionNotice::new("0xbeef", Outcome::reverted()));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(handle.phase(), Phase::AwaitingFirst);
        assert_eq!(ledger.submission_count(), 1);

        handle.cancel().await.unwrap();
        let report = handle.wait().await.unwrap();
        assert_eq!(report.error.unwrap().kind, ErrorKind::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_read_as_pending() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::confirms_after(Duration::from_secs(10)),
        ]));
        ledger.fail_next_polls(1);
        let handle = controller(&ledger).start(approve(), pay(), NoopObserver);

        wait_for_manual_check(&handle).await;
        assert_eq!(handle.phase(), Phase::AwaitingFirst);
        assert_eq!(ledger.poll_count(), 1);

        handle.check_now().await.unwrap();
        let report = handle.wait().await.unwrap();
        assert!(report.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_flows_do_not_cross_talk() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::confirms_after(Duration::from_secs(1))
                .with_push()
                .with_id("0xa1"),
            SubmissionScript::never_resolves().with_id("0xb1"),
            SubmissionScript::confirms_after(Duration::from_secs(1))
                .with_push()
                .with_id("0xa2"),
        ]));
        let controller = pushing_controller(&ledger);

        let a = controller.start(approve(), pay(), NoopObserver);
        wait_for_phase(&a, Phase::AwaitingFirst).await;
        let b = controller.start(approve(), pay(), NoopObserver);
        wait_for_phase(&b, Phase::AwaitingFirst).await;

        let report_a = a.wait().await.unwrap();
        assert!(report_a.is_success());
        assert_eq!(report_a.first.unwrap().id.as_str(), "0xa1");
        assert_eq!(report_a.second.unwrap().id.as_str(), "0xa2");

        // Flow B saw every notice for A and stayed put.
        assert_eq!(b.phase(), Phase::AwaitingFirst);
        b.cancel().await.unwrap();
        let report_b = b.wait().await.unwrap();
        assert_eq!(report_b.first.unwrap().id.as_str(), "0xb1");
        assert!(report_b.second.is_none());
        assert_eq!(ledger.submission_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_sequenced_per_flow() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::confirms_after(Duration::from_secs(1)).with_push(),
            SubmissionScript::confirms_after(Duration::from_secs(1)).with_push(),
        ]));
        let bus = EventBus::new();
        let controller = pushing_controller(&ledger).with_event_bus(bus.clone());
        let (_control, commands) = controller.control();
        let mut subscription = bus.subscribe_flow(commands.flow_id());

        bus.publish(EventEnvelope::new(Event::FlowStarted {
            flow_id: Uuid::new_v4(),
            first_kind: "grant_allowance".to_string(),
            second_kind: "depositGuarantee".to_string(),
        }));
        let report = controller.run_with(approve(), pay(), NoopObserver, commands).await;

        let mut envelopes = Vec::new();
        while let Some(envelope) = subscription.try_recv() {
            envelopes.push(envelope);
        }
        assert_eq!(subscription.missed(), 0);

        let sequences: Vec<u64> = envelopes.iter().filter_map(|e| e.sequence).collect();
        let expected: Vec<u64> = (0..envelopes.len() as u64).collect();
        assert_eq!(sequences, expected);
        assert!(envelopes.iter().all(|e| e.event.flow_id() == report.flow_id));

        assert!(matches!(
            envelopes.first().map(|e| &e.event),
            Some(Event::FlowStarted { .. })
        ));
        assert!(matches!(
            envelopes.last().map(|e| &e.event),
            Some(Event::FlowCompleted { success: true, .. })
        ));
        let submitted = envelopes
            .iter()
            .filter(|e| matches!(e.event, Event::OperationSubmitted { .. }))
            .count();
        assert_eq!(submitted, 2);
    }

    #[tokio::test]
    async fn test_run_flow_rejects_invalid_parameters() {
        use crate::flows::PaymentFlow;

        let ledger = Arc::new(SimulatedLedger::new());
        let flow = PaymentFlow::new("usdc", "circle-1", 0, 3);

        let result = controller(&ledger).run_flow(&flow, NoopObserver).await;

        assert!(matches!(result, Err(OrchestratorError::InvalidFlow(_))));
        assert_eq!(ledger.submission_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_unanswered_poll() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::never_resolves(),
        ]));
        let controller = TwoPhaseCommitController::new(
            Arc::new(UnansweredPolls(ledger.clone())),
            ControllerConfig::new(GUARD).with_poll_timeout(Duration::from_secs(60)),
        );
        let observer = Arc::new(RecordingObserver::default());
        let handle = controller.start(approve(), pay(), observer.clone());

        wait_for_phase(&handle, Phase::AwaitingFirst).await;
        // Guard has fired and the fallback poll is outstanding.
        tokio::time::sleep(GUARD + Duration::from_secs(5)).await;
        handle.cancel().await.unwrap();

        let report = tokio::time::timeout(Duration::from_secs(1), handle.wait())
            .await
            .expect("cancel must not wait for the poll")
            .unwrap();
        let error = report.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Cancelled);
        assert_eq!(error.raised_at, Phase::AwaitingFirst);
        assert!(observer.manual().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_poll_is_bounded() {
        let poll_timeout = Duration::from_secs(5);
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::never_resolves(),
        ]));
        let controller = TwoPhaseCommitController::new(
            Arc::new(UnansweredPolls(ledger.clone())),
            ControllerConfig::new(GUARD).with_poll_timeout(poll_timeout),
        );
        let started = Instant::now();
        let handle = controller.start(approve(), pay(), NoopObserver);

        wait_for_manual_check(&handle).await;
        assert!(started.elapsed() >= GUARD + poll_timeout);
        assert!(started.elapsed() < GUARD + poll_timeout + Duration::from_secs(1));
        assert_eq!(handle.phase(), Phase::AwaitingFirst);

        handle.abandon().await.unwrap();
        let report = handle.wait().await.unwrap();
        assert_eq!(report.error.unwrap().kind, ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_fails_with_timeout_when_manual_check_is_unanswerable() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::never_resolves(),
        ]));
        let observer = Arc::new(RecordingObserver::default());

        let report = tokio::time::timeout(
            GUARD * 2,
            controller(&ledger).run(approve(), pay(), observer.clone()),
        )
        .await
        .expect("an unsteerable flow must not wait forever");

        let error = report.error.clone().unwrap();
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert_eq!(error.raised_at, Phase::AwaitingFirst);
        assert!(error.message.unwrap().contains("no caller left"));
        assert_eq!(report.outcome(), Outcome::Pending);
        assert_eq!(ledger.poll_count(), 1);
        assert_eq!(ledger.submission_count(), 1);
        assert_eq!(observer.manual(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_fails_with_timeout() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::never_resolves(),
        ]));
        let observer = Arc::new(RecordingObserver::default());
        let handle = controller(&ledger).start(approve(), pay(), observer.clone());
        let mut phase = handle.phase_receiver();

        wait_for_phase(&handle, Phase::AwaitingFirst).await;
        drop(handle);

        tokio::time::timeout(GUARD * 2, phase.wait_for(|phase| phase.is_terminal()))
            .await
            .expect("flow must finish once nobody can answer it")
            .unwrap();
        assert_eq!(*phase.borrow(), Phase::Failed);

        let errors = observer.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Timeout);
        assert_eq!(ledger.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_control_cancels() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::never_resolves(),
        ]));
        let controller = controller(&ledger);
        let (control, commands) = controller.control();
        assert_eq!(control.flow_id(), commands.flow_id());

        let canceller = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            control.cancel().await.unwrap();
        };
        let (report, ()) = tokio::join!(
            controller.run_with(approve(), pay(), NoopObserver, commands),
            canceller
        );

        assert_eq!(report.flow_id, control.flow_id());
        assert_eq!(report.error.unwrap().kind, ErrorKind::Cancelled);
        assert_eq!(ledger.poll_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_control_confirms_manually() {
        let ledger = Arc::new(SimulatedLedger::with_scripts([
            SubmissionScript::never_resolves(),
            SubmissionScript::confirms_after(Duration::from_secs(1)).with_push(),
        ]));
        let controller = pushing_controller(&ledger);
        let (control, commands) = controller.control();

        let confirmer = async {
            tokio::time::sleep(GUARD + Duration::from_secs(5)).await;
            control.confirm_manually().await.unwrap();
        };
        let (report, ()) = tokio::join!(
            controller.run_with(approve(), pay(), NoopObserver, commands),
            confirmer
        );

        assert!(report.is_success());
        assert_eq!(ledger.submission_count(), 2);
        assert_eq!(ledger.poll_count(), 1);
    }
}

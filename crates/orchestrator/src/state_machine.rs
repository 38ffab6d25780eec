//! Phase tracking for a single two-phase flow.
//!
//! The tracker is a pure transition function over observed facts. It records
//! the id of the operation the current phase is waiting on and refuses to
//! advance on any observation that carries a different id.

use commit_core::{ErrorKind, ErrorRecord, OperationHandle, OperationId, Outcome, Phase};

use crate::error::{OrchestratorError, Result};

/// Effect of feeding an observation into the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The observation was not about the awaited operation, or the flow is
    /// not waiting on anything.
    Ignored,
    /// The awaited operation has not resolved yet.
    Unchanged,
    /// The phase moved forward.
    Advanced { from: Phase, to: Phase },
    /// The awaited operation reverted.
    Failed(ErrorRecord),
}

/// State machine for one approve-then-act flow.
///
/// A tracker is created per flow invocation and never reused.
#[derive(Debug, Default)]
pub struct PhaseTracker {
    phase: Phase,
    awaited: Option<OperationId>,
    first: Option<OperationHandle>,
    second: Option<OperationHandle>,
    error: Option<ErrorRecord>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate_transition(from: Phase, to: Phase) -> Result<()> {
        if Self::allowed_transitions(from).contains(&to) {
            Ok(())
        } else {
            Err(OrchestratorError::invalid_transition(from, to))
        }
    }

    fn allowed_transitions(from: Phase) -> &'static [Phase] {
        match from {
            Phase::Idle => &[Phase::SubmittingFirst, Phase::AwaitingFirst, Phase::Failed],
            Phase::SubmittingFirst => &[Phase::AwaitingFirst, Phase::Failed],
            Phase::AwaitingFirst => &[Phase::SubmittingSecond, Phase::Failed],
            Phase::SubmittingSecond => &[Phase::AwaitingSecond, Phase::Failed],
            Phase::AwaitingSecond => &[Phase::Succeeded, Phase::Failed],
            Phase::Succeeded | Phase::Failed => &[],
        }
    }

    pub fn can_transition(from: Phase, to: Phase) -> bool {
        Self::validate_transition(from, to).is_ok()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Id of the operation the current phase is waiting on.
    pub fn awaited_id(&self) -> Option<&OperationId> {
        self.awaited.as_ref()
    }

    pub fn first(&self) -> Option<&OperationHandle> {
        self.first.as_ref()
    }

    pub fn second(&self) -> Option<&OperationHandle> {
        self.second.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorRecord> {
        self.error.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    fn transition(&mut self, to: Phase) -> Result<()> {
        Self::validate_transition(self.phase, to)?;
        self.phase = to;
        Ok(())
    }

    /// `Idle -> SubmittingFirst`.
    pub fn start_first(&mut self) -> Result<Phase> {
        self.transition(Phase::SubmittingFirst)?;
        Ok(self.phase)
    }

    /// Record the first operation and wait on its id.
    pub fn begin_first(&mut self, handle: OperationHandle) -> Result<Phase> {
        self.transition(Phase::AwaitingFirst)?;
        self.awaited = Some(handle.id.clone());
        self.first = Some(handle);
        Ok(self.phase)
    }

    /// Record the second operation and wait on its id.
    ///
    /// The first id stops matching from here on, so a late or duplicated
    /// first-phase notice can never complete the flow.
    pub fn begin_second(&mut self, handle: OperationHandle) -> Result<Phase> {
        if self.phase != Phase::SubmittingSecond {
            return Err(OrchestratorError::invalid_transition(
                self.phase,
                Phase::AwaitingSecond,
            ));
        }
        if self.first.as_ref().is_some_and(|first| first.id == handle.id) {
            return Err(OrchestratorError::DuplicateOperationId(handle.id));
        }
        self.transition(Phase::AwaitingSecond)?;
        self.awaited = Some(handle.id.clone());
        self.second = Some(handle);
        Ok(self.phase)
    }

    /// Feed an observed outcome for `id`.
    pub fn observe_outcome(&mut self, id: &OperationId, outcome: Outcome) -> Transition {
        if !self.phase.is_awaiting() || self.awaited.as_ref() != Some(id) {
            return Transition::Ignored;
        }

        let from = self.phase;
        match outcome {
            Outcome::Pending | Outcome::NotFound => Transition::Unchanged,
            Outcome::Included { success: true } => {
                let to = if from == Phase::AwaitingFirst {
                    Phase::SubmittingSecond
                } else {
                    Phase::Succeeded
                };
                self.phase = to;
                self.awaited = None;
                Transition::Advanced { from, to }
            }
            Outcome::Included { success: false } => {
                let record = ErrorRecord::new(ErrorKind::Reverted, from)
                    .with_message(format!("operation {id} was included but reverted"));
                self.force_failed(record.clone());
                Transition::Failed(record)
            }
        }
    }

    /// Force the flow into `Failed`. Returns `false` if it was already terminal.
    pub fn fail(&mut self, error: ErrorRecord) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.force_failed(error);
        true
    }

    fn force_failed(&mut self, error: ErrorRecord) {
        self.phase = Phase::Failed;
        self.awaited = None;
        self.error = Some(error);
    }
}

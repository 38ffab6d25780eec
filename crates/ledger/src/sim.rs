//! Scripted in-memory ledger.
//!
//! Each call to `submit` consumes the next [`SubmissionScript`] (or the
//! default script once the queue is empty) which decides whether the signer
//! declines, which id is assigned, when the operation resolves, whether it
//! succeeds, and whether a push notice is sent. Time is measured with the
//! tokio clock so tests can run with a paused runtime.

use async_trait::async_trait;
use commit_core::{OperationHandle, OperationId, OperationRequest, Outcome};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::debug;

use crate::client::{InclusionNotice, LedgerClient, PushSubscription};
use crate::error::{LedgerError, Result, SubmissionError};

const NOTICE_CAPACITY: usize = 256;
const SUBSCRIPTION_BUFFER: usize = 32;

/// Behaviour of one submission.
#[derive(Debug, Clone)]
pub struct SubmissionScript {
    /// Fail the submission with this error instead of accepting it
    pub reject: Option<SubmissionError>,
    /// Use this id instead of a generated one
    pub fixed_id: Option<OperationId>,
    /// Delay until the operation is included; `None` never resolves
    pub resolves_after: Option<Duration>,
    /// Whether the included operation succeeds
    pub success: bool,
    /// Send a push notice when the operation resolves
    pub push: bool,
}

impl Default for SubmissionScript {
    fn default() -> Self {
        Self {
            reject: None,
            fixed_id: None,
            resolves_after: Some(Duration::ZERO),
            success: true,
            push: false,
        }
    }
}

impl SubmissionScript {
    pub fn confirms_after(delay: Duration) -> Self {
        Self {
            resolves_after: Some(delay),
            ..Default::default()
        }
    }

    pub fn reverts_after(delay: Duration) -> Self {
        Self {
            resolves_after: Some(delay),
            success: false,
            ..Default::default()
        }
    }

    pub fn never_resolves() -> Self {
        Self {
            resolves_after: None,
            ..Default::default()
        }
    }

    pub fn rejected(error: SubmissionError) -> Self {
        Self {
            reject: Some(error),
            ..Default::default()
        }
    }

    pub fn with_push(mut self) -> Self {
        self.push = true;
        self
    }

    pub fn with_id(mut self, id: impl Into<OperationId>) -> Self {
        self.fixed_id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone)]
struct TrackedOperation {
    resolves_at: Option<Instant>,
    success: bool,
    push: bool,
}

impl TrackedOperation {
    fn outcome(&self, now: Instant) -> Outcome {
        match self.resolves_at {
            Some(at) if now >= at => Outcome::Included {
                success: self.success,
            },
            _ => Outcome::Pending,
        }
    }
}

#[derive(Default)]
struct SimState {
    scripts: VecDeque<SubmissionScript>,
    default_script: SubmissionScript,
    operations: HashMap<OperationId, TrackedOperation>,
    submissions: Vec<OperationRequest>,
    accepted: Vec<OperationId>,
    poll_count: usize,
    failing_polls: u32,
    next_id: u64,
}

/// In-memory ledger implementing both [`LedgerClient`] and [`PushSubscription`].
pub struct SimulatedLedger {
    state: Mutex<SimState>,
    notices: broadcast::Sender<InclusionNotice>,
}

impl SimulatedLedger {
    /// A ledger where every submission is accepted and confirms immediately.
    pub fn new() -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            state: Mutex::new(SimState::default()),
            notices,
        }
    }

    pub fn with_scripts(scripts: impl IntoIterator<Item = SubmissionScript>) -> Self {
        let ledger = Self::new();
        ledger.state().scripts.extend(scripts);
        ledger
    }

    /// Script used once the queue is exhausted.
    pub fn with_default_script(self, script: SubmissionScript) -> Self {
        self.state().default_script = script;
        self
    }

    pub fn push_script(&self, script: SubmissionScript) {
        self.state().scripts.push_back(script);
    }

    /// Make the next `count` outcome queries fail with a transport error.
    pub fn fail_next_polls(&self, count: u32) {
        self.state().failing_polls = count;
    }

    /// Resolve a known operation now, sending a push notice if it was scripted to.
    pub fn resolve(&self, id: &OperationId, success: bool) {
        let push = {
            let mut state = self.state();
            let Some(op) = state.operations.get_mut(id) else {
                return;
            };
            op.resolves_at = Some(Instant::now());
            op.success = success;
            op.push
        };
        if push {
            self.announce(InclusionNotice::new(id.clone(), Outcome::Included { success }));
        }
    }

    /// Broadcast an arbitrary notice to every subscriber.
    pub fn announce(&self, notice: InclusionNotice) {
        debug!(operation_id = %notice.id, outcome = %notice.outcome, "Simulated ledger push");
        let _ = self.notices.send(notice);
    }

    /// Every request passed to `submit`, accepted or not, in call order.
    pub fn submissions(&self) -> Vec<OperationRequest> {
        self.state().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.state().submissions.len()
    }

    /// Ids assigned to accepted submissions, in order.
    pub fn accepted_ids(&self) -> Vec<OperationId> {
        self.state().accepted.clone()
    }

    pub fn poll_count(&self) -> usize {
        self.state().poll_count
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn_push(&self, id: OperationId, at: Instant, success: bool) {
        let notices = self.notices.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            let _ = notices.send(InclusionNotice::new(id, Outcome::Included { success }));
        });
    }
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn submit(
        &self,
        request: &OperationRequest,
    ) -> std::result::Result<OperationHandle, SubmissionError> {
        let (id, tracked) = {
            let mut state = self.state();
            state.submissions.push(request.clone());

            let script = match state.scripts.pop_front() {
                Some(script) => script,
                None => state.default_script.clone(),
            };
            if let Some(error) = script.reject {
                return Err(error);
            }

            state.next_id += 1;
            let id = script
                .fixed_id
                .unwrap_or_else(|| OperationId::new(format!("0x{:08x}", state.next_id)));
            let tracked = TrackedOperation {
                resolves_at: script.resolves_after.map(|delay| Instant::now() + delay),
                success: script.success,
                push: script.push,
            };
            state.operations.insert(id.clone(), tracked.clone());
            state.accepted.push(id.clone());
            (id, tracked)
        };

        if tracked.push {
            if let Some(at) = tracked.resolves_at {
                self.spawn_push(id.clone(), at, tracked.success);
            }
        }

        let kind = match request {
            OperationRequest::GrantAllowance { .. } => "grant_allowance".to_string(),
            OperationRequest::Invoke { method, .. } => method.clone(),
        };
        debug!(operation_id = %id, kind = %kind, "Simulated ledger accepted submission");
        Ok(OperationHandle::new(id, kind))
    }

    async fn outcome(&self, id: &OperationId) -> Result<Outcome> {
        let mut state = self.state();
        state.poll_count += 1;

        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(LedgerError::Transport("node unreachable".to_string()));
        }

        Ok(state
            .operations
            .get(id)
            .map(|op| op.outcome(Instant::now()))
            .unwrap_or(Outcome::NotFound))
    }
}

impl PushSubscription for SimulatedLedger {
    /// Relays the ledger-wide notice feed, unfiltered.
    fn subscribe(&self, id: &OperationId) -> mpsc::Receiver<InclusionNotice> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut feed = self.notices.subscribe();
        debug!(operation_id = %id, "Simulated ledger subscription opened");

        tokio::spawn(async move {
            loop {
                let notice = tokio::select! {
                    _ = tx.closed() => break,
                    received = feed.recv() => match received {
                        Ok(notice) => notice,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                if tx.send(notice).await.is_err() {
                    break;
                }
            }
        });

        rx
    }
}

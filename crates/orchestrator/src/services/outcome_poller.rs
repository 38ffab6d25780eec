use commit_core::{OperationId, Outcome};
use ledger::LedgerClient;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::DEFAULT_POLL_TIMEOUT;

/// The only path through which flows query the ledger for outcomes.
///
/// Transport failures and queries slower than the poll timeout are reported
/// as `Pending`, so an unreachable node never reads as "operation vanished"
/// and never stalls a flow. Retrying is the caller's concern.
#[derive(Clone)]
pub struct OutcomePoller {
    ledger: Arc<dyn LedgerClient>,
    timeout: Duration,
    polls: Arc<AtomicUsize>,
}

impl OutcomePoller {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            ledger,
            timeout: DEFAULT_POLL_TIMEOUT,
            polls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn poll(&self, id: &OperationId) -> Outcome {
        self.polls.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(self.timeout, self.ledger.outcome(id)).await {
            Ok(Ok(outcome)) => {
                debug!(operation_id = %id, outcome = %outcome, "Outcome polled");
                outcome
            }
            Ok(Err(e)) => {
                warn!(
                    operation_id = %id,
                    error = %e,
                    "Outcome poll failed, treating as pending"
                );
                Outcome::Pending
            }
            Err(_) => {
                warn!(
                    operation_id = %id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Outcome poll timed out, treating as pending"
                );
                Outcome::Pending
            }
        }
    }

    /// Number of polls issued through this poller (and its clones).
    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::Relaxed)
    }
}

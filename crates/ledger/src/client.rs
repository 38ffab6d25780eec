//! Capabilities the commit controller needs from a ledger binding.
//!
//! Concrete bindings (wallet prompt, RPC transport, contract encoding) live
//! outside this workspace. They implement [`LedgerClient`] and, when the
//! environment can push inclusion notices, [`PushSubscription`].

use async_trait::async_trait;
use commit_core::{OperationHandle, OperationId, OperationRequest, Outcome};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Result, SubmissionError};

/// Read/write access to the ledger. Shared read-only across flows.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Sign and broadcast an operation.
    ///
    /// Resolves once the ledger has assigned the operation an id. Fails
    /// without a handle when the signer declines or cannot pay.
    async fn submit(
        &self,
        request: &OperationRequest,
    ) -> std::result::Result<OperationHandle, SubmissionError>;

    /// Ask whether an operation has been included and whether it succeeded.
    async fn outcome(&self, id: &OperationId) -> Result<Outcome>;
}

/// A pushed inclusion notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionNotice {
    pub id: OperationId,
    pub outcome: Outcome,
}

impl InclusionNotice {
    pub fn new(id: impl Into<OperationId>, outcome: Outcome) -> Self {
        Self {
            id: id.into(),
            outcome,
        }
    }
}

/// Optional push channel for inclusion notices.
///
/// Delivery is best effort: notices may be late, duplicated, out of order,
/// missing entirely, or about other operations than the one subscribed to.
pub trait PushSubscription: Send + Sync {
    fn subscribe(&self, id: &OperationId) -> mpsc::Receiver<InclusionNotice>;
}

use commit_core::OperationDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{amount_arg, approve_then, CommitFlow};
use crate::error::Result;

const METHOD: &str = "makePayment";

/// Contribution to a circle's current round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFlow {
    pub asset: String,
    /// Circle contract address
    pub circle: String,
    pub amount: u128,
    pub round: u32,
}

impl PaymentFlow {
    pub fn new(
        asset: impl Into<String>,
        circle: impl Into<String>,
        amount: u128,
        round: u32,
    ) -> Self {
        Self {
            asset: asset.into(),
            circle: circle.into(),
            amount,
            round,
        }
    }
}

impl CommitFlow for PaymentFlow {
    fn name(&self) -> &'static str {
        "payment"
    }

    fn descriptors(&self) -> Result<(OperationDescriptor, OperationDescriptor)> {
        approve_then(
            &self.asset,
            &self.circle,
            self.amount,
            METHOD,
            vec![json!(self.round), amount_arg(self.amount)],
        )
    }
}

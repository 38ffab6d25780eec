use commit_core::OperationDescriptor;
use serde::{Deserialize, Serialize};

use super::{amount_arg, approve_then, CommitFlow};
use crate::error::Result;

const METHOD: &str = "depositGuarantee";

/// Guarantee deposit required before a member can join a circle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuaranteeDepositFlow {
    pub asset: String,
    pub circle: String,
    pub amount: u128,
}

impl GuaranteeDepositFlow {
    pub fn new(asset: impl Into<String>, circle: impl Into<String>, amount: u128) -> Self {
        Self {
            asset: asset.into(),
            circle: circle.into(),
            amount,
        }
    }
}

impl CommitFlow for GuaranteeDepositFlow {
    fn name(&self) -> &'static str {
        "guarantee"
    }

    fn descriptors(&self) -> Result<(OperationDescriptor, OperationDescriptor)> {
        approve_then(
            &self.asset,
            &self.circle,
            self.amount,
            METHOD,
            vec![amount_arg(self.amount)],
        )
    }
}

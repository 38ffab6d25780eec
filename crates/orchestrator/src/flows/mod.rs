//! Call-site flows that pair an allowance grant with the action consuming it.
//!
//! - [`PaymentFlow`] - Pay a circle's current round
//! - [`GuaranteeDepositFlow`] - Lock the guarantee required to join a circle

mod guarantee;
mod payment;

pub use guarantee::GuaranteeDepositFlow;
pub use payment::PaymentFlow;

use commit_core::{CoreError, OperationDescriptor};
use serde_json::Value;

use crate::error::Result;

/// Supplies the two operations of an approve-then-act flow.
pub trait CommitFlow: Send + Sync {
    /// Short name used in logs and the CLI.
    fn name(&self) -> &'static str;

    /// The allowance grant and the action, validated.
    fn descriptors(&self) -> Result<(OperationDescriptor, OperationDescriptor)>;
}

/// Grant `circle` an allowance of `amount` on `asset`, then call `method` on it.
pub(crate) fn approve_then(
    asset: &str,
    circle: &str,
    amount: u128,
    method: &str,
    args: Vec<Value>,
) -> Result<(OperationDescriptor, OperationDescriptor)> {
    if amount == 0 {
        return Err(CoreError::Validation("amount must be positive".to_string()).into());
    }

    let first = OperationDescriptor::grant_allowance(asset, circle, amount);
    let second = OperationDescriptor::invoke(circle, method, args);
    first.request.validate()?;
    second.request.validate()?;
    Ok((first, second))
}

/// Amounts travel as decimal strings so values above 2^53 survive JSON.
pub(crate) fn amount_arg(amount: u128) -> Value {
    Value::String(amount.to_string())
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Ledger-assigned identifier of a submitted operation (e.g. a transaction hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for OperationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The operation to broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationRequest {
    /// Allow `spender` to move up to `amount` units of `asset` on the signer's behalf.
    GrantAllowance {
        asset: String,
        spender: String,
        amount: u128,
    },
    /// Call `method` on `target`.
    Invoke {
        target: String,
        method: String,
        #[serde(default)]
        args: Vec<serde_json::Value>,
    },
}

impl OperationRequest {
    /// Reject requests that can never succeed before anything is broadcast.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::GrantAllowance {
                asset,
                spender,
                amount,
            } => {
                if asset.trim().is_empty() {
                    return Err(CoreError::Validation("asset must not be empty".to_string()));
                }
                if spender.trim().is_empty() {
                    return Err(CoreError::Validation("spender must not be empty".to_string()));
                }
                if *amount == 0 {
                    return Err(CoreError::Validation(
                        "allowance amount must be positive".to_string(),
                    ));
                }
            }
            Self::Invoke { target, method, .. } => {
                if target.trim().is_empty() {
                    return Err(CoreError::Validation("target must not be empty".to_string()));
                }
                if method.trim().is_empty() {
                    return Err(CoreError::Validation("method must not be empty".to_string()));
                }
            }
        }
        Ok(())
    }
}

/// A request to submit one external operation, tagged for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    /// Human-readable tag, used only in logs and events
    pub kind: String,
    pub request: OperationRequest,
}

impl OperationDescriptor {
    pub fn new(kind: impl Into<String>, request: OperationRequest) -> Self {
        Self {
            kind: kind.into(),
            request,
        }
    }

    pub fn grant_allowance(
        asset: impl Into<String>,
        spender: impl Into<String>,
        amount: u128,
    ) -> Self {
        Self::new(
            "grant_allowance",
            OperationRequest::GrantAllowance {
                asset: asset.into(),
                spender: spender.into(),
                amount,
            },
        )
    }

    pub fn invoke(
        target: impl Into<String>,
        method: impl Into<String>,
        args: Vec<serde_json::Value>,
    ) -> Self {
        let method = method.into();
        Self::new(
            method.clone(),
            OperationRequest::Invoke {
                target: target.into(),
                method,
                args,
            },
        )
    }
}

/// Receipt for an operation the ledger accepted for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub id: OperationId,
    pub kind: String,
    pub submitted_at: DateTime<Utc>,
}

impl OperationHandle {
    pub fn new(id: impl Into<OperationId>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            submitted_at: Utc::now(),
        }
    }
}

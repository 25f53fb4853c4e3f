use crate::domain::types::{PolicyDenial, PolicyPhase, TransitionError};
use thiserror::Error;

/// Unified failure taxonomy for the ability pipeline.
///
/// The variants map one-to-one onto the failure classes the runtime
/// distinguishes: business denials (`PolicyDenied`, `Precondition`) never
/// touched the chain; transport classes (`Transient`, `Rpc`,
/// `BroadcastAmbiguous`) tell the caller whether a retry is safe; and
/// `CommitFailure` marks the one case where the on-chain effect stands even
/// though bookkeeping failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AbilityError {
    #[error("policy {} denied at {phase:?}: {}", denial.policy, denial.message)]
    PolicyDenied {
        phase: PolicyPhase,
        denial: PolicyDenial,
    },

    #[error("precondition failed ({check}): {message}")]
    Precondition {
        check: String,
        message: String,
        required: Option<String>,
        actual: Option<String>,
    },

    #[error("invalid configuration for {field}: {message}")]
    Configuration { field: String, message: String },

    #[error("transient infrastructure error during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("rpc returned error for {method}: {message}")]
    Rpc { method: String, message: String },

    #[error("signing service failed: {message}")]
    SigningFailed { message: String },

    #[error("insufficient funds for {address}: {message}")]
    InsufficientFunds { address: String, message: String },

    #[error("nonce conflict: {message}")]
    NonceConflict { message: String },

    #[error("broadcast outcome ambiguous: {message}")]
    BroadcastAmbiguous { message: String },

    #[error("commit for policy {policy} failed after successful execute: {message}")]
    CommitFailure { policy: String, message: String },

    #[error("missing fee field from network: {field}")]
    MissingFeeField { field: &'static str },

    #[error("fee oracle did not report a gas price")]
    MissingGasPrice,

    #[error("invalid invocation transition from {:?} on {}", .0.from, .0.event)]
    InvalidTransition(TransitionError),
}

impl AbilityError {
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// True when the failure is a business-rule outcome rather than an
    /// infrastructure fault. Denials and failed preconditions are expected
    /// results and must not be reported as pipeline failures.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::PolicyDenied { .. } | Self::Precondition { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::DenyCode;

    #[test]
    fn policy_denial_formats_policy_and_phase() {
        let error = AbilityError::PolicyDenied {
            phase: PolicyPhase::Evaluate,
            denial: PolicyDenial {
                policy: "contract-whitelist".to_string(),
                code: DenyCode::ContractNotAllowed,
                message: "contract is not whitelisted".to_string(),
                chain_id: Some(8453),
                contract: Some("0x2222222222222222222222222222222222222222".to_string()),
                selector: None,
            },
        };
        let rendered = error.to_string();
        assert!(rendered.contains("contract-whitelist"));
        assert!(rendered.contains("Evaluate"));
    }

    #[test]
    fn denial_classification_covers_policy_and_precondition() {
        assert!(AbilityError::Precondition {
            check: "native-balance".to_string(),
            message: "balance below required".to_string(),
            required: Some("100".to_string()),
            actual: Some("1".to_string()),
        }
        .is_denial());
        assert!(!AbilityError::MissingGasPrice.is_denial());
    }
}

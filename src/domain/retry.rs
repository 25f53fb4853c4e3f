use crate::error::AbilityError;

/// Advice surfaced to the caller after a failed invocation. The runtime
/// never retries on its own: broadcast retries need a fresh nonce and fresh
/// gas parameters, and only the caller can decide whether to pay again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Safe to retry immediately; no chain mutation occurred.
    RetryImmediate,
    /// Safe to retry after waiting out transient infrastructure trouble.
    Backoff { secs: u64 },
    /// The submission outcome is unknown. The caller must look up the
    /// transaction on chain before resubmitting, or risk double-spending
    /// the nonce.
    CheckChainFirst,
    /// Retryable, but only with a freshly fetched nonce and gas plan.
    RefreshNonceAndRetry,
    /// Business outcome or permanent fault; retrying will not help.
    Fatal,
}

pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 5;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 120;

pub fn decide_retry(error: &AbilityError, consecutive_failures: u32) -> RetryDecision {
    match error {
        AbilityError::Transient { .. } | AbilityError::SigningFailed { .. } => {
            if consecutive_failures == 0 {
                RetryDecision::RetryImmediate
            } else {
                RetryDecision::Backoff {
                    secs: exponential_backoff_secs(
                        DEFAULT_BACKOFF_BASE_SECS,
                        DEFAULT_BACKOFF_MAX_SECS,
                        consecutive_failures,
                    ),
                }
            }
        }
        AbilityError::Rpc { .. } => RetryDecision::Backoff {
            secs: exponential_backoff_secs(
                DEFAULT_BACKOFF_BASE_SECS,
                DEFAULT_BACKOFF_MAX_SECS,
                consecutive_failures,
            ),
        },
        AbilityError::BroadcastAmbiguous { .. } => RetryDecision::CheckChainFirst,
        AbilityError::NonceConflict { .. } => RetryDecision::RefreshNonceAndRetry,
        AbilityError::PolicyDenied { .. }
        | AbilityError::Precondition { .. }
        | AbilityError::Configuration { .. }
        | AbilityError::InsufficientFunds { .. }
        | AbilityError::CommitFailure { .. }
        | AbilityError::MissingFeeField { .. }
        | AbilityError::MissingGasPrice
        | AbilityError::InvalidTransition(_) => RetryDecision::Fatal,
    }
}

fn exponential_backoff_secs(base_secs: u64, max_secs: u64, consecutive_failures: u32) -> u64 {
    let bounded_max = max_secs.max(1);
    let bounded_base = base_secs.clamp(1, bounded_max);
    let shift = consecutive_failures.min(20);
    let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    bounded_base.saturating_mul(multiplier).min(bounded_max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failure_retries_immediately_on_first_failure() {
        let error = AbilityError::transient("eth_gasPrice", "connection reset");
        assert_eq!(decide_retry(&error, 0), RetryDecision::RetryImmediate);
    }

    #[test]
    fn transient_failure_backs_off_exponentially_after_retries() {
        let error = AbilityError::transient("eth_gasPrice", "connection reset");
        assert_eq!(decide_retry(&error, 1), RetryDecision::Backoff { secs: 10 });
        assert_eq!(decide_retry(&error, 4), RetryDecision::Backoff { secs: 80 });
        assert_eq!(
            decide_retry(&error, 12),
            RetryDecision::Backoff {
                secs: DEFAULT_BACKOFF_MAX_SECS
            }
        );
    }

    #[test]
    fn ambiguous_broadcast_requires_chain_lookup() {
        let error = AbilityError::BroadcastAmbiguous {
            message: "request timed out after submit".to_string(),
        };
        assert_eq!(decide_retry(&error, 0), RetryDecision::CheckChainFirst);
    }

    #[test]
    fn nonce_conflict_requires_fresh_nonce() {
        let error = AbilityError::NonceConflict {
            message: "nonce too low".to_string(),
        };
        assert_eq!(decide_retry(&error, 0), RetryDecision::RefreshNonceAndRetry);
    }

    #[test]
    fn insufficient_funds_is_fatal() {
        let error = AbilityError::InsufficientFunds {
            address: "0x1111111111111111111111111111111111111111".to_string(),
            message: "insufficient funds for gas * price + value".to_string(),
        };
        assert_eq!(decide_retry(&error, 0), RetryDecision::Fatal);
    }
}

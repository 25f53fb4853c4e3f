use crate::domain::types::{Receipt, SignedTransaction};
use crate::error::AbilityError;
use crate::rpc::EvmRpcClient;
use std::time::Duration;
use tracing::{debug, warn};

const RECEIPT_POLL_INTERVAL_SECS: u64 = 2;
const RECEIPT_POLL_ATTEMPTS: u32 = 30;

/// Submits signed transactions and optionally waits for confirmation.
///
/// Submission is never retried here: a resubmission needs a fresh nonce and
/// fresh gas parameters, and whether to pay again is the caller's call.
pub struct Broadcaster<'a> {
    rpc: &'a EvmRpcClient,
}

impl<'a> Broadcaster<'a> {
    pub fn new(rpc: &'a EvmRpcClient) -> Self {
        Self { rpc }
    }

    /// Broadcast and return the transaction hash without waiting for
    /// inclusion.
    pub async fn submit(
        &self,
        signed: &SignedTransaction,
        sender: &str,
    ) -> Result<String, AbilityError> {
        match self.rpc.eth_send_raw_transaction(&signed.raw).await {
            Ok(tx_hash) => {
                debug!(tx_hash = %tx_hash, "transaction submitted");
                Ok(tx_hash)
            }
            Err(error) => Err(classify_submit_error(error, sender)),
        }
    }

    /// Poll for a receipt until the transaction has `confirmations`
    /// confirmations. Returns `Ok(None)` when the transaction is still
    /// pending after the polling budget; the caller's terminal state is then
    /// `Executed` with confirmation pending.
    pub async fn wait(
        &self,
        tx_hash: &str,
        confirmations: u64,
    ) -> Result<Option<Receipt>, AbilityError> {
        for attempt in 0..RECEIPT_POLL_ATTEMPTS {
            if let Some(receipt) = self.rpc.eth_get_transaction_receipt(tx_hash).await? {
                let latest = self.rpc.eth_block_number().await?;
                let depth = latest.saturating_sub(receipt.block_number).saturating_add(1);
                if depth >= confirmations.max(1) {
                    return Ok(Some(receipt));
                }
                debug!(
                    tx_hash,
                    depth, confirmations, "receipt found, waiting for confirmation depth"
                );
            } else if attempt == 0 {
                debug!(tx_hash, "no receipt yet");
            }
            tokio::time::sleep(Duration::from_secs(RECEIPT_POLL_INTERVAL_SECS)).await;
        }
        warn!(tx_hash, "confirmation polling budget exhausted");
        Ok(None)
    }
}

/// Sort a failed submission into the caller-facing retry classes. A
/// transport failure on the send itself is ambiguous: the node may have
/// accepted the transaction before the connection died, so the caller must
/// check the chain before resubmitting.
fn classify_submit_error(error: AbilityError, sender: &str) -> AbilityError {
    match error {
        AbilityError::Transient { message, .. } => AbilityError::BroadcastAmbiguous { message },
        AbilityError::Rpc { message, .. } => {
            let lowered = message.to_ascii_lowercase();
            if lowered.contains("insufficient funds") {
                AbilityError::InsufficientFunds {
                    address: sender.to_string(),
                    message,
                }
            } else if lowered.contains("nonce") {
                AbilityError::NonceConflict { message }
            } else {
                AbilityError::Rpc {
                    method: "eth_sendRawTransaction".to_string(),
                    message,
                }
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER: &str = "0x1111111111111111111111111111111111111111";

    #[test]
    fn transport_failure_on_submit_is_ambiguous() {
        let classified = classify_submit_error(
            AbilityError::transient("eth_sendRawTransaction", "connection reset mid-request"),
            SENDER,
        );
        assert!(matches!(
            classified,
            AbilityError::BroadcastAmbiguous { .. }
        ));
    }

    #[test]
    fn insufficient_funds_is_fatal_and_carries_the_sender() {
        let classified = classify_submit_error(
            AbilityError::Rpc {
                method: "eth_sendRawTransaction".to_string(),
                message: "insufficient funds for gas * price + value".to_string(),
            },
            SENDER,
        );
        assert!(
            matches!(classified, AbilityError::InsufficientFunds { address, .. } if address == SENDER)
        );
    }

    #[test]
    fn nonce_errors_surface_as_nonce_conflict() {
        for message in ["nonce too low", "replacement transaction underpriced nonce"] {
            let classified = classify_submit_error(
                AbilityError::Rpc {
                    method: "eth_sendRawTransaction".to_string(),
                    message: message.to_string(),
                },
                SENDER,
            );
            assert!(matches!(classified, AbilityError::NonceConflict { .. }));
        }
    }

    #[test]
    fn other_rpc_errors_pass_through_for_caller_decision() {
        let classified = classify_submit_error(
            AbilityError::Rpc {
                method: "eth_sendRawTransaction".to_string(),
                message: "execution reverted".to_string(),
            },
            SENDER,
        );
        assert!(matches!(classified, AbilityError::Rpc { .. }));
    }
}

use crate::domain::types::Receipt;
use crate::error::AbilityError;
use crate::hexutil::{normalize_hex_blob, parse_hex_u256, parse_hex_u64};
use alloy_primitives::U256;
use serde_json::{json, Value};
use std::time::Duration;

const MAX_RPC_RESPONSE_BYTES: u64 = 2 * 1024 * 1024;
const DEFAULT_RPC_RESPONSE_BYTES: u64 = 256 * 1024;
const RPC_REQUEST_TIMEOUT_SECS: u64 = 30;

/// JSON-RPC client over a primary endpoint with an optional fallback.
///
/// The fallback is only consulted on transport-level failures; a JSON-RPC
/// `error` member is an answer from the chain, not an outage, and is never
/// retried against the fallback.
#[derive(Clone, Debug)]
pub struct EvmRpcClient {
    http: reqwest::Client,
    rpc_url: String,
    fallback_rpc_url: Option<String>,
    max_response_bytes: u64,
}

impl EvmRpcClient {
    pub fn new(rpc_url: &str, fallback_rpc_url: Option<&str>) -> Result<Self, AbilityError> {
        let rpc_url = rpc_url.trim();
        if rpc_url.is_empty() {
            return Err(AbilityError::configuration(
                "rpcUrl",
                "rpc url is not configured",
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(RPC_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|error| {
                AbilityError::configuration("rpcUrl", format!("failed to build http client: {error}"))
            })?;
        Ok(Self {
            http,
            rpc_url: rpc_url.to_string(),
            fallback_rpc_url: fallback_rpc_url
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string),
            max_response_bytes: clamp_response_bytes(DEFAULT_RPC_RESPONSE_BYTES),
        })
    }

    pub fn with_max_response_bytes(mut self, max_response_bytes: u64) -> Self {
        self.max_response_bytes = clamp_response_bytes(max_response_bytes);
        self
    }

    pub async fn eth_block_number(&self) -> Result<u64, AbilityError> {
        let raw = self.call_for_str("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&raw, "eth_blockNumber").map_err(|message| AbilityError::Rpc {
            method: "eth_blockNumber".to_string(),
            message,
        })
    }

    pub async fn eth_get_balance(&self, address: &str) -> Result<U256, AbilityError> {
        let raw = self
            .call_for_str("eth_getBalance", json!([address, "latest"]))
            .await?;
        parse_hex_u256(&raw, "eth_getBalance result").map_err(|message| AbilityError::Rpc {
            method: "eth_getBalance".to_string(),
            message,
        })
    }

    pub async fn eth_call(&self, to: &str, calldata: &str) -> Result<String, AbilityError> {
        let raw = self
            .call_for_str("eth_call", json!([{"to": to, "data": calldata}, "latest"]))
            .await?;
        normalize_hex_blob(&raw, "eth_call result").map_err(|message| AbilityError::Rpc {
            method: "eth_call".to_string(),
            message,
        })
    }

    pub async fn eth_estimate_gas(
        &self,
        from: &str,
        to: &str,
        value_wei: U256,
        data_hex: &str,
    ) -> Result<u64, AbilityError> {
        let value_hex = format!("0x{value_wei:x}");
        let raw = self
            .call_for_str(
                "eth_estimateGas",
                json!([{
                    "from": from,
                    "to": to,
                    "value": value_hex,
                    "data": data_hex
                }]),
            )
            .await?;
        parse_hex_u64(&raw, "eth_estimateGas").map_err(|message| AbilityError::Rpc {
            method: "eth_estimateGas".to_string(),
            message,
        })
    }

    pub async fn eth_gas_price(&self) -> Result<U256, AbilityError> {
        let raw = self.call_for_str("eth_gasPrice", json!([])).await?;
        parse_hex_u256(&raw, "eth_gasPrice").map_err(|message| AbilityError::Rpc {
            method: "eth_gasPrice".to_string(),
            message,
        })
    }

    pub async fn eth_max_priority_fee_per_gas(&self) -> Result<U256, AbilityError> {
        let raw = self
            .call_for_str("eth_maxPriorityFeePerGas", json!([]))
            .await?;
        parse_hex_u256(&raw, "eth_maxPriorityFeePerGas").map_err(|message| AbilityError::Rpc {
            method: "eth_maxPriorityFeePerGas".to_string(),
            message,
        })
    }

    /// Base fee of the latest block, when the chain exposes one. A chain
    /// without `baseFeePerGas` in its block headers is pre-EIP-1559.
    pub async fn latest_base_fee(&self) -> Result<Option<U256>, AbilityError> {
        let response = self
            .rpc_call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let block = response.get("result").cloned().ok_or_else(|| AbilityError::Rpc {
            method: "eth_getBlockByNumber".to_string(),
            message: "result was missing".to_string(),
        })?;
        match block.get("baseFeePerGas").and_then(Value::as_str) {
            Some(raw) => parse_hex_u256(raw, "baseFeePerGas")
                .map(Some)
                .map_err(|message| AbilityError::Rpc {
                    method: "eth_getBlockByNumber".to_string(),
                    message,
                }),
            None => Ok(None),
        }
    }

    /// Pending-state nonce. Always fetched fresh; callers must not cache
    /// across retries.
    pub async fn eth_get_transaction_count(&self, address: &str) -> Result<u64, AbilityError> {
        let raw = self
            .call_for_str("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        parse_hex_u64(&raw, "eth_getTransactionCount").map_err(|message| AbilityError::Rpc {
            method: "eth_getTransactionCount".to_string(),
            message,
        })
    }

    pub async fn eth_send_raw_transaction(&self, raw_tx: &[u8]) -> Result<String, AbilityError> {
        let payload = format!("0x{}", hex::encode(raw_tx));
        let raw = self
            .call_for_str("eth_sendRawTransaction", json!([payload]))
            .await?;
        normalize_hex_blob(&raw, "eth_sendRawTransaction result").map_err(|message| {
            AbilityError::Rpc {
                method: "eth_sendRawTransaction".to_string(),
                message,
            }
        })
    }

    pub async fn eth_get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<Receipt>, AbilityError> {
        let response = self
            .rpc_call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        let result = match response.get("result") {
            None | Some(Value::Null) => return Ok(None),
            Some(result) => result,
        };
        let rpc_error = |message: String| AbilityError::Rpc {
            method: "eth_getTransactionReceipt".to_string(),
            message,
        };
        let block_number = result
            .get("blockNumber")
            .and_then(Value::as_str)
            .ok_or_else(|| rpc_error("receipt missing blockNumber".to_string()))
            .and_then(|raw| parse_hex_u64(raw, "blockNumber").map_err(rpc_error))?;
        let status = result
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| rpc_error("receipt missing status".to_string()))
            .and_then(|raw| parse_hex_u64(raw, "status").map_err(rpc_error))?;
        Ok(Some(Receipt {
            tx_hash: tx_hash.to_string(),
            block_number,
            status: status == 1,
        }))
    }

    async fn call_for_str(&self, method: &str, params: Value) -> Result<String, AbilityError> {
        let response = self.rpc_call(method, params).await?;
        response
            .get("result")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AbilityError::Rpc {
                method: method.to_string(),
                message: "result was missing".to_string(),
            })
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, AbilityError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let raw = self.http_post(method, &body).await?;
        let value: Value = serde_json::from_slice(&raw).map_err(|error| AbilityError::Rpc {
            method: method.to_string(),
            message: format!("failed to parse response JSON: {error}"),
        })?;
        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(AbilityError::Rpc {
                method: method.to_string(),
                message,
            });
        }
        Ok(value)
    }

    async fn http_post(&self, method: &str, body: &Value) -> Result<Vec<u8>, AbilityError> {
        match self.try_http_post(&self.rpc_url, method, body).await {
            Ok(raw) => Ok(raw),
            Err(primary_error) => {
                if let Some(fallback_url) = self.fallback_rpc_url.as_deref() {
                    self.try_http_post(fallback_url, method, body)
                        .await
                        .map_err(|fallback_error| {
                            AbilityError::transient(
                                method,
                                format!(
                                    "primary rpc failed: {primary_error}; fallback rpc failed: {fallback_error}"
                                ),
                            )
                        })
                } else {
                    Err(AbilityError::transient(method, primary_error))
                }
            }
        }
    }

    async fn try_http_post(
        &self,
        url: &str,
        method: &str,
        body: &Value,
    ) -> Result<Vec<u8>, String> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|error| format!("rpc transport failed for {method}: {error}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("rpc returned status {status}"));
        }
        let raw = response
            .bytes()
            .await
            .map_err(|error| format!("failed to read rpc response body: {error}"))?;
        if u64::try_from(raw.len()).unwrap_or(u64::MAX) > self.max_response_bytes {
            return Err(format!(
                "rpc response exceeded max_response_bytes={}",
                self.max_response_bytes
            ));
        }
        Ok(raw.to_vec())
    }
}

fn clamp_response_bytes(max_response_bytes: u64) -> u64 {
    max_response_bytes.clamp(256, MAX_RPC_RESPONSE_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_requires_configured_rpc_url() {
        assert!(EvmRpcClient::new("", None).is_err());
        assert!(EvmRpcClient::new("   ", Some("https://fallback.example.org")).is_err());
        assert!(EvmRpcClient::new("https://mainnet.base.org", None).is_ok());
    }

    #[test]
    fn blank_fallback_url_is_treated_as_absent() {
        let client = EvmRpcClient::new("https://mainnet.base.org", Some("  "))
            .expect("client should build");
        assert!(client.fallback_rpc_url.is_none());
    }

    #[test]
    fn response_byte_cap_is_clamped_to_safe_bounds() {
        let client = EvmRpcClient::new("https://mainnet.base.org", None)
            .expect("client should build")
            .with_max_response_bytes(16);
        assert_eq!(client.max_response_bytes, 256);

        let client = client.with_max_response_bytes(u64::MAX);
        assert_eq!(client.max_response_bytes, MAX_RPC_RESPONSE_BYTES);
    }
}

use crate::error::AbilityError;
use crate::hexutil::{normalize_address, normalize_hex_blob, parse_decimal_u256};
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Gas-limit headroom applied when the caller does not configure one.
/// Scaled by 100: 2_000 = 20%.
pub const DEFAULT_GAS_LIMIT_BUFFER_BPS: u64 = 2_000;
/// Base-fee multiplier applied when the caller does not configure one.
/// Scaled by 100: 150 = 1.5x.
pub const DEFAULT_BASE_FEE_MULTIPLIER_PCT: u64 = 150;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum InvocationState {
    Created,
    Prechecked,
    Evaluated,
    Executed,
    Committed,
    Denied,
    Failed,
}

#[derive(Clone, Debug)]
pub enum InvocationEvent {
    PrecheckPassed,
    EvaluatePassed,
    ExecuteSucceeded,
    CommitCompleted,
    Denied { reason: String },
    Failed { reason: String },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransitionError {
    pub from: InvocationState,
    pub event: String,
    pub reason: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PolicyPhase {
    Precheck,
    Evaluate,
    Commit,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DenyCode {
    ChainNotAllowed,
    ContractNotAllowed,
    SelectorNotAllowed,
    RateLimited,
    MissingUserParams,
    Other,
}

/// Structured denial emitted by a policy. Carries enough context (chain,
/// contract, selector) to be actionable without log correlation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PolicyDenial {
    pub policy: String,
    pub code: DenyCode,
    pub message: String,
    pub chain_id: Option<u64>,
    pub contract: Option<String>,
    pub selector: Option<String>,
}

/// Outcome of one policy phase. `Allow` carries the policy's result payload,
/// which the engine threads into that policy's commit phase.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Verdict {
    Allow(Value),
    Deny(PolicyDenial),
}

impl Verdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow(_))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyVerdictRecord {
    pub policy: String,
    pub phase: PolicyPhase,
    pub verdict: Verdict,
}

/// Fee parameters attached to a transaction before signing. Exactly one
/// variant exists per plan; the chain's fee model selects it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum GasPlan {
    Legacy {
        gas_price: U256,
        estimated_gas: u64,
    },
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
        estimated_gas: u64,
    },
}

impl GasPlan {
    pub fn estimated_gas(&self) -> u64 {
        match self {
            GasPlan::Legacy { estimated_gas, .. } => *estimated_gas,
            GasPlan::Eip1559 { estimated_gas, .. } => *estimated_gas,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas_plan: GasPlan,
}

/// A broadcastable transaction. Immutable once built; resubmission requires
/// a fresh nonce and fresh gas parameters through the builder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Bytes,
    pub tx_hash: B256,
}

impl SignedTransaction {
    pub fn tx_hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.tx_hash.as_slice()))
    }
}

/// Per-address send counter persisted by the rate-limit policy's store.
/// `version` implements optimistic concurrency: a write with a stale version
/// reports a conflict instead of silently losing an increment.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CounterState {
    pub count: u32,
    pub window_start: u64,
    pub version: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub status: bool,
}

/// The transaction surface a policy is allowed to inspect before anything is
/// built or signed: target chain, target contract, and function selector.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallPreview {
    pub chain_id: u64,
    pub to: String,
    pub selector: Option<String>,
}

/// Call fields recovered from an already-serialized transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedCall {
    pub chain_id: Option<u64>,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxIntent {
    Erc20Approval {
        token: String,
        spender: String,
        /// Whole-token amount; converted to base units with the token's
        /// on-chain `decimals` at execute time.
        amount: U256,
    },
    ContractCall {
        to: String,
        calldata: String,
    },
    SignedPassthrough {
        raw_tx: String,
        decoded: DecodedCall,
    },
}

/// Validated, immutable inputs to one ability invocation. Constructed only
/// through [`AbilityParams::validate`]; raw maps never cross this boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbilityParams {
    pub chain_id: u64,
    pub rpc_url: String,
    pub fallback_rpc_url: Option<String>,
    pub delegator: String,
    pub gas_limit_buffer_bps: u64,
    pub base_fee_multiplier_pct: u64,
    pub intent: TxIntent,
    pub preview: CallPreview,
}

impl AbilityParams {
    /// Validate a raw parameter object as delivered by the invocation API.
    ///
    /// Addresses are normalized to lowercase 0x-hex, amounts parsed as
    /// decimal strings, and percentage fields rejected unless the JSON
    /// number is an exact non-negative integer.
    pub fn validate(raw: &Value) -> Result<Self, AbilityError> {
        let chain_id = require_integer(raw, "chainId")?;
        if chain_id == 0 {
            return Err(AbilityError::configuration(
                "chainId",
                "chain id must be greater than zero",
            ));
        }
        let rpc_url = require_string(raw, "rpcUrl")?;
        if rpc_url.trim().is_empty() {
            return Err(AbilityError::configuration(
                "rpcUrl",
                "rpc url cannot be empty",
            ));
        }
        let fallback_rpc_url =
            optional_string(raw, "fallbackRpcUrl")?.filter(|url| !url.trim().is_empty());
        let delegator = address_field(raw, "delegator")?;

        let gas_limit_buffer_bps =
            optional_integer(raw, "gasLimitBufferPct")?.unwrap_or(DEFAULT_GAS_LIMIT_BUFFER_BPS);
        let base_fee_multiplier_pct = optional_integer(raw, "baseFeeMultiplierPct")?
            .unwrap_or(DEFAULT_BASE_FEE_MULTIPLIER_PCT);

        let intent_raw = raw
            .get("intent")
            .ok_or_else(|| AbilityError::configuration("intent", "intent is required"))?;
        let intent = validate_intent(intent_raw)?;
        let preview = preview_for(chain_id, &intent);

        Ok(Self {
            chain_id,
            rpc_url: rpc_url.trim().to_string(),
            fallback_rpc_url,
            delegator,
            gas_limit_buffer_bps,
            base_fee_multiplier_pct,
            intent,
            preview,
        })
    }

    pub fn delegator_address(&self) -> Result<Address, AbilityError> {
        Address::from_str(&self.delegator).map_err(|error| {
            AbilityError::configuration("delegator", format!("invalid address: {error}"))
        })
    }
}

fn validate_intent(raw: &Value) -> Result<TxIntent, AbilityError> {
    let kind = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AbilityError::configuration("intent.type", "intent type is required"))?;

    match kind {
        "erc20Approval" => {
            let token = address_field(raw, "token")?;
            let spender = address_field(raw, "spender")?;
            let amount = raw.get("amount").and_then(Value::as_str).ok_or_else(|| {
                AbilityError::configuration("intent.amount", "amount must be a decimal string")
            })?;
            let amount = parse_decimal_u256(amount, "amount")
                .map_err(|message| AbilityError::configuration("intent.amount", message))?;
            Ok(TxIntent::Erc20Approval {
                token,
                spender,
                amount,
            })
        }
        "contractCall" => {
            let to = address_field(raw, "to")?;
            let calldata = raw
                .get("calldata")
                .and_then(Value::as_str)
                .ok_or_else(|| AbilityError::configuration("intent.calldata", "calldata is required"))?;
            let calldata = normalize_hex_blob(calldata, "calldata")
                .map_err(|message| AbilityError::configuration("intent.calldata", message))?;
            Ok(TxIntent::ContractCall { to, calldata })
        }
        "signedTransaction" => {
            let raw_tx = raw
                .get("rawTransaction")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    AbilityError::configuration(
                        "intent.rawTransaction",
                        "serialized transaction is required",
                    )
                })?;
            let raw_tx = normalize_hex_blob(raw_tx, "rawTransaction")
                .map_err(|message| AbilityError::configuration("intent.rawTransaction", message))?;
            let bytes = hex::decode(raw_tx.trim_start_matches("0x")).map_err(|error| {
                AbilityError::configuration("intent.rawTransaction", format!("invalid hex: {error}"))
            })?;
            let decoded = crate::tx::decode_raw_transaction(&bytes)
                .map_err(|message| AbilityError::configuration("intent.rawTransaction", message))?;
            Ok(TxIntent::SignedPassthrough { raw_tx, decoded })
        }
        unsupported => Err(AbilityError::configuration(
            "intent.type",
            format!(
                "intent type must be one of erc20Approval, contractCall or signedTransaction, got {unsupported}"
            ),
        )),
    }
}

fn preview_for(chain_id: u64, intent: &TxIntent) -> CallPreview {
    let (to, selector) = match intent {
        TxIntent::Erc20Approval { token, .. } => {
            (token.clone(), Some(crate::abi::APPROVE_SELECTOR.to_string()))
        }
        TxIntent::ContractCall { to, calldata } => {
            (to.clone(), crate::abi::extract_selector(calldata))
        }
        TxIntent::SignedPassthrough { decoded, .. } => {
            let data_hex = format!("0x{}", hex::encode(&decoded.data));
            (
                format!("0x{}", hex::encode(decoded.to.as_slice())),
                crate::abi::extract_selector(&data_hex),
            )
        }
    };
    CallPreview {
        chain_id,
        to,
        selector,
    }
}

fn require_string(raw: &Value, field: &str) -> Result<String, AbilityError> {
    raw.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AbilityError::configuration(field, "must be a string"))
}

fn optional_string(raw: &Value, field: &str) -> Result<Option<String>, AbilityError> {
    match raw.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(AbilityError::configuration(field, "must be a string")),
    }
}

/// Integer fields are a precondition, not a rounding opportunity: a JSON
/// number with a fractional part is a caller error.
fn require_integer(raw: &Value, field: &str) -> Result<u64, AbilityError> {
    match raw.get(field) {
        Some(value) => integer_value(value, field),
        None => Err(AbilityError::configuration(field, "is required")),
    }
}

fn optional_integer(raw: &Value, field: &str) -> Result<Option<u64>, AbilityError> {
    match raw.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => integer_value(value, field).map(Some),
    }
}

fn integer_value(value: &Value, field: &str) -> Result<u64, AbilityError> {
    value.as_u64().ok_or_else(|| {
        AbilityError::configuration(
            field,
            "must be a non-negative integer (fractional values are rejected, not rounded)",
        )
    })
}

fn address_field(raw: &Value, field: &str) -> Result<String, AbilityError> {
    let value = raw
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| AbilityError::configuration(field, "must be an address string"))?;
    normalize_address(value).map_err(|message| AbilityError::configuration(field, message))
}

/// Final state of one invocation as reported to the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvocationReport {
    pub phase: InvocationState,
    pub verdicts: Vec<PolicyVerdictRecord>,
    pub tx_hash: Option<String>,
    pub confirmation_pending: bool,
    pub result: Option<Value>,
    pub commit_warnings: Vec<String>,
    pub error: Option<String>,
}

impl InvocationReport {
    pub fn is_success(&self) -> bool {
        matches!(
            self.phase,
            InvocationState::Prechecked | InvocationState::Executed | InvocationState::Committed
        )
    }
}

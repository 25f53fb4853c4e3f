use crate::abi;
use crate::abilities::{send_resolved_call, Ability, ExecuteOutcome, ExecutionContext};
use crate::domain::types::{AbilityParams, TxIntent};
use crate::error::AbilityError;
use crate::rpc::EvmRpcClient;
use crate::tx::ResolvedCall;
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::str::FromStr;
use tracing::info;

const SIGNING_PURPOSE: &str = "erc20-approval";

/// Set an ERC-20 allowance for a spender.
///
/// The requested amount is a whole-token figure; the on-chain `decimals` is
/// read at execute time and the approval is submitted for exactly
/// `amount * 10^decimals` base units. When the existing allowance already
/// covers the requested amount the broadcast is skipped and the existing
/// allowance is reported instead.
pub struct Erc20ApprovalAbility;

struct ApprovalIntent<'a> {
    token: &'a str,
    spender: &'a str,
    amount: U256,
}

fn intent_of(params: &AbilityParams) -> Result<ApprovalIntent<'_>, AbilityError> {
    match &params.intent {
        TxIntent::Erc20Approval {
            token,
            spender,
            amount,
        } => Ok(ApprovalIntent {
            token,
            spender,
            amount: *amount,
        }),
        _ => Err(AbilityError::configuration(
            "intent",
            "erc20 approval ability requires an erc20Approval intent",
        )),
    }
}

async fn read_decimals(rpc: &EvmRpcClient, token: &str) -> Result<u8, AbilityError> {
    let calldata = format!("0x{}", hex::encode(abi::encode_decimals()));
    let result = rpc.eth_call(token, &calldata).await?;
    abi::decode_u8_word(&result, "decimals").map_err(|message| AbilityError::Rpc {
        method: "eth_call".to_string(),
        message,
    })
}

async fn read_allowance(
    rpc: &EvmRpcClient,
    token: &str,
    owner: Address,
    spender: Address,
) -> Result<U256, AbilityError> {
    let calldata = format!("0x{}", hex::encode(abi::encode_allowance(owner, spender)));
    let result = rpc.eth_call(token, &calldata).await?;
    abi::decode_uint_word(&result, "allowance").map_err(|message| AbilityError::Rpc {
        method: "eth_call".to_string(),
        message,
    })
}

fn base_units(amount: U256, decimals: u8) -> Result<U256, AbilityError> {
    let scale = U256::from(10u64)
        .checked_pow(U256::from(decimals))
        .ok_or_else(|| {
            AbilityError::configuration("intent.amount", "token decimals out of range")
        })?;
    amount.checked_mul(scale).ok_or_else(|| {
        AbilityError::configuration("intent.amount", "amount in base units exceeds uint256")
    })
}

#[async_trait]
impl Ability for Erc20ApprovalAbility {
    fn name(&self) -> &'static str {
        "erc20-approval"
    }

    async fn precheck(
        &self,
        params: &AbilityParams,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Value, AbilityError> {
        let intent = intent_of(params)?;
        let owner = params.delegator_address()?;
        let spender = Address::from_str(intent.spender).map_err(|error| {
            AbilityError::configuration("intent.spender", format!("invalid address: {error}"))
        })?;

        let native_balance = ctx.rpc.eth_get_balance(&params.delegator).await?;
        if native_balance.is_zero() {
            return Err(AbilityError::Precondition {
                check: "native-balance".to_string(),
                message: "delegator holds no native balance to pay for gas".to_string(),
                required: Some("> 0".to_string()),
                actual: Some("0".to_string()),
            });
        }

        let decimals = read_decimals(ctx.rpc, intent.token).await?;
        let allowance = read_allowance(ctx.rpc, intent.token, owner, spender).await?;
        let required = base_units(intent.amount, decimals)?;

        Ok(json!({
            "decimals": decimals,
            "currentAllowance": allowance.to_string(),
            "requiredAmount": required.to_string(),
            "alreadySufficient": allowance >= required,
        }))
    }

    async fn execute(
        &self,
        params: &AbilityParams,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ExecuteOutcome, AbilityError> {
        let intent = intent_of(params)?;
        let owner = params.delegator_address()?;
        let token = Address::from_str(intent.token).map_err(|error| {
            AbilityError::configuration("intent.token", format!("invalid address: {error}"))
        })?;
        let spender = Address::from_str(intent.spender).map_err(|error| {
            AbilityError::configuration("intent.spender", format!("invalid address: {error}"))
        })?;

        let decimals = read_decimals(ctx.rpc, intent.token).await?;
        let required = base_units(intent.amount, decimals)?;
        let allowance = read_allowance(ctx.rpc, intent.token, owner, spender).await?;

        // The goal may already be satisfied; report the standing allowance
        // rather than failing or re-approving.
        if allowance >= required {
            info!(
                token = intent.token,
                allowance = %allowance,
                "existing allowance already covers the requested amount; skipping broadcast"
            );
            return Ok(ExecuteOutcome {
                tx_hash: None,
                confirmation_pending: false,
                result: json!({
                    "alreadySufficient": true,
                    "approvedAmount": allowance.to_string(),
                    "spender": intent.spender,
                }),
            });
        }

        let call = ResolvedCall {
            to: token,
            data: abi::encode_approve(spender, required),
            value: U256::ZERO,
        };
        let (tx_hash, confirmation_pending) =
            send_resolved_call(params, ctx, call, SIGNING_PURPOSE).await?;

        Ok(ExecuteOutcome {
            tx_hash: Some(tx_hash),
            confirmation_pending,
            result: json!({
                "alreadySufficient": false,
                "approvedAmount": required.to_string(),
                "spender": intent.spender,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_units_scales_by_token_decimals() {
        assert_eq!(
            base_units(U256::from(100u64), 18).expect("scaling should succeed"),
            U256::from(100u64) * U256::from(10u64).pow(U256::from(18u64))
        );
        assert_eq!(
            base_units(U256::from(7u64), 0).expect("zero decimals is identity"),
            U256::from(7u64)
        );
    }

    #[test]
    fn base_units_rejects_overflow() {
        assert!(base_units(U256::MAX, 18).is_err());
    }
}

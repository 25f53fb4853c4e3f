use crate::abilities::{send_resolved_call, Ability, ExecuteOutcome, ExecutionContext};
use crate::domain::types::{AbilityParams, TxIntent};
use crate::error::AbilityError;
use crate::tx::ResolvedCall;
use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::str::FromStr;

const SIGNING_PURPOSE: &str = "contract-call";

/// Execute a prebuilt `(to, calldata)` pair, e.g. a DEX router call whose
/// calldata was assembled by the out-of-scope quoting layer. Value is always
/// zero; router calls that move native value are not part of this surface.
pub struct ContractCallAbility;

fn intent_of(params: &AbilityParams) -> Result<(&str, &str), AbilityError> {
    match &params.intent {
        TxIntent::ContractCall { to, calldata } => Ok((to, calldata)),
        _ => Err(AbilityError::configuration(
            "intent",
            "contract call ability requires a contractCall intent",
        )),
    }
}

#[async_trait]
impl Ability for ContractCallAbility {
    fn name(&self) -> &'static str {
        "contract-call"
    }

    async fn precheck(
        &self,
        params: &AbilityParams,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Value, AbilityError> {
        let (to, calldata) = intent_of(params)?;

        let native_balance = ctx.rpc.eth_get_balance(&params.delegator).await?;
        if native_balance.is_zero() {
            return Err(AbilityError::Precondition {
                check: "native-balance".to_string(),
                message: "delegator holds no native balance to pay for gas".to_string(),
                required: Some("> 0".to_string()),
                actual: Some("0".to_string()),
            });
        }

        Ok(json!({
            "target": to,
            "selector": params.preview.selector,
            "calldataBytes": (calldata.len() - 2) / 2,
        }))
    }

    async fn execute(
        &self,
        params: &AbilityParams,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ExecuteOutcome, AbilityError> {
        let (to, calldata) = intent_of(params)?;
        let to = Address::from_str(to).map_err(|error| {
            AbilityError::configuration("intent.to", format!("invalid address: {error}"))
        })?;
        let data = hex::decode(calldata.trim_start_matches("0x")).map_err(|error| {
            AbilityError::configuration("intent.calldata", format!("invalid hex: {error}"))
        })?;

        let call = ResolvedCall {
            to,
            data: Bytes::from(data),
            value: U256::ZERO,
        };
        let (tx_hash, confirmation_pending) =
            send_resolved_call(params, ctx, call, SIGNING_PURPOSE).await?;

        Ok(ExecuteOutcome {
            tx_hash: Some(tx_hash),
            confirmation_pending,
            result: json!({
                "target": params.preview.to,
                "selector": params.preview.selector,
            }),
        })
    }
}

use crate::abilities::{send_resolved_call, Ability, ExecuteOutcome, ExecutionContext};
use crate::domain::types::{AbilityParams, DecodedCall, TxIntent};
use crate::error::AbilityError;
use crate::tx::ResolvedCall;
use async_trait::async_trait;
use serde_json::{json, Value};

const SIGNING_PURPOSE: &str = "signed-passthrough";

/// Re-sign an already-serialized transaction under the delegated key.
///
/// Only the call itself (target, calldata, value) survives from the original
/// payload; nonce and fee parameters are always refetched, because the
/// original values belong to whatever account and fee market produced them.
pub struct SignedPassthroughAbility;

fn intent_of(params: &AbilityParams) -> Result<&DecodedCall, AbilityError> {
    match &params.intent {
        TxIntent::SignedPassthrough { decoded, .. } => Ok(decoded),
        _ => Err(AbilityError::configuration(
            "intent",
            "passthrough ability requires a signedTransaction intent",
        )),
    }
}

#[async_trait]
impl Ability for SignedPassthroughAbility {
    fn name(&self) -> &'static str {
        "signed-passthrough"
    }

    async fn precheck(
        &self,
        params: &AbilityParams,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Value, AbilityError> {
        let decoded = intent_of(params)?;

        if let Some(embedded_chain) = decoded.chain_id {
            if embedded_chain != params.chain_id {
                return Err(AbilityError::Precondition {
                    check: "chain-id".to_string(),
                    message: "serialized transaction targets a different chain".to_string(),
                    required: Some(params.chain_id.to_string()),
                    actual: Some(embedded_chain.to_string()),
                });
            }
        }

        let native_balance = ctx.rpc.eth_get_balance(&params.delegator).await?;
        if native_balance < decoded.value {
            return Err(AbilityError::Precondition {
                check: "native-balance".to_string(),
                message: "delegator balance does not cover the transaction value".to_string(),
                required: Some(decoded.value.to_string()),
                actual: Some(native_balance.to_string()),
            });
        }

        Ok(json!({
            "target": params.preview.to,
            "selector": params.preview.selector,
            "value": decoded.value.to_string(),
        }))
    }

    async fn execute(
        &self,
        params: &AbilityParams,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ExecuteOutcome, AbilityError> {
        let decoded = intent_of(params)?;

        // Value is preserved from the original payload; everything fee- and
        // nonce-related is rebuilt fresh.
        let call = ResolvedCall {
            to: decoded.to,
            data: decoded.data.clone(),
            value: decoded.value,
        };
        let (tx_hash, confirmation_pending) =
            send_resolved_call(params, ctx, call, SIGNING_PURPOSE).await?;

        Ok(ExecuteOutcome {
            tx_hash: Some(tx_hash),
            confirmation_pending,
            result: json!({
                "target": params.preview.to,
                "value": decoded.value.to_string(),
            }),
        })
    }
}

pub mod approve;
pub mod contract_call;
pub mod passthrough;

pub use approve::Erc20ApprovalAbility;
pub use contract_call::ContractCallAbility;
pub use passthrough::SignedPassthroughAbility;

use crate::broadcast::Broadcaster;
use crate::domain::types::{AbilityParams, TxIntent};
use crate::error::AbilityError;
use crate::gas;
use crate::rpc::EvmRpcClient;
use crate::signer::TransactionSigner;
use crate::tx::{self, ResolvedCall};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

/// Injected collaborators for one invocation. Built by the runtime from the
/// validated params; abilities never construct their own clients.
pub struct ExecutionContext<'a> {
    pub rpc: &'a EvmRpcClient,
    pub signer: &'a TransactionSigner,
    pub wait_for_receipt: bool,
    pub confirmations: u64,
}

#[derive(Clone, Debug)]
pub struct ExecuteOutcome {
    pub tx_hash: Option<String>,
    pub confirmation_pending: bool,
    pub result: Value,
}

/// One externally-invokable capability. Prechecks are read-only; execute
/// owns the build -> sign -> broadcast sequence for its intent.
#[async_trait]
pub trait Ability: Send + Sync {
    fn name(&self) -> &'static str;

    async fn precheck(
        &self,
        params: &AbilityParams,
        ctx: &ExecutionContext<'_>,
    ) -> Result<Value, AbilityError>;

    async fn execute(
        &self,
        params: &AbilityParams,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ExecuteOutcome, AbilityError>;
}

pub fn ability_for(intent: &TxIntent) -> &'static dyn Ability {
    match intent {
        TxIntent::Erc20Approval { .. } => &Erc20ApprovalAbility,
        TxIntent::ContractCall { .. } => &ContractCallAbility,
        TxIntent::SignedPassthrough { .. } => &SignedPassthroughAbility,
    }
}

/// Shared execute tail: estimate, plan fees, fetch a fresh nonce, build,
/// sign and broadcast. The nonce read happens last before signing to keep
/// the race window with other pending transactions small.
pub(crate) async fn send_resolved_call(
    params: &AbilityParams,
    ctx: &ExecutionContext<'_>,
    call: ResolvedCall,
    purpose: &str,
) -> Result<(String, bool), AbilityError> {
    let from = params.delegator.as_str();
    let to_hex = format!("0x{}", hex::encode(call.to.as_slice()));
    let data_hex = format!("0x{}", hex::encode(&call.data));

    let estimated_gas = ctx
        .rpc
        .eth_estimate_gas(from, &to_hex, call.value, &data_hex)
        .await?;
    let gas_plan = gas::estimate(
        ctx.rpc,
        estimated_gas,
        params.gas_limit_buffer_bps,
        params.base_fee_multiplier_pct,
    )
    .await?;

    let nonce = ctx.rpc.eth_get_transaction_count(from).await?;
    let unsigned = tx::build(call, gas_plan, nonce, params.chain_id);
    let signed = ctx.signer.sign_transaction(&unsigned, from, purpose).await?;

    let broadcaster = Broadcaster::new(ctx.rpc);
    let tx_hash = broadcaster.submit(&signed, from).await?;
    info!(tx_hash = %tx_hash, purpose, "transaction broadcast");

    let confirmation_pending = if ctx.wait_for_receipt {
        broadcaster
            .wait(&tx_hash, ctx.confirmations)
            .await?
            .is_none()
    } else {
        true
    };

    Ok((tx_hash, confirmation_pending))
}

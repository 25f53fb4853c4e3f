//! Fee planning. All percentage inputs arrive as scaled integers (x100:
//! 50% -> 5_000, 1.5x -> 150) so every computation stays in integer
//! arithmetic; nothing in this module touches floating point.

use crate::domain::types::GasPlan;
use crate::error::AbilityError;
use crate::rpc::EvmRpcClient;
use alloy_primitives::U256;

const BPS_DENOMINATOR: u128 = 10_000;
const PCT_DENOMINATOR: u64 = 100;

/// Fee quantities the oracle reported for the target chain. Fields the
/// oracle does not support are simply absent; classification and plan
/// assembly decide what absence means.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeeData {
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

/// Compute a gas plan for the target chain.
///
/// The block-header read (base fee) and the fee-oracle reads are issued
/// concurrently; they are independent. Oracle methods a chain does not
/// support degrade to absent fields, but an unreachable chain is an error.
pub async fn estimate(
    rpc: &EvmRpcClient,
    estimated_gas_units: u64,
    gas_limit_buffer_bps: u64,
    base_fee_multiplier_pct: u64,
) -> Result<GasPlan, AbilityError> {
    let buffered_gas = apply_gas_buffer(estimated_gas_units, gas_limit_buffer_bps)?;

    let (base_fee, gas_price, max_priority_fee_per_gas) = tokio::join!(
        rpc.latest_base_fee(),
        rpc.eth_gas_price(),
        rpc.eth_max_priority_fee_per_gas(),
    );
    let base_fee = base_fee?;
    let fee_data = FeeData {
        gas_price: gas_price.ok(),
        max_fee_per_gas: None,
        max_priority_fee_per_gas: max_priority_fee_per_gas.ok(),
    };

    plan_from(&fee_data, base_fee, buffered_gas, base_fee_multiplier_pct)
}

/// `estimated_gas * (10_000 + buffer) / 10_000` in integer arithmetic.
pub fn apply_gas_buffer(estimated_gas: u64, buffer_bps: u64) -> Result<u64, AbilityError> {
    if estimated_gas == 0 {
        return Err(AbilityError::configuration(
            "estimatedGas",
            "estimated gas must be greater than zero",
        ));
    }
    let scaled = u128::from(estimated_gas)
        .saturating_mul(BPS_DENOMINATOR + u128::from(buffer_bps))
        / BPS_DENOMINATOR;
    u64::try_from(scaled).map_err(|_| {
        AbilityError::configuration("gasLimitBufferPct", "buffered gas limit exceeds u64 range")
    })
}

/// Select and assemble exactly one fee plan from the observed network state.
///
/// EIP-1559 applies when the latest block exposes a base fee or the oracle
/// reported both 1559 fee fields; otherwise the chain is legacy. The two
/// paths never mix.
pub fn plan_from(
    fee_data: &FeeData,
    base_fee: Option<U256>,
    estimated_gas: u64,
    base_fee_multiplier_pct: u64,
) -> Result<GasPlan, AbilityError> {
    let eip1559 = base_fee.is_some()
        || (fee_data.max_fee_per_gas.is_some() && fee_data.max_priority_fee_per_gas.is_some());

    if eip1559 {
        let max_priority_fee_per_gas = fee_data
            .max_priority_fee_per_gas
            .ok_or(AbilityError::MissingFeeField {
                field: "maxPriorityFeePerGas",
            })?;
        let max_fee_per_gas = match fee_data.max_fee_per_gas {
            Some(reported) => reported,
            None => {
                let base_fee = base_fee.ok_or(AbilityError::MissingFeeField {
                    field: "maxFeePerGas",
                })?;
                base_fee
                    .saturating_mul(U256::from(base_fee_multiplier_pct))
                    .checked_div(U256::from(PCT_DENOMINATOR))
                    .unwrap_or(U256::ZERO)
                    .saturating_add(max_priority_fee_per_gas)
            }
        };
        Ok(GasPlan::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
            estimated_gas,
        })
    } else {
        let gas_price = fee_data.gas_price.ok_or(AbilityError::MissingGasPrice)?;
        Ok(GasPlan::Legacy {
            gas_price,
            estimated_gas,
        })
    }
}

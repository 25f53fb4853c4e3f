//! Minimal calldata codec for the calls this pipeline makes itself: the
//! ERC-20 read/write surface and function-selector inspection for policies.

use crate::hexutil::{normalize_hex_blob, parse_hex_u256};
use alloy_primitives::{keccak256, Address, Bytes, U256};

pub const APPROVE_SIGNATURE: &str = "approve(address,uint256)";
pub const ALLOWANCE_SIGNATURE: &str = "allowance(address,address)";
pub const BALANCE_OF_SIGNATURE: &str = "balanceOf(address)";
pub const DECIMALS_SIGNATURE: &str = "decimals()";

pub const APPROVE_SELECTOR: &str = "0x095ea7b3";

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash.as_slice()[..4]);
    out
}

pub fn selector_hex(signature: &str) -> String {
    format!("0x{}", hex::encode(selector(signature)))
}

/// First four bytes of calldata as lowercase 0x-hex, if the blob is long
/// enough to carry a selector.
pub fn extract_selector(calldata_hex: &str) -> Option<String> {
    let normalized = normalize_hex_blob(calldata_hex, "calldata").ok()?;
    let without_prefix = normalized.trim_start_matches("0x");
    if without_prefix.len() < 8 {
        return None;
    }
    Some(format!("0x{}", &without_prefix[..8]))
}

pub fn encode_approve(spender: Address, amount: U256) -> Bytes {
    encode_call(APPROVE_SIGNATURE, &[address_word(spender), uint_word(amount)])
}

pub fn encode_allowance(owner: Address, spender: Address) -> Bytes {
    encode_call(
        ALLOWANCE_SIGNATURE,
        &[address_word(owner), address_word(spender)],
    )
}

pub fn encode_balance_of(owner: Address) -> Bytes {
    encode_call(BALANCE_OF_SIGNATURE, &[address_word(owner)])
}

pub fn encode_decimals() -> Bytes {
    encode_call(DECIMALS_SIGNATURE, &[])
}

fn encode_call(signature: &str, words: &[[u8; 32]]) -> Bytes {
    let mut out = Vec::with_capacity(4 + words.len() * 32);
    out.extend_from_slice(&selector(signature));
    for word in words {
        out.extend_from_slice(word);
    }
    Bytes::from(out)
}

fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

fn uint_word(value: U256) -> [u8; 32] {
    value.to_be_bytes::<32>()
}

/// Decode a single `uint256` return word from an `eth_call` result.
pub fn decode_uint_word(result_hex: &str, field: &str) -> Result<U256, String> {
    let normalized = normalize_hex_blob(result_hex, field)?;
    let without_prefix = normalized.trim_start_matches("0x");
    if without_prefix.is_empty() {
        return Err(format!("{field} call returned no data"));
    }
    if without_prefix.len() > 64 {
        return Err(format!("{field} call returned more than one word"));
    }
    parse_hex_u256(&normalized, field)
}

/// Decode a `uint8` return word (e.g. `decimals()`), rejecting values that
/// do not fit.
pub fn decode_u8_word(result_hex: &str, field: &str) -> Result<u8, String> {
    let value = decode_uint_word(result_hex, field)?;
    u8::try_from(value.to::<u64>())
        .map_err(|_| format!("{field} call returned a value out of u8 range"))
}

//! Strict hex parsing and normalization for everything that crosses the
//! JSON-RPC wire or the params boundary. All helpers return plain `String`
//! errors; callers attach the error class that fits their boundary.

use alloy_primitives::U256;
use std::str::FromStr;

pub fn normalize_address(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim().to_ascii_lowercase();
    let valid = trimmed.len() == 42
        && trimmed.starts_with("0x")
        && trimmed
            .as_bytes()
            .iter()
            .skip(2)
            .all(|byte| byte.is_ascii_hexdigit());
    if !valid {
        return Err("address must be a 0x-prefixed 20-byte hex string".to_string());
    }
    Ok(trimmed)
}

pub fn normalize_hex_blob(raw: &str, field: &str) -> Result<String, String> {
    let trimmed = raw.trim().to_ascii_lowercase();
    let without_prefix = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| format!("{field} must be 0x-prefixed hex"))?;
    if without_prefix.len() % 2 != 0 {
        return Err(format!("{field} hex length must be even"));
    }
    if !without_prefix
        .as_bytes()
        .iter()
        .all(|byte| byte.is_ascii_hexdigit())
    {
        return Err(format!("{field} must be valid hex"));
    }
    Ok(trimmed)
}

pub fn normalize_hex_quantity(raw: &str, field: &str) -> Result<String, String> {
    let trimmed = raw.trim().to_ascii_lowercase();
    let without_prefix = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| format!("{field} must be 0x-prefixed hex"))?;
    if !without_prefix
        .as_bytes()
        .iter()
        .all(|byte| byte.is_ascii_hexdigit())
    {
        return Err(format!("{field} must be valid hex"));
    }
    Ok(trimmed)
}

pub fn parse_hex_u64(raw: &str, field: &str) -> Result<u64, String> {
    let value = raw.trim();
    let without_prefix = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| format!("{field} must be 0x-prefixed hex"))?;
    u64::from_str_radix(without_prefix, 16)
        .map_err(|error| format!("failed to parse {field} as hex u64: {error}"))
}

pub fn parse_hex_u256(raw: &str, field: &str) -> Result<U256, String> {
    let normalized = normalize_hex_quantity(raw, field)?;
    let without_prefix = normalized.trim_start_matches("0x");
    if without_prefix.is_empty() {
        return Ok(U256::ZERO);
    }
    if without_prefix.len() > 64 {
        return Err(format!("{field} exceeds 32 bytes"));
    }
    let padded = if without_prefix.len() % 2 == 0 {
        without_prefix.to_string()
    } else {
        format!("0{without_prefix}")
    };
    let bytes = hex::decode(&padded)
        .map_err(|error| format!("failed to decode {field} as hex: {error}"))?;
    Ok(U256::from_be_slice(&bytes))
}

pub fn parse_decimal_u256(raw: &str, field: &str) -> Result<U256, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(format!("{field} cannot be empty"));
    }
    if !trimmed.as_bytes().iter().all(|byte| byte.is_ascii_digit()) {
        return Err(format!("{field} must be a decimal string"));
    }
    U256::from_str(trimmed).map_err(|error| format!("failed to parse {field} as decimal: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_address_enforces_20_byte_hex() {
        assert!(normalize_address("0x1111111111111111111111111111111111111111").is_ok());
        assert!(normalize_address("0x111111111111111111111111111111111111111").is_err());
        assert!(normalize_address("1111111111111111111111111111111111111111").is_err());
        assert!(normalize_address("0xzz11111111111111111111111111111111111111").is_err());
    }

    #[test]
    fn normalize_address_lowercases_checksummed_input() {
        let normalized = normalize_address("0xABCDEFabcdefABCDEFabcdefABCDEFabcdefABCD")
            .expect("checksummed address should normalize");
        assert_eq!(normalized, "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd");
    }

    #[test]
    fn hex_blob_rejects_odd_length() {
        assert!(normalize_hex_blob("0xabc", "data").is_err());
        assert!(normalize_hex_blob("0xabcd", "data").is_ok());
    }

    #[test]
    fn parse_hex_u256_handles_odd_nibble_quantities() {
        assert_eq!(
            parse_hex_u256("0x1", "value").expect("quantity should parse"),
            U256::from(1u64)
        );
        assert_eq!(
            parse_hex_u256("0x3b9aca00", "value").expect("quantity should parse"),
            U256::from(1_000_000_000u64)
        );
        assert_eq!(
            parse_hex_u256("0x", "value").expect("empty quantity is zero"),
            U256::ZERO
        );
    }

    #[test]
    fn parse_decimal_u256_rejects_signs_and_fractions() {
        assert!(parse_decimal_u256("100", "amount").is_ok());
        assert!(parse_decimal_u256("-100", "amount").is_err());
        assert!(parse_decimal_u256("1.5", "amount").is_err());
        assert!(parse_decimal_u256("", "amount").is_err());
    }
}

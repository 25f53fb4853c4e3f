//! Canonical transaction serialization. Every signer call must be
//! deterministic and replay-safe, so the unsigned encodings here are the
//! single source of the signing digest; the signed encodings are what goes
//! on the wire.

use crate::domain::types::{DecodedCall, GasPlan, SignedTransaction, UnsignedTransaction};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{length_of_length, BufMut, Decodable, Encodable, Header};

const EMPTY_ACCESS_LIST_RLP_LEN: usize = 1;
const EIP1559_TX_TYPE: u8 = 0x02;

/// Target, calldata and value resolved from an intent. Approval intents
/// resolve only at execute time because the calldata depends on the token's
/// on-chain `decimals`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedCall {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// Assemble an unsigned transaction. The nonce must be freshly fetched by
/// the caller; nothing here caches across retries.
pub fn build(call: ResolvedCall, gas_plan: GasPlan, nonce: u64, chain_id: u64) -> UnsignedTransaction {
    UnsignedTransaction {
        chain_id,
        nonce,
        to: call.to,
        value: call.value,
        data: call.data,
        gas_plan,
    }
}

#[derive(Clone, Debug)]
struct Eip1559UnsignedTx {
    chain_id: U256,
    nonce: U256,
    max_priority_fee_per_gas: U256,
    max_fee_per_gas: U256,
    gas_limit: U256,
    to: Address,
    value: U256,
    data: Bytes,
}

impl Eip1559UnsignedTx {
    fn payload_length(&self) -> usize {
        self.chain_id.length()
            + self.nonce.length()
            + self.max_priority_fee_per_gas.length()
            + self.max_fee_per_gas.length()
            + self.gas_limit.length()
            + self.to.length()
            + self.value.length()
            + self.data.length()
            + EMPTY_ACCESS_LIST_RLP_LEN
    }
}

impl Encodable for Eip1559UnsignedTx {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.max_priority_fee_per_gas.encode(out);
        self.max_fee_per_gas.encode(out);
        self.gas_limit.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.data.encode(out);
        Header {
            list: true,
            payload_length: 0,
        }
        .encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

struct Eip1559SignedTx<'a> {
    tx: &'a Eip1559UnsignedTx,
    y_parity: u8,
    r: U256,
    s: U256,
}

impl Eip1559SignedTx<'_> {
    fn payload_length(&self) -> usize {
        self.tx.payload_length() + self.y_parity.length() + self.r.length() + self.s.length()
    }
}

impl Encodable for Eip1559SignedTx<'_> {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.tx.chain_id.encode(out);
        self.tx.nonce.encode(out);
        self.tx.max_priority_fee_per_gas.encode(out);
        self.tx.max_fee_per_gas.encode(out);
        self.tx.gas_limit.encode(out);
        self.tx.to.encode(out);
        self.tx.value.encode(out);
        self.tx.data.encode(out);
        Header {
            list: true,
            payload_length: 0,
        }
        .encode(out);
        self.y_parity.encode(out);
        self.r.encode(out);
        self.s.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

/// Legacy transaction fields for the EIP-155 signing payload:
/// `rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0])`.
#[derive(Clone, Debug)]
struct LegacyUnsignedTx {
    nonce: U256,
    gas_price: U256,
    gas_limit: U256,
    to: Address,
    value: U256,
    data: Bytes,
    chain_id: U256,
}

impl LegacyUnsignedTx {
    fn payload_length(&self) -> usize {
        self.nonce.length()
            + self.gas_price.length()
            + self.gas_limit.length()
            + self.to.length()
            + self.value.length()
            + self.data.length()
            + self.chain_id.length()
            + 0u8.length()
            + 0u8.length()
    }
}

impl Encodable for LegacyUnsignedTx {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.data.encode(out);
        self.chain_id.encode(out);
        0u8.encode(out);
        0u8.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

struct LegacySignedTx<'a> {
    tx: &'a LegacyUnsignedTx,
    v: U256,
    r: U256,
    s: U256,
}

impl LegacySignedTx<'_> {
    fn payload_length(&self) -> usize {
        self.tx.nonce.length()
            + self.tx.gas_price.length()
            + self.tx.gas_limit.length()
            + self.tx.to.length()
            + self.tx.value.length()
            + self.tx.data.length()
            + self.v.length()
            + self.r.length()
            + self.s.length()
    }
}

impl Encodable for LegacySignedTx<'_> {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.tx.nonce.encode(out);
        self.tx.gas_price.encode(out);
        self.tx.gas_limit.encode(out);
        self.tx.to.encode(out);
        self.tx.value.encode(out);
        self.tx.data.encode(out);
        self.v.encode(out);
        self.r.encode(out);
        self.s.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

fn eip1559_fields(tx: &UnsignedTransaction) -> Option<Eip1559UnsignedTx> {
    match &tx.gas_plan {
        GasPlan::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
            estimated_gas,
        } => Some(Eip1559UnsignedTx {
            chain_id: U256::from(tx.chain_id),
            nonce: U256::from(tx.nonce),
            max_priority_fee_per_gas: *max_priority_fee_per_gas,
            max_fee_per_gas: *max_fee_per_gas,
            gas_limit: U256::from(*estimated_gas),
            to: tx.to,
            value: tx.value,
            data: tx.data.clone(),
        }),
        GasPlan::Legacy { .. } => None,
    }
}

fn legacy_fields(tx: &UnsignedTransaction) -> Option<LegacyUnsignedTx> {
    match &tx.gas_plan {
        GasPlan::Legacy {
            gas_price,
            estimated_gas,
        } => Some(LegacyUnsignedTx {
            nonce: U256::from(tx.nonce),
            gas_price: *gas_price,
            gas_limit: U256::from(*estimated_gas),
            to: tx.to,
            value: tx.value,
            data: tx.data.clone(),
            chain_id: U256::from(tx.chain_id),
        }),
        GasPlan::Eip1559 { .. } => None,
    }
}

/// Canonical unsigned encoding: the typed 0x02 envelope for EIP-1559 plans,
/// the EIP-155 list for legacy plans.
pub fn encode_unsigned(tx: &UnsignedTransaction) -> Vec<u8> {
    if let Some(fields) = eip1559_fields(tx) {
        let payload = alloy_rlp::encode(&fields);
        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(EIP1559_TX_TYPE);
        out.extend_from_slice(&payload);
        out
    } else if let Some(fields) = legacy_fields(tx) {
        alloy_rlp::encode(&fields)
    } else {
        unreachable!("gas plan is always one of the two variants")
    }
}

pub fn signing_digest(tx: &UnsignedTransaction) -> B256 {
    keccak256(encode_unsigned(tx))
}

/// Attach a recovered signature and produce the broadcastable encoding.
/// The transaction hash is the keccak of the signed encoding.
pub fn attach_signature(
    tx: &UnsignedTransaction,
    y_parity: u8,
    r: U256,
    s: U256,
) -> SignedTransaction {
    let raw = if let Some(fields) = eip1559_fields(tx) {
        let payload = alloy_rlp::encode(Eip1559SignedTx {
            tx: &fields,
            y_parity,
            r,
            s,
        });
        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(EIP1559_TX_TYPE);
        out.extend_from_slice(&payload);
        out
    } else if let Some(fields) = legacy_fields(tx) {
        // EIP-155: v = chain_id * 2 + 35 + y_parity.
        let v = U256::from(tx.chain_id)
            .saturating_mul(U256::from(2u64))
            .saturating_add(U256::from(35u64 + u64::from(y_parity)));
        alloy_rlp::encode(LegacySignedTx {
            tx: &fields,
            v,
            r,
            s,
        })
    } else {
        unreachable!("gas plan is always one of the two variants")
    };

    let tx_hash = keccak256(&raw);
    SignedTransaction {
        raw: Bytes::from(raw),
        tx_hash,
    }
}

pub fn parse_compact_signature(raw: &str) -> Result<[u8; 64], String> {
    let normalized = crate::hexutil::normalize_hex_blob(raw, "signature")?;
    let without_prefix = normalized.trim_start_matches("0x");
    if without_prefix.len() != 128 {
        return Err("signature must be 64 bytes (r||s)".to_string());
    }
    let mut out = [0u8; 64];
    hex::decode_to_slice(without_prefix, &mut out)
        .map_err(|error| format!("failed to decode signature: {error}"))?;
    Ok(out)
}

/// Recover the y-parity bit by trying both candidates against the expected
/// sender address.
pub fn recover_y_parity(
    digest: &B256,
    signature_compact: &[u8; 64],
    expected_address: &str,
) -> Result<u8, String> {
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
    use k256::elliptic_curve::sec1::ToEncodedPoint;

    let signature = Signature::from_slice(signature_compact)
        .map_err(|error| format!("invalid compact signature bytes: {error}"))?;
    let expected = expected_address.trim().to_ascii_lowercase();

    for candidate in [0u8, 1u8] {
        let Some(recovery_id) = RecoveryId::from_byte(candidate) else {
            continue;
        };
        let recovered =
            match VerifyingKey::recover_from_prehash(digest.as_slice(), &signature, recovery_id) {
                Ok(key) => key,
                Err(_) => continue,
            };
        let uncompressed = recovered.to_encoded_point(false);
        let bytes = uncompressed.as_bytes();
        if bytes.len() != 65 || bytes.first().copied() != Some(0x04) {
            continue;
        }
        let digest = keccak256(&bytes[1..]);
        let address = format!("0x{}", hex::encode(&digest.as_slice()[12..32]));
        if address == expected {
            return Ok(candidate);
        }
    }

    Err("failed to recover signature y_parity for expected sender".to_string())
}

/// Recover the call fields from an already-serialized transaction (signed or
/// unsigned). Supports the typed 0x02 envelope and legacy lists; the chain
/// id of a signed legacy transaction is derived from its EIP-155 `v`.
pub fn decode_raw_transaction(raw: &[u8]) -> Result<DecodedCall, String> {
    if raw.is_empty() {
        return Err("transaction payload is empty".to_string());
    }

    if raw[0] == EIP1559_TX_TYPE {
        let mut buf = &raw[1..];
        let header = Header::decode(&mut buf)
            .map_err(|error| format!("invalid eip-1559 transaction rlp: {error}"))?;
        if !header.list {
            return Err("eip-1559 transaction payload must be an rlp list".to_string());
        }
        let decode_error = |field: &str| {
            let field = field.to_string();
            move |error| format!("invalid {field}: {error}")
        };
        let chain_id = u64::decode(&mut buf).map_err(decode_error("chainId"))?;
        let _nonce = U256::decode(&mut buf).map_err(decode_error("nonce"))?;
        let _max_priority = U256::decode(&mut buf).map_err(decode_error("maxPriorityFeePerGas"))?;
        let _max_fee = U256::decode(&mut buf).map_err(decode_error("maxFeePerGas"))?;
        let _gas_limit = U256::decode(&mut buf).map_err(decode_error("gasLimit"))?;
        let to = Address::decode(&mut buf)
            .map_err(|_| "transaction must carry a recipient address".to_string())?;
        let value = U256::decode(&mut buf).map_err(decode_error("value"))?;
        let data = Bytes::decode(&mut buf).map_err(decode_error("data"))?;
        return Ok(DecodedCall {
            chain_id: Some(chain_id),
            to,
            value,
            data,
        });
    }

    let mut buf = raw;
    let header = Header::decode(&mut buf)
        .map_err(|error| format!("invalid legacy transaction rlp: {error}"))?;
    if !header.list {
        return Err("legacy transaction payload must be an rlp list".to_string());
    }
    let decode_error = |field: &str| {
        let field = field.to_string();
        move |error| format!("invalid {field}: {error}")
    };
    let _nonce = U256::decode(&mut buf).map_err(decode_error("nonce"))?;
    let _gas_price = U256::decode(&mut buf).map_err(decode_error("gasPrice"))?;
    let _gas_limit = U256::decode(&mut buf).map_err(decode_error("gasLimit"))?;
    let to = Address::decode(&mut buf)
        .map_err(|_| "transaction must carry a recipient address".to_string())?;
    let value = U256::decode(&mut buf).map_err(decode_error("value"))?;
    let data = Bytes::decode(&mut buf).map_err(decode_error("data"))?;

    let chain_id = if buf.is_empty() {
        None
    } else {
        let v = u64::decode(&mut buf).map_err(decode_error("v"))?;
        let r = U256::decode(&mut buf).map_err(decode_error("r"))?;
        let s = U256::decode(&mut buf).map_err(decode_error("s"))?;
        if r.is_zero() && s.is_zero() {
            // EIP-155 signing payload: the trailing triple is (chainId, 0, 0).
            Some(v)
        } else if v >= 35 {
            Some((v - 35) / 2)
        } else {
            // Pre-EIP-155 signature (v = 27/28): no chain id recoverable.
            None
        }
    };

    Ok(DecodedCall {
        chain_id,
        to,
        value,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;
    use k256::elliptic_curve::sec1::ToEncodedPoint;
    use std::str::FromStr;

    fn sample_eip1559() -> UnsignedTransaction {
        UnsignedTransaction {
            chain_id: 8453,
            nonce: 7,
            to: Address::from_str("0x2222222222222222222222222222222222222222")
                .expect("address should parse"),
            value: U256::ZERO,
            data: Bytes::from(vec![0x09, 0x5e, 0xa7, 0xb3]),
            gas_plan: GasPlan::Eip1559 {
                max_fee_per_gas: U256::from(30_000_000_000u64),
                max_priority_fee_per_gas: U256::from(1_000_000_000u64),
                estimated_gas: 60_000,
            },
        }
    }

    fn sample_legacy() -> UnsignedTransaction {
        UnsignedTransaction {
            chain_id: 56,
            nonce: 3,
            to: Address::from_str("0x4444444444444444444444444444444444444444")
                .expect("address should parse"),
            value: U256::from(1_000u64),
            data: Bytes::new(),
            gas_plan: GasPlan::Legacy {
                gas_price: U256::from(5_000_000_000u64),
                estimated_gas: 21_000,
            },
        }
    }

    fn test_key_address(key: &SigningKey) -> String {
        let uncompressed = key.verifying_key().to_encoded_point(false);
        let digest = keccak256(&uncompressed.as_bytes()[1..]);
        format!("0x{}", hex::encode(&digest.as_slice()[12..32]))
    }

    #[test]
    fn eip1559_unsigned_encoding_uses_typed_envelope() {
        let encoded = encode_unsigned(&sample_eip1559());
        assert_eq!(encoded.first().copied(), Some(EIP1559_TX_TYPE));
    }

    #[test]
    fn eip1559_encoding_round_trips_through_decoder() {
        let tx = sample_eip1559();
        let decoded = decode_raw_transaction(&encode_unsigned(&tx))
            .expect("unsigned encoding should decode");
        assert_eq!(decoded.chain_id, Some(8453));
        assert_eq!(decoded.to, tx.to);
        assert_eq!(decoded.value, tx.value);
        assert_eq!(decoded.data, tx.data);
    }

    #[test]
    fn legacy_signing_payload_round_trips_with_chain_id() {
        let tx = sample_legacy();
        let decoded = decode_raw_transaction(&encode_unsigned(&tx))
            .expect("legacy signing payload should decode");
        assert_eq!(decoded.chain_id, Some(56));
        assert_eq!(decoded.value, U256::from(1_000u64));
    }

    #[test]
    fn legacy_signed_v_encodes_chain_id_per_eip155() {
        let tx = sample_legacy();
        let signed = attach_signature(&tx, 1, U256::from(1u64), U256::from(2u64));
        let decoded =
            decode_raw_transaction(&signed.raw).expect("signed legacy tx should decode");
        // v = 56 * 2 + 35 + 1 = 148 -> chain id recovered as (148 - 35) / 2 = 56.
        assert_eq!(decoded.chain_id, Some(56));
    }

    #[test]
    fn signed_transactions_differ_from_unsigned_and_carry_hash() {
        let tx = sample_eip1559();
        let signed = attach_signature(&tx, 0, U256::from(11u64), U256::from(22u64));
        assert_ne!(signed.raw.as_ref(), encode_unsigned(&tx).as_slice());
        assert_eq!(signed.tx_hash, keccak256(&signed.raw));
        assert!(signed.tx_hash_hex().starts_with("0x"));
    }

    #[test]
    fn parse_compact_signature_requires_64_bytes() {
        assert!(parse_compact_signature("0xdeadbeef").is_err());
        assert!(parse_compact_signature(&format!("0x{}", "11".repeat(64))).is_ok());
    }

    #[test]
    fn y_parity_recovers_against_expected_sender() {
        let key = SigningKey::from_bytes(&[0x42u8; 32].into()).expect("test key should build");
        let address = test_key_address(&key);
        let digest = signing_digest(&sample_eip1559());
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(digest.as_slice())
            .expect("signing should succeed");

        let mut compact = [0u8; 64];
        compact.copy_from_slice(&signature.to_bytes());
        let parity = recover_y_parity(&digest, &compact, &address)
            .expect("parity should recover for the signing key");
        assert_eq!(parity, recovery_id.to_byte());
    }

    #[test]
    fn y_parity_recovery_fails_for_wrong_sender() {
        let key = SigningKey::from_bytes(&[0x42u8; 32].into()).expect("test key should build");
        let digest = signing_digest(&sample_eip1559());
        let (signature, _) = key
            .sign_prehash_recoverable(digest.as_slice())
            .expect("signing should succeed");
        let mut compact = [0u8; 64];
        compact.copy_from_slice(&signature.to_bytes());

        assert!(recover_y_parity(
            &digest,
            &compact,
            "0x1111111111111111111111111111111111111111"
        )
        .is_err());
    }

    #[test]
    fn decode_rejects_truncated_payloads() {
        assert!(decode_raw_transaction(&[]).is_err());
        assert!(decode_raw_transaction(&[0x02, 0xc0]).is_err());
    }
}

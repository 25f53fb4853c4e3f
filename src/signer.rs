/// Delegated transaction signing.
///
/// The threshold-signing protocol itself lives in an external service; this
/// module's responsibility is canonical serialization before hashing (so
/// every signing call is deterministic and replay-safe) and attaching the
/// returned signature. The service is consumed as an opaque
/// `sign(public_key_ref, digest, purpose)` call; its failures surface
/// verbatim as `SigningFailed`.
// ── Imports ──────────────────────────────────────────────────────────────────
use crate::domain::types::{SignedTransaction, UnsignedTransaction};
use crate::error::AbilityError;
use crate::tx;
use alloy_primitives::{keccak256, U256};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const SIGNER_REQUEST_TIMEOUT_SECS: u64 = 30;

// ── Port ─────────────────────────────────────────────────────────────────────

/// External signing collaborator. Returns the compact 64-byte signature
/// (r || s) as a 0x-prefixed hex string.
#[async_trait]
pub trait SigningService: Send + Sync {
    async fn sign(
        &self,
        public_key_ref: &str,
        digest: &[u8; 32],
        purpose: &str,
    ) -> Result<String, AbilityError>;
}

// ── HTTP adapter ─────────────────────────────────────────────────────────────

/// Production adapter posting signing requests to the external service.
#[derive(Clone, Debug)]
pub struct HttpSigningService {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpSigningService {
    pub fn new(endpoint: &str) -> Result<Self, AbilityError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(AbilityError::configuration(
                "signerEndpoint",
                "signing service endpoint is not configured",
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(SIGNER_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|error| {
                AbilityError::configuration(
                    "signerEndpoint",
                    format!("failed to build http client: {error}"),
                )
            })?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl SigningService for HttpSigningService {
    async fn sign(
        &self,
        public_key_ref: &str,
        digest: &[u8; 32],
        purpose: &str,
    ) -> Result<String, AbilityError> {
        let body = json!({
            "publicKeyRef": public_key_ref,
            "messageHash": format!("0x{}", hex::encode(digest)),
            "purpose": purpose,
        });
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|error| AbilityError::SigningFailed {
                message: format!("signing service unreachable: {error}"),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(AbilityError::SigningFailed {
                message: format!("signing service returned status {status}"),
            });
        }
        let value: Value = response
            .json()
            .await
            .map_err(|error| AbilityError::SigningFailed {
                message: format!("failed to parse signing response: {error}"),
            })?;
        value
            .get("signature")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AbilityError::SigningFailed {
                message: "signing response missing signature".to_string(),
            })
    }
}

// ── Mock adapter ─────────────────────────────────────────────────────────────

/// Deterministic in-process signer for tests and local development. Signs
/// with a fixed secp256k1 key so downstream y-parity recovery exercises the
/// real code path.
#[derive(Clone)]
pub struct MockSigningService {
    key: k256::ecdsa::SigningKey,
}

impl MockSigningService {
    pub fn new(seed: [u8; 32]) -> Result<Self, AbilityError> {
        let key = k256::ecdsa::SigningKey::from_bytes(&seed.into()).map_err(|error| {
            AbilityError::configuration("signerSeed", format!("invalid signing seed: {error}"))
        })?;
        Ok(Self { key })
    }

    /// The Ethereum address of the mock key, for wiring as the delegator in
    /// tests.
    pub fn address(&self) -> String {
        use k256::elliptic_curve::sec1::ToEncodedPoint;
        let uncompressed = self.key.verifying_key().to_encoded_point(false);
        let digest = keccak256(&uncompressed.as_bytes()[1..]);
        format!("0x{}", hex::encode(&digest.as_slice()[12..32]))
    }
}

#[async_trait]
impl SigningService for MockSigningService {
    async fn sign(
        &self,
        _public_key_ref: &str,
        digest: &[u8; 32],
        _purpose: &str,
    ) -> Result<String, AbilityError> {
        let (signature, _) = self
            .key
            .sign_prehash_recoverable(digest)
            .map_err(|error| AbilityError::SigningFailed {
                message: format!("mock signing failed: {error}"),
            })?;
        Ok(format!("0x{}", hex::encode(signature.to_bytes())))
    }
}

// ── Transaction signer ───────────────────────────────────────────────────────

/// Serializes, digests, delegates, and attaches the returned signature.
#[derive(Clone)]
pub struct TransactionSigner {
    service: Arc<dyn SigningService>,
    public_key_ref: String,
}

impl TransactionSigner {
    pub fn new(service: Arc<dyn SigningService>, public_key_ref: &str) -> Self {
        Self {
            service,
            public_key_ref: public_key_ref.to_string(),
        }
    }

    /// Sign `tx` on behalf of `expected_address`. The y-parity bit is
    /// recovered from the compact signature by matching the recovered key
    /// against the expected sender, so a signature from the wrong key fails
    /// here rather than as an on-chain revert.
    pub async fn sign_transaction(
        &self,
        tx: &UnsignedTransaction,
        expected_address: &str,
        purpose: &str,
    ) -> Result<SignedTransaction, AbilityError> {
        let digest = tx::signing_digest(tx);
        let raw_signature = self
            .service
            .sign(&self.public_key_ref, &digest.0, purpose)
            .await?;

        let compact = tx::parse_compact_signature(&raw_signature)
            .map_err(|message| AbilityError::SigningFailed { message })?;
        let y_parity = tx::recover_y_parity(&digest, &compact, expected_address)
            .map_err(|message| AbilityError::SigningFailed { message })?;
        let r = U256::from_be_slice(&compact[..32]);
        let s = U256::from_be_slice(&compact[32..]);
        Ok(tx::attach_signature(tx, y_parity, r, s))
    }
}

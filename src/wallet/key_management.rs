// src/wallet/key_management.rs
//! Issuer key management.
//!
//! Signing keys are injected at startup from the secret store and looked up
//! per issuer through [`KeyProvider`]. Nothing here embeds key material in
//! source.
//!
//! Uses the following cryptographic primitives:
//! - secp256k1 curve (via `k256` crate)
//! - Cryptographically secure random number generation for new issuer keys

use std::collections::HashMap;

use ethers::utils::hex;
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};

use crate::config::Secrets;
use crate::error::KritiError;
use crate::models::did::issuer_did;

/// Source of issuer key material.
pub trait KeyProvider: Send + Sync {
    /// Key used to sign credentials issued by `issuer_id`, if provisioned.
    fn signing_key(&self, issuer_id: &str) -> Option<SigningKey>;

    /// Hex public key this deployment holds for `did`, for onboarding.
    fn verification_key(&self, did: &str) -> Option<String>;
}

/// Keys held in memory for the lifetime of the process.
#[derive(Clone, Default)]
pub struct StaticKeyProvider {
    keys: HashMap<String, SigningKey>,
}

impl StaticKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses every issuer key in the secret store.
    ///
    /// # Errors
    /// `Signing` naming the first issuer whose key does not parse.
    pub fn from_secrets(secrets: &Secrets) -> Result<Self, KritiError> {
        let mut provider = Self::new();
        for (issuer_id, key_hex) in &secrets.issuer_keys {
            let key = parse_signing_key(key_hex)
                .map_err(|e| KritiError::Signing(format!("key for issuer {issuer_id}: {e}")))?;
            provider.insert(issuer_id.clone(), key);
        }
        Ok(provider)
    }

    pub fn insert(&mut self, issuer_id: impl Into<String>, key: SigningKey) {
        self.keys.insert(issuer_id.into(), key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyProvider for StaticKeyProvider {
    fn signing_key(&self, issuer_id: &str) -> Option<SigningKey> {
        self.keys.get(issuer_id).cloned()
    }

    fn verification_key(&self, did: &str) -> Option<String> {
        self.keys
            .iter()
            .find(|(issuer_id, _)| issuer_did(issuer_id) == did)
            .map(|(_, key)| public_key_hex(key))
    }
}

/// Parses a 32-byte secp256k1 secret, hex with or without `0x`.
pub fn parse_signing_key(key_hex: &str) -> Result<SigningKey, KritiError> {
    let trimmed = key_hex.trim();
    let bytes = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .map_err(|e| KritiError::Signing(format!("not hex: {e}")))?;
    SigningKey::from_slice(&bytes).map_err(|_| KritiError::Signing("not a valid secp256k1 secret".into()))
}

/// Uncompressed SEC1 public key (`0x04 || x || y`), hex encoded.
pub fn public_key_hex(key: &SigningKey) -> String {
    let point = key.verifying_key().to_encoded_point(false);
    format!("0x{}", hex::encode(point.as_bytes()))
}

/// A freshly generated issuer identity.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct IssuerKeyPair {
    pub private_key: String,
    pub public_key: String,
    pub did: String,
}

/// Generates a new secp256k1 key pair and the namespaced DID for `issuer_name`.
///
/// The private key is handed to the operator once. It is not retained here.
pub fn generate_issuer_keys(issuer_name: &str) -> Result<IssuerKeyPair, KritiError> {
    if issuer_name.trim().is_empty() {
        return Err(KritiError::InvalidInput("issuer name must not be empty".into()));
    }
    let key = SigningKey::random(&mut rand::thread_rng());
    Ok(IssuerKeyPair {
        private_key: format!("0x{}", hex::encode(key.to_bytes())),
        public_key: public_key_hex(&key),
        did: issuer_did(issuer_name),
    })
}

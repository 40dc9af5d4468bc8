// src/wallet/signer.rs
//! Detached credential signatures.
//!
//! Signatures are Ethereum personal-message ECDSA (EIP-191) over the canonical
//! payload bytes, encoded as 65-byte `r || s || v` hex.
//!
//! Verification is strict: the address recovered from the signature must be
//! the address of the public key registered for the issuer's DID. A signature
//! that merely recovers to *some* address is rejected.

use std::str::FromStr;

use ethers::core::types::{Signature, SignatureError};
use ethers::signers::LocalWallet;
use ethers::utils::{hash_message, hex, public_key_to_address};
use k256::ecdsa::{SigningKey, VerifyingKey};
use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;

use crate::blockchain::registry_client::RegistryClient;
use crate::error::{KritiError, LedgerError};
use crate::utils::canonical::{canonicalize, CanonicalBytes};

/// Why a signature was not accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureRejection {
    #[error("issuer DID {0} has no registered public key")]
    UnknownIssuer(String),

    #[error("issuer key lookup failed: {0}")]
    KeyLookupFailed(#[from] LedgerError),

    #[error("payload could not be canonicalized: {0}")]
    Unencodable(String),

    #[error("registered public key is malformed: {0}")]
    MalformedKey(String),

    #[error("signature is malformed: {0}")]
    MalformedSignature(String),

    #[error("signature was not produced by the key registered for this issuer")]
    SignerMismatch,
}

/// Signs `canonicalize(payload)` with the issuer's key.
pub fn sign<T: Serialize + ?Sized>(payload: &T, key: &SigningKey) -> Result<String, KritiError> {
    let message = canonicalize(payload)?;
    sign_bytes(&message, key)
}

pub fn sign_bytes(message: &CanonicalBytes, key: &SigningKey) -> Result<String, KritiError> {
    let wallet = LocalWallet::from(key.clone());
    let signature = wallet
        .sign_hash(hash_message(message.as_bytes()))
        .map_err(|e| KritiError::Signing(e.to_string()))?;
    Ok(format!("0x{signature}"))
}

/// Checks `signature` over `message` against one specific registered key.
pub fn verify_with_key(
    public_key_hex: &str,
    message: &CanonicalBytes,
    signature_hex: &str,
) -> Result<(), SignatureRejection> {
    let trimmed = public_key_hex.trim();
    let key_bytes = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .map_err(|e| SignatureRejection::MalformedKey(e.to_string()))?;
    let verifying_key = VerifyingKey::from_sec1_bytes(&key_bytes)
        .map_err(|_| SignatureRejection::MalformedKey("not a SEC1 secp256k1 point".into()))?;
    let expected = public_key_to_address(&verifying_key);

    let signature = Signature::from_str(signature_hex.trim())
        .map_err(|e| SignatureRejection::MalformedSignature(e.to_string()))?;

    match signature.verify(message.as_bytes(), expected) {
        Ok(()) => Ok(()),
        Err(SignatureError::VerificationError(expected, recovered)) => {
            debug!("signature recovered {recovered:?}, registered key is {expected:?}");
            Err(SignatureRejection::SignerMismatch)
        }
        Err(e) => Err(SignatureRejection::MalformedSignature(e.to_string())),
    }
}

/// Resolves the issuer's key through the registry and checks the signature.
pub async fn check_signature<R, T>(
    registry: &R,
    issuer_did: &str,
    payload: &T,
    signature: &str,
) -> Result<(), SignatureRejection>
where
    R: RegistryClient + ?Sized,
    T: Serialize + ?Sized,
{
    let message =
        canonicalize(payload).map_err(|e| SignatureRejection::Unencodable(e.to_string()))?;
    let public_key = registry
        .get_public_key(issuer_did)
        .await?
        .ok_or_else(|| SignatureRejection::UnknownIssuer(issuer_did.to_owned()))?;
    verify_with_key(&public_key, &message, signature)
}

/// `true` only for a signature made by the key registered under `issuer_did`.
///
/// Never errors: unknown issuers, ledger failures and malformed input all
/// yield `false`.
pub async fn verify<R, T>(registry: &R, issuer_did: &str, payload: &T, signature: &str) -> bool
where
    R: RegistryClient + ?Sized,
    T: Serialize + ?Sized,
{
    match check_signature(registry, issuer_did, payload, signature).await {
        Ok(()) => true,
        Err(rejection) => {
            warn!("signature for {issuer_did} rejected: {rejection}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::memory_ledger::InMemoryLedger;
    use crate::wallet::key_management::{generate_issuer_keys, parse_signing_key, public_key_hex};
    use serde_json::json;

    const DID: &str = "did:kriti:issuer:vtu";

    async fn ledger_with(key: &SigningKey) -> InMemoryLedger {
        let ledger = InMemoryLedger::new(80002);
        ledger.register_issuer(DID, &public_key_hex(key)).await.unwrap();
        ledger
    }

    fn issuer_key() -> SigningKey {
        parse_signing_key(&generate_issuer_keys("vtu").unwrap().private_key).unwrap()
    }

    #[tokio::test]
    async fn accepts_signature_from_registered_key() {
        let key = issuer_key();
        let ledger = ledger_with(&key).await;
        let payload = json!({"degree": "B.E.", "cgpa": "8.5"});

        let signature = sign(&payload, &key).unwrap();
        assert_eq!(signature.len(), 2 + 130);
        assert!(verify(&ledger, DID, &payload, &signature).await);
    }

    #[tokio::test]
    async fn key_order_does_not_affect_signature_check() {
        let key = issuer_key();
        let ledger = ledger_with(&key).await;
        let signature = sign(&json!({"a": 1, "b": 2}), &key).unwrap();
        assert!(verify(&ledger, DID, &json!({"b": 2, "a": 1}), &signature).await);
    }

    #[tokio::test]
    async fn rejects_well_formed_signature_from_another_key() {
        let registered = issuer_key();
        let impostor = issuer_key();
        let ledger = ledger_with(&registered).await;
        let payload = json!({"degree": "B.E."});

        let forged = sign(&payload, &impostor).unwrap();
        assert_eq!(
            check_signature(&ledger, DID, &payload, &forged).await,
            Err(SignatureRejection::SignerMismatch)
        );
        assert!(!verify(&ledger, DID, &payload, &forged).await);
    }

    #[tokio::test]
    async fn rejects_signature_over_modified_payload() {
        let key = issuer_key();
        let ledger = ledger_with(&key).await;
        let signature = sign(&json!({"cgpa": "8.5"}), &key).unwrap();
        assert!(!verify(&ledger, DID, &json!({"cgpa": "9.8"}), &signature).await);
    }

    #[tokio::test]
    async fn unknown_issuer_fails_closed() {
        let key = issuer_key();
        let ledger = InMemoryLedger::new(80002);
        let payload = json!({"degree": "B.E."});
        let signature = sign(&payload, &key).unwrap();

        assert_eq!(
            check_signature(&ledger, DID, &payload, &signature).await,
            Err(SignatureRejection::UnknownIssuer(DID.into()))
        );
        assert!(!verify(&ledger, DID, &payload, &signature).await);
    }

    #[tokio::test]
    async fn ledger_outage_fails_closed() {
        let key = issuer_key();
        let ledger = ledger_with(&key).await;
        ledger.set_reachable(false);
        let payload = json!({"degree": "B.E."});
        let signature = sign(&payload, &key).unwrap();

        assert!(matches!(
            check_signature(&ledger, DID, &payload, &signature).await,
            Err(SignatureRejection::KeyLookupFailed(LedgerError::Connectivity(_)))
        ));
    }

    #[tokio::test]
    async fn garbage_inputs_are_rejected_not_thrown() {
        let key = issuer_key();
        let ledger = ledger_with(&key).await;
        let payload = json!({"degree": "B.E."});
        assert!(!verify(&ledger, DID, &payload, "0xdeadbeef").await);

        let bad_key_ledger = InMemoryLedger::new(80002);
        bad_key_ledger.register_issuer(DID, "0x1234").await.unwrap();
        let signature = sign(&payload, &key).unwrap();
        assert!(matches!(
            check_signature(&bad_key_ledger, DID, &payload, &signature).await,
            Err(SignatureRejection::MalformedKey(_))
        ));
    }
}

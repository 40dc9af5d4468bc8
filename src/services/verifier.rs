// src/services/verifier.rs
//! Credential verification service.
//!
//! [`Verifier::verify_credential_by_id`] runs four checks, plus a revocation
//! lookup, and folds them into one [`VerificationResult`]:
//!
//! 1. lookup in the document store (terminal when absent)
//! 2. integrity: recompute the content hash over the stored payload
//! 3. registry: confirm the stored hash is the one anchored on the ledger
//! 4. signature: verify the detached signature against the key registered
//!    for the credential's own issuer
//!
//! A credential revoked in the store or on its ledger record is never valid.
//!
//! Checks 3 and 4 are independent ledger reads and run concurrently. The
//! verifier never returns an error. Every failure degrades into the matching
//! sub-check outcome plus a warning that the UI renders verbatim.

use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;
use uuid::Uuid;

use crate::blockchain::registry_client::RegistryClient;
use crate::models::credential::Credential;
use crate::models::did::issuer_did;
use crate::models::verification::{
    IntegrityStatus, RegistryStatus, SignatureStatus, VerificationChecks, VerificationResult,
};
use crate::storage::credential_store::CredentialStore;
use crate::utils::crypto::{content_hash, ContentHash};
use crate::wallet::signer;

pub const CREDENTIAL_NOT_FOUND: &str = "Credential not found";
pub const LOOKUP_FAILED: &str = "Credential lookup failed";
pub const NOT_REGISTERED: &str = "Credential not registered for integrity verification";
pub const TAMPER_ALERT: &str =
    "SECURITY ALERT: credential data has been modified since issuance (content hash mismatch)";
pub const HASH_UNVERIFIABLE: &str = "Content hash could not be verified";
pub const LEDGER_UNREACHABLE: &str = "Blockchain registry unreachable, anchoring not confirmed";
pub const NOT_ON_LEDGER: &str = "Credential not found on the blockchain registry";
pub const LEDGER_MISMATCH: &str = "Blockchain record does not match the credential's content hash";
pub const SIGNATURE_FAILED: &str = "Digital signature verification failed";
pub const REVOKED: &str = "Credential revoked by its issuer";
pub const INVALID_QR: &str = "Invalid QR code format";

/// Credential verifier over the document store and the anchoring ledger.
#[derive(Clone)]
pub struct Verifier {
    store: Arc<dyn CredentialStore>,
    registry: Arc<dyn RegistryClient>,
}

impl Verifier {
    pub fn new(store: Arc<dyn CredentialStore>, registry: Arc<dyn RegistryClient>) -> Self {
        Self { store, registry }
    }

    /// Verifies a stored credential. Always returns a result.
    pub async fn verify_credential_by_id(&self, credential_id: &str) -> VerificationResult {
        let verification_id = new_verification_id();
        let credential_id = credential_id.trim();
        debug!("{verification_id}: verifying credential {credential_id}");

        let credential = match self.store.get(credential_id).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                info!("{verification_id}: credential {credential_id} not found");
                return VerificationResult::unresolved(
                    verification_id,
                    CREDENTIAL_NOT_FOUND.to_owned(),
                );
            }
            Err(e) => {
                warn!("{verification_id}: lookup of {credential_id} failed: {e}");
                return VerificationResult::unresolved(
                    verification_id,
                    format!("{LOOKUP_FAILED}: {e}"),
                );
            }
        };

        let (integrity, stored_hash) = check_integrity(&credential);
        let ((registry, revoked_on_ledger), (signature, signature_detail)) = tokio::join!(
            self.check_registry(&credential.id, stored_hash),
            self.check_signature(&credential),
        );

        let mut warnings = Vec::new();
        match &integrity {
            IntegrityStatus::Valid => {}
            IntegrityStatus::NotRegistered => warnings.push(NOT_REGISTERED.to_owned()),
            IntegrityStatus::Tampered => warnings.push(TAMPER_ALERT.to_owned()),
            IntegrityStatus::Unverifiable(detail) => {
                warnings.push(format!("{HASH_UNVERIFIABLE}: {detail}"))
            }
        }
        match &registry {
            RegistryStatus::Anchored | RegistryStatus::Skipped => {}
            RegistryStatus::Mismatch => warnings.push(LEDGER_MISMATCH.to_owned()),
            RegistryStatus::NotAnchored => warnings.push(NOT_ON_LEDGER.to_owned()),
            RegistryStatus::Unreachable(detail) => {
                warnings.push(format!("{LEDGER_UNREACHABLE}: {detail}"))
            }
        }
        if let Some(detail) = signature_detail {
            warnings.push(format!("{SIGNATURE_FAILED}: {detail}"));
        }
        let revoked = credential.revoked || revoked_on_ledger;
        if revoked {
            warnings.push(REVOKED.to_owned());
        }

        let checks = VerificationChecks {
            integrity,
            registry,
            signature,
            revoked,
        };
        if checks.integrity == IntegrityStatus::Tampered {
            warn!("{verification_id}: credential {} failed its integrity check", credential.id);
        }

        let result = VerificationResult::checked(verification_id, checks, warnings, credential);
        info!(
            "verification complete: {}",
            serde_json::to_string(&result.stats()).unwrap_or_default()
        );
        result
    }

    /// Verifies the credential named by a scanned QR code.
    ///
    /// QR data is either the bare credential id or a JSON object carrying
    /// `id` or `credentialId`.
    pub async fn verify_from_qr(&self, qr_data: &str) -> VerificationResult {
        match credential_id_from_qr(qr_data) {
            Ok(credential_id) => self.verify_credential_by_id(&credential_id).await,
            Err(reason) => {
                warn!("rejected QR payload: {reason}");
                VerificationResult::unresolved(
                    new_verification_id(),
                    format!("{INVALID_QR}: {reason}"),
                )
            }
        }
    }

    /// Returns the registry outcome and whether the ledger record is revoked.
    async fn check_registry(
        &self,
        credential_id: &str,
        stored_hash: Option<ContentHash>,
    ) -> (RegistryStatus, bool) {
        let Some(hash) = stored_hash else {
            return (RegistryStatus::Skipped, false);
        };

        let matches = match self.registry.verify_hash(credential_id, hash.as_bytes()).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!("registry check for {credential_id} degraded: {e}");
                return (RegistryStatus::Unreachable(e.to_string()), false);
            }
        };

        match self.registry.get_credential_record(credential_id).await {
            Ok(Some(record)) if matches => (RegistryStatus::Anchored, record.revoked),
            Ok(Some(record)) => {
                debug!(
                    "ledger holds {} for {credential_id}, store holds {hash}",
                    record.credential_hash
                );
                (RegistryStatus::Mismatch, record.revoked)
            }
            // The hash matched, so a missing record only means the ledger cannot list it.
            Ok(None) if matches => (RegistryStatus::Anchored, false),
            Ok(None) => (RegistryStatus::NotAnchored, false),
            Err(e) if matches => {
                warn!("revocation lookup for {credential_id} failed: {e}");
                (RegistryStatus::Anchored, false)
            }
            Err(e) => (RegistryStatus::Unreachable(e.to_string()), false),
        }
    }

    /// Returns the status and, for a rejected signature, the reason.
    async fn check_signature(&self, credential: &Credential) -> (SignatureStatus, Option<String>) {
        let Some(signature) = credential.signature.as_deref() else {
            return (SignatureStatus::NotApplicable, None);
        };
        // Keys are only ever looked up under the issuer's own DID.
        let did = issuer_did(&credential.issuer_id);
        if let Some(stored) = credential.issuer_did.as_deref() {
            if stored != did {
                warn!(
                    "credential {} names issuer DID {stored}, expected {did}",
                    credential.id
                );
                return (
                    SignatureStatus::PresentInvalid,
                    Some(format!(
                        "issuer DID {stored} does not belong to issuer {}",
                        credential.issuer_id
                    )),
                );
            }
        }

        match signer::check_signature(
            self.registry.as_ref(),
            &did,
            &credential.payload(),
            signature,
        )
        .await
        {
            Ok(()) => (SignatureStatus::PresentValid, None),
            Err(rejection) => {
                warn!("signature on {} rejected: {rejection}", credential.id);
                (SignatureStatus::PresentInvalid, Some(rejection.to_string()))
            }
        }
    }
}

/// Recomputes the content hash over the stored payload.
///
/// Also returns the stored hash when it is readable, for the registry check.
fn check_integrity(credential: &Credential) -> (IntegrityStatus, Option<ContentHash>) {
    let Some(stored) = credential.content_hash.as_deref() else {
        return (IntegrityStatus::NotRegistered, None);
    };
    let stored: ContentHash = match stored.parse() {
        Ok(hash) => hash,
        Err(e) => return (IntegrityStatus::Unverifiable(format!("stored {e}")), None),
    };

    match content_hash(&credential.payload()) {
        Ok(recomputed) if recomputed == stored => (IntegrityStatus::Valid, Some(stored)),
        Ok(recomputed) => {
            debug!("credential {} recomputes to {recomputed}, stored {stored}", credential.id);
            (IntegrityStatus::Tampered, Some(stored))
        }
        Err(e) => (IntegrityStatus::Unverifiable(e.to_string()), Some(stored)),
    }
}

fn credential_id_from_qr(qr_data: &str) -> Result<String, String> {
    let trimmed = qr_data.trim();
    let id = if trimmed.starts_with('{') {
        let parsed: Value = serde_json::from_str(trimmed).map_err(|e| e.to_string())?;
        ["id", "credentialId"]
            .iter()
            .find_map(|key| {
                parsed
                    .get(*key)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
            })
            .unwrap_or_default()
            .to_owned()
    } else {
        trimmed.to_owned()
    };

    if id.is_empty() {
        Err("no credential ID found".into())
    } else {
        Ok(id)
    }
}

fn new_verification_id() -> String {
    format!("VER-{}", Uuid::now_v7())
}

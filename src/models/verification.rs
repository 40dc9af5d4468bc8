// src/models/verification.rs
//! Verification result model.
//!
//! A [`VerificationResult`] is built fresh for every verification request and
//! never persisted. The UI renders `warnings` verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::credential::Credential;

/// Outcome of recomputing the content hash over the stored payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", content = "detail", rename_all = "camelCase")]
pub enum IntegrityStatus {
    Valid,
    /// No content hash was ever attached. Nobody anchored this.
    NotRegistered,
    /// The recomputed hash differs from the stored one. Somebody edited this.
    Tampered,
    /// The hash could not be recomputed or the stored hash is unreadable.
    Unverifiable(String),
}

/// Outcome of checking the stored hash against the anchoring ledger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", content = "detail", rename_all = "camelCase")]
pub enum RegistryStatus {
    Anchored,
    /// The ledger holds a different hash for this id.
    Mismatch,
    /// The ledger has no record for this id.
    NotAnchored,
    /// The ledger could not be reached (or timed out).
    Unreachable(String),
    /// There was no content hash to check.
    Skipped,
}

/// Tri-state signature outcome. Absence is reported, never assumed valid.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    PresentValid,
    PresentInvalid,
    NotApplicable,
}

/// The sub-checks run once the credential exists.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationChecks {
    pub integrity: IntegrityStatus,
    pub registry: RegistryStatus,
    pub signature: SignatureStatus,
    /// Revoked in the document store or on the ledger record.
    #[serde(default)]
    pub revoked: bool,
}

impl VerificationChecks {
    pub fn integrity_valid(&self) -> bool {
        self.integrity == IntegrityStatus::Valid
    }

    pub fn registry_valid(&self) -> bool {
        self.registry == RegistryStatus::Anchored
    }

    /// Whether the ledger knows this credential at all.
    pub fn registered(&self) -> bool {
        matches!(self.registry, RegistryStatus::Anchored | RegistryStatus::Mismatch)
    }

    /// True for a valid signature or when no signature was attached.
    pub fn signature_acceptable(&self) -> bool {
        self.signature != SignatureStatus::PresentInvalid
    }

    pub fn all_pass(&self) -> bool {
        self.integrity_valid()
            && self.registry_valid()
            && self.signature_acceptable()
            && !self.revoked
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub verification_id: String,
    pub valid: bool,
    pub exists: bool,
    pub integrity_valid: bool,
    pub registry_valid: bool,
    /// The ledger knows the credential, whether or not the hash matches.
    pub registered: bool,
    /// `None` when the credential was not found and nothing else was attempted.
    pub checks: Option<VerificationChecks>,
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
}

impl VerificationResult {
    /// Result for a loaded credential. The verdict and the flat flags are
    /// derived from `checks`.
    pub fn checked(
        verification_id: String,
        checks: VerificationChecks,
        warnings: Vec<String>,
        credential: Credential,
    ) -> Self {
        Self {
            verification_id,
            valid: checks.all_pass(),
            exists: true,
            integrity_valid: checks.integrity_valid(),
            registry_valid: checks.registry_valid(),
            registered: checks.registered(),
            checks: Some(checks),
            warnings,
            timestamp: Utc::now(),
            credential: Some(credential),
        }
    }

    /// Result for a credential that could not be loaded.
    pub fn unresolved(verification_id: String, warning: String) -> Self {
        Self {
            verification_id,
            valid: false,
            exists: false,
            integrity_valid: false,
            registry_valid: false,
            registered: false,
            checks: None,
            warnings: vec![warning],
            timestamp: Utc::now(),
            credential: None,
        }
    }

    pub fn revoked(&self) -> bool {
        self.checks.as_ref().map_or(false, |c| c.revoked)
    }

    pub fn signature_status(&self) -> Option<SignatureStatus> {
        self.checks.as_ref().map(|c| c.signature)
    }

    /// Flat summary for audit logging.
    pub fn stats(&self) -> VerificationStats {
        VerificationStats {
            credential_id: self.credential.as_ref().map(|c| c.id.clone()),
            is_valid: self.valid,
            has_warnings: !self.warnings.is_empty(),
            verified_at: self.timestamp,
            verification_id: self.verification_id.clone(),
            existence: self.exists,
            integrity: self.integrity_valid,
            registry: self.registry_valid,
            registered: self.registered,
            revoked: self.revoked(),
            signature: self.signature_status(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationStats {
    pub credential_id: Option<String>,
    pub is_valid: bool,
    pub has_warnings: bool,
    pub verified_at: DateTime<Utc>,
    pub verification_id: String,
    pub existence: bool,
    pub integrity: bool,
    pub registry: bool,
    pub registered: bool,
    pub revoked: bool,
    pub signature: Option<SignatureStatus>,
}

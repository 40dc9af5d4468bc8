// src/models/did.rs
//! Decentralized identifiers used by the Kriti registry.
//!
//! DIDs are namespaced by role:
//! ```text
//! did:kriti:issuer:<issuer-slug>
//! did:kriti:student:<subject-id>
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ISSUER_DID_PREFIX: &str = "did:kriti:issuer:";
pub const STUDENT_DID_PREFIX: &str = "did:kriti:student:";

/// DID under which an issuer's public key is registered.
pub fn issuer_did(issuer_id: &str) -> String {
    format!("{ISSUER_DID_PREFIX}{}", slug(issuer_id))
}

/// DID naming a credential holder on the ledger.
pub fn student_did(student_subject_id: &str) -> String {
    format!("{STUDENT_DID_PREFIX}{}", student_subject_id.trim())
}

/// Lower-cases and collapses whitespace runs to `-` ("VTU  Demo" -> "vtu-demo").
pub fn slug(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

pub fn is_issuer_did(did: &str) -> bool {
    did.strip_prefix(ISSUER_DID_PREFIX)
        .map_or(false, |rest| !rest.trim().is_empty())
}

/// Binding of an issuer DID to a public key on the anchoring ledger.
///
/// At most one key is active per DID. A later registration replaces the
/// earlier one.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRegistryEntry {
    pub did: String,
    /// Hex-encoded SEC1 secp256k1 public key (compressed or uncompressed).
    pub public_key: String,
    pub registered_at: DateTime<Utc>,
}

// src/models/credential.rs
//! Credential data model.
//!
//! A [`Credential`] is one issued attestation as held by the document store.
//! Only the fields projected by [`Credential::payload`] participate in the
//! content hash. Identity, integrity and status fields stay outside it so the
//! hash never depends on itself or on later bookkeeping.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::EncodingError;

/// Kind of attestation. Determines how `credential_data` is interpreted.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CredentialType {
    Degree,
    Certificate,
    Diploma,
    Skill,
    Experience,
}

impl CredentialType {
    /// The string written to the ledger's `credentialType` slot.
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::Degree => "degree",
            CredentialType::Certificate => "certificate",
            CredentialType::Diploma => "diploma",
            CredentialType::Skill => "skill",
            CredentialType::Experience => "experience",
        }
    }
}

/// Where the credential's hash stands with respect to the ledger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum AnchorStatus {
    #[serde(rename_all = "camelCase")]
    Pending {
        attempts: u32,
        last_error: Option<String>,
    },
    Anchored,
}

impl Default for AnchorStatus {
    fn default() -> Self {
        AnchorStatus::Pending {
            attempts: 0,
            last_error: None,
        }
    }
}

/// An issued credential as persisted in the document store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Store-assigned identifier.
    pub id: String,
    /// The holder's portable identifier (e.g. "KT123").
    pub student_subject_id: String,
    pub issuer_id: String,
    pub issuer_display_name: String,
    pub credential_type: CredentialType,
    pub credential_data: Map<String, Value>,
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// `0x`-prefixed Keccak-256 over the canonical payload. Set once at issuance.
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub anchor_tx_ref: Option<String>,
    /// Detached EIP-191 signature over the canonical payload.
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub issuer_did: Option<String>,

    #[serde(default)]
    pub anchor_status: AnchorStatus,
    /// Revocation is a status flag, never a payload mutation.
    #[serde(default)]
    pub revoked: bool,
}

impl Credential {
    /// The subset of fields covered by the content hash and the signature.
    pub fn payload(&self) -> CredentialPayload<'_> {
        CredentialPayload {
            student_subject_id: &self.student_subject_id,
            issuer_id: &self.issuer_id,
            issuer_display_name: &self.issuer_display_name,
            credential_type: self.credential_type,
            credential_data: &self.credential_data,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
        }
    }

    pub fn is_anchored(&self) -> bool {
        matches!(self.anchor_status, AnchorStatus::Anchored)
    }
}

/// Borrowed projection of a credential's integrity-relevant fields.
///
/// Timestamps serialize through [`canonical_timestamp`], so the canonical form
/// does not depend on how the caller's clock or locale renders them.
#[derive(Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPayload<'a> {
    pub student_subject_id: &'a str,
    pub issuer_id: &'a str,
    pub issuer_display_name: &'a str,
    pub credential_type: CredentialType,
    pub credential_data: &'a Map<String, Value>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub issued_at: DateTime<Utc>,
    #[serde(
        serialize_with = "serialize_optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

/// ISO-8601 UTC, millisecond precision, `Z` suffix.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Drops sub-millisecond precision so a stored timestamp equals its canonical rendering.
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&canonical_timestamp(ts))
}

fn serialize_optional_timestamp<S: Serializer>(
    ts: &Option<DateTime<Utc>>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match ts {
        Some(ts) => serialize_timestamp(ts, s),
        None => s.serialize_none(),
    }
}

/// Issuance request, as submitted by an authorized issuer action.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewCredential {
    pub student_subject_id: String,
    pub issuer_id: String,
    pub issuer_display_name: String,
    pub credential_type: CredentialType,
    pub credential_data: Value,
    /// Defaults to the time of issuance.
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewCredential {
    /// Builds the unsaved credential, with timestamps normalized. No id or hash yet.
    pub fn into_credential(self, now: DateTime<Utc>) -> Result<Credential, EncodingError> {
        let credential_data = match self.credential_data {
            Value::Object(map) => map,
            other => return Err(EncodingError::NotAnObject(json_kind(&other))),
        };

        Ok(Credential {
            id: String::new(),
            student_subject_id: self.student_subject_id,
            issuer_id: self.issuer_id,
            issuer_display_name: self.issuer_display_name,
            credential_type: self.credential_type,
            credential_data,
            issued_at: truncate_to_millis(self.issued_at.unwrap_or(now)),
            expires_at: self.expires_at.map(truncate_to_millis),
            content_hash: None,
            anchor_tx_ref: None,
            signature: None,
            issuer_did: None,
            anchor_status: AnchorStatus::default(),
            revoked: false,
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// What the issuer gets back once a credential is persisted and anchored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceReceipt {
    pub credential_id: String,
    pub content_hash: String,
    pub anchor_tx_ref: String,
    pub signed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn request(data: Value) -> NewCredential {
        NewCredential {
            student_subject_id: "KT123".into(),
            issuer_id: "vtu".into(),
            issuer_display_name: "VTU University".into(),
            credential_type: CredentialType::Degree,
            credential_data: data,
            issued_at: None,
            expires_at: None,
        }
    }

    #[test]
    fn credential_data_must_be_an_object() {
        let err = request(json!(["B.E.", "8.5"]))
            .into_credential(Utc::now())
            .unwrap_err();
        assert!(matches!(err, EncodingError::NotAnObject("an array")));
    }

    #[test]
    fn issued_at_is_truncated_to_millis() {
        let now = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let credential = request(json!({"degree": "B.E."})).into_credential(now).unwrap();
        assert_eq!(credential.issued_at.timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(canonical_timestamp(&credential.issued_at), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn payload_excludes_identity_and_integrity_fields() {
        let mut credential = request(json!({"degree": "B.E."}))
            .into_credential(Utc::now())
            .unwrap();
        credential.id = "doc-1".into();
        credential.content_hash = Some("0xabc".into());
        credential.signature = Some("0xdef".into());

        let value = serde_json::to_value(credential.payload()).unwrap();
        let obj = value.as_object().unwrap();
        for excluded in ["id", "contentHash", "signature", "anchorTxRef", "issuerDid", "revoked"] {
            assert!(!obj.contains_key(excluded), "{excluded} leaked into payload");
        }
        assert_eq!(obj["credentialType"], json!("degree"));
        assert!(!obj.contains_key("expiresAt"));
    }

    #[test]
    fn issued_at_offset_does_not_change_the_content_hash() {
        let body = |issued_at: &str| {
            json!({
                "studentSubjectId": "KT123",
                "issuerId": "vtu",
                "issuerDisplayName": "VTU University",
                "credentialType": "degree",
                "credentialData": {"degree": "B.E.", "cgpa": "8.5"},
                "issuedAt": issued_at,
            })
        };
        let hash_of = |issued_at: &str| {
            let request: NewCredential = serde_json::from_value(body(issued_at)).unwrap();
            let credential = request.into_credential(Utc::now()).unwrap();
            crate::utils::crypto::content_hash(&credential.payload()).unwrap()
        };

        let ist = hash_of("2024-06-01T17:30:00+05:30");
        assert_eq!(ist, hash_of("2024-06-01T12:00:00Z"));
        assert_eq!(ist, hash_of("2024-06-01T12:00:00.000Z"));
        assert_ne!(ist, hash_of("2024-06-01T12:00:00.001Z"));
    }

    #[test]
    fn anchor_status_round_trips_through_the_store_format() {
        let pending = AnchorStatus::Pending {
            attempts: 2,
            last_error: Some("timeout".into()),
        };
        let value = serde_json::to_value(&pending).unwrap();
        assert_eq!(value, json!({"state": "pending", "attempts": 2, "lastError": "timeout"}));
        assert_eq!(serde_json::from_value::<AnchorStatus>(value).unwrap(), pending);
    }
}

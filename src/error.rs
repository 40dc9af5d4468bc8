// src/error.rs
//! Error taxonomy for the credential integrity core.
//!
//! Issuance-path errors propagate to the caller. The verification path never
//! surfaces these types: the orchestrator folds every failure into a sub-check
//! outcome plus a warning string.

use thiserror::Error;

/// A payload could not be turned into canonical bytes.
#[derive(Error, Debug)]
pub enum EncodingError {
    /// `credentialData` must be an open mapping of field name to value.
    #[error("credential data must be a JSON object, found {0}")]
    NotAnObject(&'static str),

    /// The payload contains a value serde cannot represent as JSON.
    #[error("payload is not serializable: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure talking to the anchoring ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Network failure or timeout. Retryable with backoff.
    #[error("ledger unreachable: {0}")]
    Connectivity(String),

    /// The ledger refused the call (revert, policy, insufficient funds).
    #[error("ledger rejected the request: {0}")]
    Rejected(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Connectivity(_))
    }
}

/// Failure talking to the document store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("document store unreachable: {0}")]
    Connectivity(String),
}

/// Top-level error for issuance, onboarding and startup.
#[derive(Error, Debug)]
pub enum KritiError {
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Signing failed or key material could not be parsed.
    #[error("signing error: {0}")]
    Signing(String),

    /// No signing key is provisioned for this issuer.
    #[error("no signing key configured for issuer {0}")]
    UnknownSigningKey(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("credential {0} not found")]
    CredentialNotFound(String),

    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The credential was persisted but its hash is not yet on the ledger.
    #[error("credential {credential_id} persisted but anchoring is pending: {source}")]
    AnchorPending {
        credential_id: String,
        #[source]
        source: LedgerError,
    },
}

pub type Result<T, E = KritiError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connectivity_is_retryable() {
        assert!(LedgerError::Connectivity("reset".into()).is_retryable());
        assert!(!LedgerError::Rejected("insufficient funds".into()).is_retryable());
    }

    #[test]
    fn anchor_pending_names_the_credential() {
        let err = KritiError::AnchorPending {
            credential_id: "cred-1".into(),
            source: LedgerError::Connectivity("timeout".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("cred-1"));
        assert!(msg.contains("timeout"));
    }
}

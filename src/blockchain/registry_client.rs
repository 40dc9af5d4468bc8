// src/blockchain/registry_client.rs
//! Registry client: the core's only view of the anchoring ledger.
//!
//! Every operation is a network call that may fail or time out. "Not found"
//! results (`None`, `false`) are ordinary outcomes and are never errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// A credential as anchored on the ledger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerCredentialRecord {
    pub credential_id: String,
    pub student_did: String,
    pub issuer_did: String,
    /// `0x`-prefixed bytes32.
    pub credential_hash: String,
    pub credential_type: String,
    /// Block timestamp of issuance, in seconds.
    pub issued_at: u64,
    pub revoked: bool,
    /// Auxiliary off-chain reference (an IPFS hash slot). May be empty.
    pub aux_ref: String,
}

/// Arguments of an `issueCredential` ledger write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorRequest {
    pub credential_id: String,
    pub student_did: String,
    pub issuer_did: String,
    pub content_hash: [u8; 32],
    pub credential_type: String,
    pub aux_ref: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub chain_id: u64,
    pub block_number: u64,
    /// Whether `chain_id` is the chain this deployment is configured for.
    pub expected_chain: bool,
}

/// Read/write façade over the anchoring ledger.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Binds `public_key` to `did`. Overwrites any prior key.
    async fn register_issuer(&self, did: &str, public_key: &str) -> Result<String, LedgerError>;

    /// `Ok(None)` when the DID was never registered.
    async fn get_public_key(&self, did: &str) -> Result<Option<String>, LedgerError>;

    /// Anchors a credential hash under its id. Returns the transaction reference.
    async fn issue_credential(&self, request: &AnchorRequest) -> Result<String, LedgerError>;

    /// Whether the ledger's hash for `credential_id` equals `provided_hash`.
    /// `Ok(false)` when the id is unknown to the ledger.
    async fn verify_hash(
        &self,
        credential_id: &str,
        provided_hash: &[u8; 32],
    ) -> Result<bool, LedgerError>;

    async fn get_credential_record(
        &self,
        credential_id: &str,
    ) -> Result<Option<LedgerCredentialRecord>, LedgerError>;

    /// Liveness check. Informational only; failures map to `false`.
    async fn check_ledger_reachable(&self) -> bool;

    async fn network_status(&self) -> Result<NetworkStatus, LedgerError>;
}

#[async_trait]
impl<T: RegistryClient + ?Sized> RegistryClient for Arc<T> {
    async fn register_issuer(&self, did: &str, public_key: &str) -> Result<String, LedgerError> {
        (**self).register_issuer(did, public_key).await
    }

    async fn get_public_key(&self, did: &str) -> Result<Option<String>, LedgerError> {
        (**self).get_public_key(did).await
    }

    async fn issue_credential(&self, request: &AnchorRequest) -> Result<String, LedgerError> {
        (**self).issue_credential(request).await
    }

    async fn verify_hash(
        &self,
        credential_id: &str,
        provided_hash: &[u8; 32],
    ) -> Result<bool, LedgerError> {
        (**self).verify_hash(credential_id, provided_hash).await
    }

    async fn get_credential_record(
        &self,
        credential_id: &str,
    ) -> Result<Option<LedgerCredentialRecord>, LedgerError> {
        (**self).get_credential_record(credential_id).await
    }

    async fn check_ledger_reachable(&self) -> bool {
        (**self).check_ledger_reachable().await
    }

    async fn network_status(&self) -> Result<NetworkStatus, LedgerError> {
        (**self).network_status().await
    }
}

/// Bounds every call on the wrapped client by a timeout.
///
/// An elapsed timeout surfaces as [`LedgerError::Connectivity`].
pub struct BoundedRegistry<R> {
    inner: R,
    timeout: Duration,
}

impl<R: RegistryClient> BoundedRegistry<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T, LedgerError>
    where
        T: Send,
        F: std::future::Future<Output = Result<T, LedgerError>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!("ledger call {op} timed out after {:?}", self.timeout);
                Err(LedgerError::Connectivity(format!(
                    "{op} timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

#[async_trait]
impl<R: RegistryClient> RegistryClient for BoundedRegistry<R> {
    async fn register_issuer(&self, did: &str, public_key: &str) -> Result<String, LedgerError> {
        self.bounded("registerDid", self.inner.register_issuer(did, public_key))
            .await
    }

    async fn get_public_key(&self, did: &str) -> Result<Option<String>, LedgerError> {
        self.bounded("getPublicKey", self.inner.get_public_key(did)).await
    }

    async fn issue_credential(&self, request: &AnchorRequest) -> Result<String, LedgerError> {
        self.bounded("issueCredential", self.inner.issue_credential(request))
            .await
    }

    async fn verify_hash(
        &self,
        credential_id: &str,
        provided_hash: &[u8; 32],
    ) -> Result<bool, LedgerError> {
        self.bounded(
            "verifyCredential",
            self.inner.verify_hash(credential_id, provided_hash),
        )
        .await
    }

    async fn get_credential_record(
        &self,
        credential_id: &str,
    ) -> Result<Option<LedgerCredentialRecord>, LedgerError> {
        self.bounded("getCredential", self.inner.get_credential_record(credential_id))
            .await
    }

    async fn check_ledger_reachable(&self) -> bool {
        tokio::time::timeout(self.timeout, self.inner.check_ledger_reachable())
            .await
            .unwrap_or(false)
    }

    async fn network_status(&self) -> Result<NetworkStatus, LedgerError> {
        self.bounded("networkStatus", self.inner.network_status()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::memory_ledger::InMemoryLedger;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn slow_calls_become_connectivity_errors() {
        let ledger = Arc::new(InMemoryLedger::new(80002));
        ledger.set_latency(Duration::from_millis(500));
        let bounded = BoundedRegistry::new(ledger.clone(), Duration::from_millis(20));

        let err = assert_err!(bounded.get_public_key("did:kriti:issuer:vtu").await);
        assert!(err.is_retryable());
        assert!(!bounded.check_ledger_reachable().await);
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let ledger = Arc::new(InMemoryLedger::new(80002));
        let bounded = BoundedRegistry::new(ledger, Duration::from_secs(1));

        assert_ok!(bounded.register_issuer("did:kriti:issuer:vtu", "04ab").await);
        assert_eq!(
            bounded.get_public_key("did:kriti:issuer:vtu").await,
            Ok(Some("04ab".to_string()))
        );
        assert!(bounded.check_ledger_reachable().await);
    }
}

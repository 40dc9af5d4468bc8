// src/services/credential_issuer.rs
//! Credential Issuer Service
//!
//! Issuance is persist-then-anchor: the credential is written to the document
//! store with its content hash (and signature, when the issuer has a key)
//! before the hash is sent to the anchoring ledger. A crash or ledger outage
//! between the two steps leaves a `pending` credential that
//! [`CredentialIssuer::retry_pending_anchors`] can finish later, never a ledger
//! entry without a backing record.
//!
//! The service also onboards issuers (binding a DID to a public key on the
//! ledger) and answers holder/issuer credential listings.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ethers::utils::hex;
use k256::ecdsa::VerifyingKey;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::blockchain::registry_client::{AnchorRequest, RegistryClient};
use crate::error::{KritiError, LedgerError};
use crate::models::credential::{AnchorStatus, Credential, IssuanceReceipt, NewCredential};
use crate::models::did::{is_issuer_did, issuer_did, student_did, ISSUER_DID_PREFIX};
use crate::storage::credential_store::{CredentialFilter, CredentialStore};
use crate::utils::crypto::{content_hash, ContentHash, InvalidContentHash};
use crate::wallet::key_management::KeyProvider;
use crate::wallet::signer;

const DEFAULT_ANCHOR_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Outcome of a [`CredentialIssuer::retry_pending_anchors`] sweep.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRetryReport {
    pub anchored: Vec<String>,
    pub still_pending: Vec<String>,
}

/// Service for issuing credentials and onboarding issuers.
#[derive(Clone)]
pub struct CredentialIssuer {
    store: Arc<dyn CredentialStore>,
    registry: Arc<dyn RegistryClient>,
    keys: Arc<dyn KeyProvider>,
    anchor_retries: u32,
    retry_backoff: Duration,
}

impl CredentialIssuer {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        registry: Arc<dyn RegistryClient>,
        keys: Arc<dyn KeyProvider>,
    ) -> Self {
        Self {
            store,
            registry,
            keys,
            anchor_retries: DEFAULT_ANCHOR_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Connectivity failures are retried `retries` times, doubling `backoff`
    /// after each attempt. Rejections are never retried.
    pub fn with_retry_policy(mut self, retries: u32, backoff: Duration) -> Self {
        self.anchor_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    /// Issues a credential: hash, sign, persist, then anchor.
    ///
    /// # Errors
    /// - `Encoding` if the payload cannot be canonicalized. Nothing is stored.
    /// - `Store` if the document store is unreachable. Nothing is anchored.
    /// - `AnchorPending` if the credential was stored but its hash could not
    ///   be anchored. The credential id travels with the error.
    pub async fn issue_credential(
        &self,
        request: NewCredential,
    ) -> Result<IssuanceReceipt, KritiError> {
        if request.student_subject_id.trim().is_empty() || request.issuer_id.trim().is_empty() {
            return Err(KritiError::InvalidInput(
                "studentSubjectId and issuerId are required".into(),
            ));
        }

        let mut credential = request.into_credential(Utc::now())?;
        let hash = content_hash(&credential.payload())?;

        let signature = match self.keys.signing_key(&credential.issuer_id) {
            Some(key) => Some(signer::sign(&credential.payload(), &key)?),
            None => {
                debug!("no signing key for issuer {}, issuing unsigned", credential.issuer_id);
                None
            }
        };
        if signature.is_some() {
            credential.issuer_did = Some(issuer_did(&credential.issuer_id));
        }
        credential.signature = signature;
        credential.content_hash = Some(hash.to_hex());

        credential.id = self.store.insert(credential.clone()).await?;
        info!(
            "persisted credential {} for {} with hash {hash}",
            credential.id, credential.student_subject_id
        );

        let anchor_tx_ref = self.anchor(&mut credential, hash).await?;
        Ok(IssuanceReceipt {
            credential_id: credential.id,
            content_hash: hash.to_hex(),
            anchor_tx_ref,
            signed: credential.signature.is_some(),
        })
    }

    /// Binds `public_key` to `did` on the ledger. Last write wins.
    pub async fn register_issuer(&self, did: &str, public_key: &str) -> Result<String, KritiError> {
        if !is_issuer_did(did) {
            return Err(KritiError::InvalidInput(format!(
                "{did:?} is not an issuer DID ({ISSUER_DID_PREFIX}<name>)"
            )));
        }
        validate_public_key(public_key)?;

        match self.registry.get_public_key(did).await {
            Ok(Some(existing)) if existing.eq_ignore_ascii_case(public_key) => {
                info!("re-registering unchanged key for {did}");
            }
            Ok(Some(_)) => warn!("overwriting the registered public key for {did}"),
            Ok(None) => {}
            Err(e) => warn!("could not check existing key for {did} before registering: {e}"),
        }

        let tx_ref = self.registry.register_issuer(did, public_key).await?;
        info!("registered issuer {did} in {tx_ref}");
        Ok(tx_ref)
    }

    /// Registers the key this deployment holds for `issuer_id` under its DID.
    pub async fn register_provisioned_issuer(&self, issuer_id: &str) -> Result<String, KritiError> {
        let did = issuer_did(issuer_id);
        let public_key = self
            .keys
            .verification_key(&did)
            .ok_or_else(|| KritiError::UnknownSigningKey(issuer_id.to_owned()))?;
        self.register_issuer(&did, &public_key).await
    }

    /// Re-attempts anchoring for every credential still marked pending.
    pub async fn retry_pending_anchors(&self) -> Result<AnchorRetryReport, KritiError> {
        let pending = self.store.list_pending().await?;
        let mut report = AnchorRetryReport::default();

        for mut credential in pending {
            let hash = match stored_hash(&credential) {
                Ok(hash) => hash,
                Err(e) => {
                    error!("credential {} has an unreadable content hash: {e}", credential.id);
                    report.still_pending.push(credential.id);
                    continue;
                }
            };

            // A previous attempt may have reached the ledger before the store update failed.
            if let Ok(true) = self.registry.verify_hash(&credential.id, hash.as_bytes()).await {
                credential.anchor_status = AnchorStatus::Anchored;
                self.store.put(&credential).await?;
                info!("credential {} was already anchored", credential.id);
                report.anchored.push(credential.id);
                continue;
            }

            match self.anchor(&mut credential, hash).await {
                Ok(_) => report.anchored.push(credential.id),
                Err(KritiError::AnchorPending { .. }) => report.still_pending.push(credential.id),
                Err(e) => return Err(e),
            }
        }

        info!(
            "anchor retry: {} anchored, {} still pending",
            report.anchored.len(),
            report.still_pending.len()
        );
        Ok(report)
    }

    pub async fn get_credential(&self, id: &str) -> Result<Option<Credential>, KritiError> {
        Ok(self.store.get(id).await?)
    }

    /// Marks a stored credential as revoked. Verification fails from then on.
    ///
    /// Revoking twice is a no-op. The content hash and the anchor are untouched.
    pub async fn revoke_credential(&self, id: &str) -> Result<Credential, KritiError> {
        let id = id.trim();
        let mut credential = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| KritiError::CredentialNotFound(id.to_owned()))?;
        if credential.revoked {
            debug!("credential {id} already revoked");
            return Ok(credential);
        }

        credential.revoked = true;
        self.store.put(&credential).await?;
        info!("revoked credential {id} of issuer {}", credential.issuer_id);
        Ok(credential)
    }

    pub async fn query_credentials(
        &self,
        filter: &CredentialFilter,
    ) -> Result<Vec<Credential>, KritiError> {
        Ok(self.store.query(filter).await?)
    }

    /// A holder's credentials, newest first.
    pub async fn credentials_for_student(
        &self,
        student_subject_id: &str,
    ) -> Result<Vec<Credential>, KritiError> {
        self.query_credentials(&CredentialFilter::student(student_subject_id))
            .await
    }

    /// An issuer's credentials, newest first.
    pub async fn credentials_for_issuer(&self, issuer_id: &str) -> Result<Vec<Credential>, KritiError> {
        self.query_credentials(&CredentialFilter::issuer(issuer_id)).await
    }

    /// Anchors a persisted credential and records the outcome in the store.
    async fn anchor(
        &self,
        credential: &mut Credential,
        hash: ContentHash,
    ) -> Result<String, KritiError> {
        let request = AnchorRequest {
            credential_id: credential.id.clone(),
            student_did: student_did(&credential.student_subject_id),
            issuer_did: credential
                .issuer_did
                .clone()
                .unwrap_or_else(|| issuer_did(&credential.issuer_id)),
            content_hash: *hash.as_bytes(),
            credential_type: credential.credential_type.as_str().to_owned(),
            aux_ref: String::new(),
        };
        let prior_attempts = match &credential.anchor_status {
            AnchorStatus::Pending { attempts, .. } => *attempts,
            AnchorStatus::Anchored => 0,
        };

        match self.anchor_with_retry(&request).await {
            Ok(tx_ref) => {
                credential.anchor_tx_ref = Some(tx_ref.clone());
                credential.anchor_status = AnchorStatus::Anchored;
                if let Err(e) = self.store.put(credential).await {
                    // The ledger holds the hash. The next retry sweep reconciles the store.
                    warn!("credential {} anchored in {tx_ref} but status update failed: {e}", credential.id);
                }
                info!("anchored credential {} in {tx_ref}", credential.id);
                Ok(tx_ref)
            }
            Err((source, attempts)) => {
                credential.anchor_status = AnchorStatus::Pending {
                    attempts: prior_attempts + attempts,
                    last_error: Some(source.to_string()),
                };
                if let Err(e) = self.store.put(credential).await {
                    error!("could not record pending anchor for {}: {e}", credential.id);
                }
                warn!("credential {} left pending anchoring: {source}", credential.id);
                Err(KritiError::AnchorPending {
                    credential_id: credential.id.clone(),
                    source,
                })
            }
        }
    }

    /// Returns the tx ref, or the last error with the number of attempts made.
    async fn anchor_with_retry(&self, request: &AnchorRequest) -> Result<String, (LedgerError, u32)> {
        let mut attempts = 0;
        let mut backoff = self.retry_backoff;
        loop {
            attempts += 1;
            match self.registry.issue_credential(request).await {
                Ok(tx_ref) => return Ok(tx_ref),
                Err(e) if e.is_retryable() && attempts <= self.anchor_retries => {
                    warn!(
                        "anchoring {} failed (attempt {attempts}): {e}, retrying in {backoff:?}",
                        request.credential_id
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err((e, attempts)),
            }
        }
    }
}

fn stored_hash(credential: &Credential) -> Result<ContentHash, KritiError> {
    credential
        .content_hash
        .as_deref()
        .ok_or_else(|| KritiError::InvalidInput("credential has no content hash".into()))?
        .parse()
        .map_err(|e: InvalidContentHash| KritiError::InvalidInput(e.to_string()))
}

fn validate_public_key(public_key: &str) -> Result<(), KritiError> {
    let trimmed = public_key.trim();
    let bytes = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .map_err(|e| KritiError::InvalidInput(format!("public key is not hex: {e}")))?;
    VerifyingKey::from_sec1_bytes(&bytes)
        .map(|_| ())
        .map_err(|_| KritiError::InvalidInput("public key is not a SEC1 secp256k1 point".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::memory_ledger::InMemoryLedger;
    use crate::models::credential::CredentialType;
    use crate::storage::credential_store::InMemoryCredentialStore;
    use crate::wallet::key_management::{
        generate_issuer_keys, parse_signing_key, StaticKeyProvider,
    };
    use serde_json::json;
    use tokio_test::assert_ok;

    struct Fixture {
        store: Arc<InMemoryCredentialStore>,
        ledger: Arc<InMemoryLedger>,
        issuer: CredentialIssuer,
    }

    fn fixture(keys: StaticKeyProvider) -> Fixture {
        let store = Arc::new(InMemoryCredentialStore::new());
        let ledger = Arc::new(InMemoryLedger::new(80002));
        let issuer = CredentialIssuer::new(store.clone(), ledger.clone(), Arc::new(keys))
            .with_retry_policy(2, Duration::from_millis(1));
        Fixture {
            store,
            ledger,
            issuer,
        }
    }

    fn degree_request() -> NewCredential {
        NewCredential {
            student_subject_id: "KT123".into(),
            issuer_id: "vtu".into(),
            issuer_display_name: "VTU University".into(),
            credential_type: CredentialType::Degree,
            credential_data: json!({"degree": "B.E.", "cgpa": "8.5"}),
            issued_at: None,
            expires_at: None,
        }
    }

    fn keys_for_vtu() -> StaticKeyProvider {
        let mut keys = StaticKeyProvider::new();
        let pair = generate_issuer_keys("vtu").unwrap();
        keys.insert("vtu", parse_signing_key(&pair.private_key).unwrap());
        keys
    }

    #[tokio::test]
    async fn issues_persists_and_anchors() {
        let f = fixture(StaticKeyProvider::new());
        let receipt = f.issuer.issue_credential(degree_request()).await.unwrap();

        assert!(receipt.content_hash.starts_with("0x"));
        assert_eq!(receipt.content_hash.len(), 66);
        assert!(!receipt.signed);

        let stored = f.store.get(&receipt.credential_id).await.unwrap().unwrap();
        assert_eq!(stored.content_hash.as_deref(), Some(receipt.content_hash.as_str()));
        assert_eq!(stored.anchor_tx_ref.as_deref(), Some(receipt.anchor_tx_ref.as_str()));
        assert!(stored.is_anchored());

        let hash: ContentHash = receipt.content_hash.parse().unwrap();
        assert!(f
            .ledger
            .verify_hash(&receipt.credential_id, hash.as_bytes())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn signs_when_the_issuer_has_a_key() {
        let f = fixture(keys_for_vtu());
        let receipt = f.issuer.issue_credential(degree_request()).await.unwrap();
        assert!(receipt.signed);

        let stored = f.store.get(&receipt.credential_id).await.unwrap().unwrap();
        assert_eq!(stored.issuer_did.as_deref(), Some("did:kriti:issuer:vtu"));
        assert!(stored.signature.is_some());

        let record = f
            .ledger
            .get_credential_record(&receipt.credential_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.student_did, "did:kriti:student:KT123");
        assert_eq!(record.issuer_did, "did:kriti:issuer:vtu");
        assert_eq!(record.credential_type, "degree");
    }

    #[tokio::test]
    async fn non_object_data_is_an_encoding_error_and_stores_nothing() {
        let f = fixture(StaticKeyProvider::new());
        let mut request = degree_request();
        request.credential_data = json!(["B.E."]);

        assert!(matches!(
            f.issuer.issue_credential(request).await,
            Err(KritiError::Encoding(_))
        ));
        assert_eq!(f.store.count_credentials().await, 0);
    }

    #[tokio::test]
    async fn store_outage_blocks_issuance_before_anchoring() {
        let f = fixture(StaticKeyProvider::new());
        f.store.set_available(false);

        assert!(matches!(
            f.issuer.issue_credential(degree_request()).await,
            Err(KritiError::Store(_))
        ));
        assert_eq!(f.ledger.anchored_count(), 0);
    }

    #[tokio::test]
    async fn ledger_outage_leaves_credential_pending_then_retry_anchors_it() {
        let f = fixture(StaticKeyProvider::new());
        f.ledger.set_reachable(false);

        let credential_id = match f.issuer.issue_credential(degree_request()).await {
            Err(KritiError::AnchorPending {
                credential_id,
                source: LedgerError::Connectivity(_),
            }) => credential_id,
            other => panic!("expected pending anchor, got {other:?}"),
        };

        let stored = f.store.get(&credential_id).await.unwrap().unwrap();
        assert!(stored.content_hash.is_some());
        match stored.anchor_status {
            AnchorStatus::Pending {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.is_some());
            }
            AnchorStatus::Anchored => panic!("must not be anchored"),
        }

        f.ledger.set_reachable(true);
        let report = f.issuer.retry_pending_anchors().await.unwrap();
        assert_eq!(report.anchored, vec![credential_id.clone()]);
        assert!(report.still_pending.is_empty());
        assert!(f.store.get(&credential_id).await.unwrap().unwrap().is_anchored());
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let f = fixture(StaticKeyProvider::new());
        f.ledger.reject_writes(Some("insufficient funds"));

        match f.issuer.issue_credential(degree_request()).await {
            Err(KritiError::AnchorPending { credential_id, source }) => {
                assert!(matches!(source, LedgerError::Rejected(_)));
                let stored = f.store.get(&credential_id).await.unwrap().unwrap();
                assert!(matches!(
                    stored.anchor_status,
                    AnchorStatus::Pending { attempts: 1, .. }
                ));
            }
            other => panic!("expected pending anchor, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retry_sweep_reports_what_is_still_down() {
        let f = fixture(StaticKeyProvider::new());
        f.ledger.set_reachable(false);
        let _ = f.issuer.issue_credential(degree_request()).await;

        let report = f.issuer.retry_pending_anchors().await.unwrap();
        assert!(report.anchored.is_empty());
        assert_eq!(report.still_pending.len(), 1);
    }

    #[tokio::test]
    async fn register_issuer_keeps_history_and_last_write_wins() {
        let f = fixture(StaticKeyProvider::new());
        let first = generate_issuer_keys("vtu").unwrap();
        let second = generate_issuer_keys("vtu").unwrap();

        assert_ok!(f.issuer.register_issuer(&first.did, &first.public_key).await);
        assert_ok!(f.issuer.register_issuer(&second.did, &second.public_key).await);

        assert_eq!(
            f.ledger.get_public_key(&first.did).await.unwrap(),
            Some(second.public_key)
        );
        assert_eq!(f.ledger.key_history(&first.did).len(), 2);
    }

    #[tokio::test]
    async fn register_issuer_rejects_garbage_keys() {
        let f = fixture(StaticKeyProvider::new());
        assert!(matches!(
            f.issuer.register_issuer("did:kriti:issuer:vtu", "0x1234").await,
            Err(KritiError::InvalidInput(_))
        ));
        assert!(matches!(
            f.issuer.register_issuer("", "0x04").await,
            Err(KritiError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn revoke_flags_the_stored_credential_only() {
        let f = fixture(StaticKeyProvider::new());
        let receipt = f.issuer.issue_credential(degree_request()).await.unwrap();

        let revoked = assert_ok!(f.issuer.revoke_credential(&receipt.credential_id).await);
        assert!(revoked.revoked);
        assert_eq!(revoked.content_hash.as_deref(), Some(receipt.content_hash.as_str()));

        let stored = f.store.get(&receipt.credential_id).await.unwrap().unwrap();
        assert!(stored.revoked);
        assert_eq!(stored.anchor_status, AnchorStatus::Anchored);

        // Idempotent.
        assert_ok!(f.issuer.revoke_credential(&receipt.credential_id).await);
    }

    #[tokio::test]
    async fn revoking_an_unknown_credential_is_not_found() {
        let f = fixture(StaticKeyProvider::new());
        assert!(matches!(
            f.issuer.revoke_credential("nope").await,
            Err(KritiError::CredentialNotFound(id)) if id == "nope"
        ));
    }

    #[tokio::test]
    async fn register_issuer_only_accepts_issuer_dids() {
        let f = fixture(StaticKeyProvider::new());
        let keys = generate_issuer_keys("vtu").unwrap();

        for did in ["did:kriti:student:KT123", "did:kriti:issuer:", "vtu", "did:ethr:0xabc"] {
            assert!(
                matches!(
                    f.issuer.register_issuer(did, &keys.public_key).await,
                    Err(KritiError::InvalidInput(_))
                ),
                "{did} was accepted"
            );
        }
        assert_eq!(f.ledger.get_public_key("did:kriti:student:KT123").await, Ok(None));
        assert_ok!(f.issuer.register_issuer(&keys.did, &keys.public_key).await);
    }

    #[tokio::test]
    async fn provisioned_issuer_registers_its_own_key() {
        let f = fixture(keys_for_vtu());
        assert_ok!(f.issuer.register_provisioned_issuer("vtu").await);
        assert!(f
            .ledger
            .get_public_key("did:kriti:issuer:vtu")
            .await
            .unwrap()
            .is_some());

        assert!(matches!(
            f.issuer.register_provisioned_issuer("iisc").await,
            Err(KritiError::UnknownSigningKey(_))
        ));
    }

    #[tokio::test]
    async fn listings_are_scoped_and_newest_first() {
        let f = fixture(StaticKeyProvider::new());
        let mut older = degree_request();
        older.issued_at = Some(Utc::now() - chrono::Duration::days(30));
        let older_id = f.issuer.issue_credential(older).await.unwrap().credential_id;
        let newer_id = f
            .issuer
            .issue_credential(degree_request())
            .await
            .unwrap()
            .credential_id;

        let mut other = degree_request();
        other.student_subject_id = "KT999".into();
        other.issuer_id = "iisc".into();
        f.issuer.issue_credential(other).await.unwrap();

        let mine = f.issuer.credentials_for_student("KT123").await.unwrap();
        let ids: Vec<_> = mine.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![newer_id.as_str(), older_id.as_str()]);

        assert_eq!(f.issuer.credentials_for_issuer("iisc").await.unwrap().len(), 1);
    }
}

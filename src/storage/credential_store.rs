// src/storage/credential_store.rs
//! Credential document store.
//!
//! The core only needs `get`, `put` and `query` from the document database.
//! [`InMemoryCredentialStore`] backs tests and local development. A hosted
//! document database plugs in behind the same trait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::credential::Credential;

/// Selection criteria for [`CredentialStore::query`]. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CredentialFilter {
    #[serde(default, alias = "student")]
    pub student_subject_id: Option<String>,
    #[serde(default, alias = "issuer")]
    pub issuer_id: Option<String>,
}

impl CredentialFilter {
    pub fn student(student_subject_id: impl Into<String>) -> Self {
        Self {
            student_subject_id: Some(student_subject_id.into()),
            issuer_id: None,
        }
    }

    pub fn issuer(issuer_id: impl Into<String>) -> Self {
        Self {
            student_subject_id: None,
            issuer_id: Some(issuer_id.into()),
        }
    }

    fn matches(&self, credential: &Credential) -> bool {
        self.student_subject_id
            .as_deref()
            .map_or(true, |s| credential.student_subject_id == s)
            && self
                .issuer_id
                .as_deref()
                .map_or(true, |i| credential.issuer_id == i)
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Persists a new credential under a fresh store-assigned id and returns it.
    /// Any id already on `credential` is ignored.
    async fn insert(&self, credential: Credential) -> Result<String, StoreError>;

    /// Writes `credential` under its own id, replacing what was there.
    async fn put(&self, credential: &Credential) -> Result<(), StoreError>;

    /// `Ok(None)` for an unknown id.
    async fn get(&self, id: &str) -> Result<Option<Credential>, StoreError>;

    /// Matching credentials, newest `issued_at` first.
    async fn query(&self, filter: &CredentialFilter) -> Result<Vec<Credential>, StoreError>;

    /// Credentials persisted but not yet anchored, oldest first.
    async fn list_pending(&self) -> Result<Vec<Credential>, StoreError>;
}

#[async_trait]
impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    async fn insert(&self, credential: Credential) -> Result<String, StoreError> {
        (**self).insert(credential).await
    }

    async fn put(&self, credential: &Credential) -> Result<(), StoreError> {
        (**self).put(credential).await
    }

    async fn get(&self, id: &str) -> Result<Option<Credential>, StoreError> {
        (**self).get(id).await
    }

    async fn query(&self, filter: &CredentialFilter) -> Result<Vec<Credential>, StoreError> {
        (**self).query(filter).await
    }

    async fn list_pending(&self) -> Result<Vec<Credential>, StoreError> {
        (**self).list_pending().await
    }
}

/// In-memory document store.
///
/// Safe to share across tasks. `set_available(false)` makes every call fail
/// with `StoreError::Connectivity`, for exercising outage paths.
pub struct InMemoryCredentialStore {
    credentials: RwLock<HashMap<String, Credential>>,
    available: AtomicBool,
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            credentials: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn count_credentials(&self) -> usize {
        self.credentials.read().await.len()
    }

    pub async fn contains_credential(&self, id: &str) -> bool {
        self.credentials.read().await.contains_key(id)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Connectivity("document store offline".into()))
        }
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn insert(&self, mut credential: Credential) -> Result<String, StoreError> {
        self.check_available()?;
        let id = Uuid::new_v4().to_string();
        credential.id = id.clone();
        self.credentials.write().await.insert(id.clone(), credential);
        debug!("stored credential {id}");
        Ok(id)
    }

    async fn put(&self, credential: &Credential) -> Result<(), StoreError> {
        self.check_available()?;
        self.credentials
            .write()
            .await
            .insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Credential>, StoreError> {
        self.check_available()?;
        Ok(self.credentials.read().await.get(id).cloned())
    }

    async fn query(&self, filter: &CredentialFilter) -> Result<Vec<Credential>, StoreError> {
        self.check_available()?;
        let mut found: Vec<Credential> = self
            .credentials
            .read()
            .await
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(found)
    }

    async fn list_pending(&self) -> Result<Vec<Credential>, StoreError> {
        self.check_available()?;
        let mut pending: Vec<Credential> = self
            .credentials
            .read()
            .await
            .values()
            .filter(|c| !c.is_anchored() && c.content_hash.is_some())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.issued_at.cmp(&b.issued_at));
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::credential::{AnchorStatus, CredentialType, NewCredential};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn create_test_credential(student: &str, issuer: &str, day: u32) -> Credential {
        NewCredential {
            student_subject_id: student.into(),
            issuer_id: issuer.into(),
            issuer_display_name: "VTU University".into(),
            credential_type: CredentialType::Certificate,
            credential_data: json!({"course": "Rust"}),
            issued_at: Some(Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap()),
            expires_at: None,
        }
        .into_credential(Utc::now())
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_fresh_ids() {
        let store = InMemoryCredentialStore::new();
        let a = store.insert(create_test_credential("KT1", "vtu", 1)).await.unwrap();
        let b = store.insert(create_test_credential("KT1", "vtu", 1)).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(store.count_credentials().await, 2);
        assert_eq!(store.get(&a).await.unwrap().unwrap().id, a);
    }

    #[tokio::test]
    async fn test_get_unknown_is_none() {
        let store = InMemoryCredentialStore::new();
        assert_eq!(store.get("non-existent-id").await, Ok(None));
        assert!(!store.contains_credential("non-existent-id").await);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = InMemoryCredentialStore::new();
        let id = store.insert(create_test_credential("KT1", "vtu", 1)).await.unwrap();

        let mut stored = store.get(&id).await.unwrap().unwrap();
        stored.anchor_status = AnchorStatus::Anchored;
        assert_ok!(store.put(&stored).await);

        assert!(store.get(&id).await.unwrap().unwrap().is_anchored());
        assert_eq!(store.count_credentials().await, 1);
    }

    #[tokio::test]
    async fn test_query_filters_and_orders_newest_first() {
        let store = InMemoryCredentialStore::new();
        store.insert(create_test_credential("KT1", "vtu", 1)).await.unwrap();
        store.insert(create_test_credential("KT1", "iisc", 3)).await.unwrap();
        store.insert(create_test_credential("KT2", "vtu", 2)).await.unwrap();

        let mine = store.query(&CredentialFilter::student("KT1")).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine[0].issued_at - mine[1].issued_at == Duration::days(2));

        let vtu = store.query(&CredentialFilter::issuer("vtu")).await.unwrap();
        assert_eq!(vtu.len(), 2);
        assert_eq!(vtu[0].student_subject_id, "KT2");

        assert_eq!(store.query(&CredentialFilter::default()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_list_pending_skips_anchored_and_unhashed() {
        let store = InMemoryCredentialStore::new();
        let mut hashed = create_test_credential("KT1", "vtu", 1);
        hashed.content_hash = Some("0x01".into());
        let pending_id = store.insert(hashed.clone()).await.unwrap();

        hashed.anchor_status = AnchorStatus::Anchored;
        store.insert(hashed).await.unwrap();
        store.insert(create_test_credential("KT1", "vtu", 2)).await.unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, pending_id);
    }

    #[tokio::test]
    async fn test_outage_fails_every_call() {
        let store = InMemoryCredentialStore::new();
        store.set_available(false);
        assert_err!(store.insert(create_test_credential("KT1", "vtu", 1)).await);
        assert!(matches!(
            store.get("anything").await,
            Err(StoreError::Connectivity(_))
        ));
        assert_err!(store.query(&CredentialFilter::default()).await);
    }
}

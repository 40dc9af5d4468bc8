// src/blockchain/memory_ledger.rs
//! In-process anchoring ledger.
//!
//! Backs local development and tests. It is selected only by explicit
//! configuration (`ledger.backend = "memory"`) and is never a fallback for a
//! failed network client. Fault injection lets callers simulate outages,
//! slow responses and rejected writes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ethers::utils::hex;
use log::debug;

use crate::blockchain::registry_client::{
    AnchorRequest, LedgerCredentialRecord, NetworkStatus, RegistryClient,
};
use crate::error::LedgerError;
use crate::models::did::IssuerRegistryEntry;

#[derive(Default)]
struct LedgerState {
    /// Append-only key history per DID. The last entry is the active key.
    keys: HashMap<String, Vec<IssuerRegistryEntry>>,
    credentials: HashMap<String, ([u8; 32], LedgerCredentialRecord)>,
    reachable: bool,
    reject_writes: Option<String>,
    latency: Option<Duration>,
}

/// Ledger kept entirely in memory.
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    chain_id: u64,
    next_tx: AtomicU64,
}

impl InMemoryLedger {
    pub fn new(chain_id: u64) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                reachable: true,
                ..LedgerState::default()
            }),
            chain_id,
            next_tx: AtomicU64::new(1),
        }
    }

    /// Simulates a network outage: every call fails with `Connectivity`.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Makes every write fail with `Rejected(reason)`; `None` clears it.
    pub fn reject_writes(&self, reason: Option<&str>) {
        self.lock().reject_writes = reason.map(str::to_owned);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Every key ever registered for `did`, oldest first.
    pub fn key_history(&self, did: &str) -> Vec<IssuerRegistryEntry> {
        self.lock().keys.get(did).cloned().unwrap_or_default()
    }

    pub fn anchored_count(&self) -> usize {
        self.lock().credentials.len()
    }

    /// Overwrites the anchored hash, as a compromised or buggy writer would.
    pub fn overwrite_hash(&self, credential_id: &str, hash: [u8; 32]) -> bool {
        let mut state = self.lock();
        match state.credentials.get_mut(credential_id) {
            Some((stored, record)) => {
                *stored = hash;
                record.credential_hash = format!("0x{}", hex::encode(hash));
                true
            }
            None => false,
        }
    }

    /// Flags an anchored record as revoked on the ledger side.
    pub fn mark_revoked(&self, credential_id: &str) -> bool {
        match self.lock().credentials.get_mut(credential_id) {
            Some((_, record)) => {
                record.revoked = true;
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn enter(&self, op: &str) -> Result<(), LedgerError> {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.lock().reachable {
            return Err(LedgerError::Connectivity(format!("{op}: connection refused")));
        }
        Ok(())
    }

    async fn enter_write(&self, op: &str) -> Result<String, LedgerError> {
        self.enter(op).await?;
        if let Some(reason) = self.lock().reject_writes.clone() {
            return Err(LedgerError::Rejected(format!("{op}: {reason}")));
        }
        let n = self.next_tx.fetch_add(1, Ordering::Relaxed);
        Ok(format!("0x{n:064x}"))
    }
}

#[async_trait]
impl RegistryClient for InMemoryLedger {
    async fn register_issuer(&self, did: &str, public_key: &str) -> Result<String, LedgerError> {
        let tx = self.enter_write("registerDid").await?;
        self.lock()
            .keys
            .entry(did.to_owned())
            .or_default()
            .push(IssuerRegistryEntry {
                did: did.to_owned(),
                public_key: public_key.to_owned(),
                registered_at: Utc::now(),
            });
        debug!("memory ledger: registered key for {did} in {tx}");
        Ok(tx)
    }

    async fn get_public_key(&self, did: &str) -> Result<Option<String>, LedgerError> {
        self.enter("getPublicKey").await?;
        Ok(self
            .lock()
            .keys
            .get(did)
            .and_then(|history| history.last())
            .map(|entry| entry.public_key.clone()))
    }

    async fn issue_credential(&self, request: &AnchorRequest) -> Result<String, LedgerError> {
        let tx = self.enter_write("issueCredential").await?;
        let record = LedgerCredentialRecord {
            credential_id: request.credential_id.clone(),
            student_did: request.student_did.clone(),
            issuer_did: request.issuer_did.clone(),
            credential_hash: format!("0x{}", hex::encode(request.content_hash)),
            credential_type: request.credential_type.clone(),
            issued_at: Utc::now().timestamp().max(0) as u64,
            revoked: false,
            aux_ref: request.aux_ref.clone(),
        };
        self.lock()
            .credentials
            .insert(request.credential_id.clone(), (request.content_hash, record));
        debug!("memory ledger: anchored {} in {tx}", request.credential_id);
        Ok(tx)
    }

    async fn verify_hash(
        &self,
        credential_id: &str,
        provided_hash: &[u8; 32],
    ) -> Result<bool, LedgerError> {
        self.enter("verifyCredential").await?;
        Ok(self
            .lock()
            .credentials
            .get(credential_id)
            .map_or(false, |(stored, _)| stored == provided_hash))
    }

    async fn get_credential_record(
        &self,
        credential_id: &str,
    ) -> Result<Option<LedgerCredentialRecord>, LedgerError> {
        self.enter("getCredential").await?;
        Ok(self
            .lock()
            .credentials
            .get(credential_id)
            .map(|(_, record)| record.clone()))
    }

    async fn check_ledger_reachable(&self) -> bool {
        self.enter("getCode").await.is_ok()
    }

    async fn network_status(&self) -> Result<NetworkStatus, LedgerError> {
        self.enter("networkStatus").await?;
        Ok(NetworkStatus {
            chain_id: self.chain_id,
            block_number: self.next_tx.load(Ordering::Relaxed) - 1,
            expected_chain: true,
        })
    }
}

// src/blockchain/evm_client.rs
//! EVM anchoring ledger client.
//!
//! Talks JSON-RPC to a deployed Kriti registry contract. Reads go through a
//! bare provider. Writes go through a signer middleware holding the operator
//! key, and are disabled (rejected) when no operator key is configured.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, MiddlewareError, Provider};
use ethers::middleware::SignerMiddleware;
use ethers::signers::{LocalWallet, Signer};
use ethers::utils::hex;
use ethers_contract::ContractError;
use ethers_core::types::Address;
use k256::ecdsa::SigningKey;
use log::{debug, info, warn};

use crate::blockchain::registry_client::{
    AnchorRequest, LedgerCredentialRecord, NetworkStatus, RegistryClient,
};
use crate::config::LedgerSettings;
use crate::contracts::kriti_registry::KritiRegistry;
use crate::error::{KritiError, LedgerError};

type Writer = SignerMiddleware<Provider<Http>, LocalWallet>;

/// JSON-RPC error code providers use for rate limiting.
const RPC_LIMIT_EXCEEDED: i64 = -32005;

/// Ledger client for an EVM chain hosting the registry contract.
pub struct EvmRegistryClient {
    reader: KritiRegistry<Provider<Http>>,
    writer: Option<KritiRegistry<Writer>>,
    expected_chain_id: u64,
}

impl EvmRegistryClient {
    /// Builds the client. Makes no network calls, so startup succeeds while
    /// the ledger is down.
    ///
    /// # Errors
    /// `InvalidInput` if the RPC URL or the contract address is malformed.
    pub fn new(settings: &LedgerSettings, operator_key: Option<&SigningKey>) -> Result<Self, KritiError> {
        let provider = Provider::<Http>::try_from(settings.rpc_url.as_str())
            .map_err(|e| KritiError::InvalidInput(format!("rpc url {}: {e}", settings.rpc_url)))?
            .interval(Duration::from_millis(2_000));
        let address = Address::from_str(&settings.registry_address).map_err(|e| {
            KritiError::InvalidInput(format!(
                "registry address {}: {e}",
                settings.registry_address
            ))
        })?;

        let reader = KritiRegistry::new(address, Arc::new(provider.clone()))?;
        let writer = match operator_key {
            Some(key) => {
                let wallet = LocalWallet::from(key.clone()).with_chain_id(settings.chain_id);
                info!("ledger writes enabled for operator {:?}", wallet.address());
                Some(KritiRegistry::new(
                    address,
                    Arc::new(SignerMiddleware::new(provider, wallet)),
                )?)
            }
            None => {
                warn!("no operator key configured: ledger writes are disabled");
                None
            }
        };

        Ok(Self {
            reader,
            writer,
            expected_chain_id: settings.chain_id,
        })
    }

    fn writer(&self, op: &str) -> Result<&KritiRegistry<Writer>, LedgerError> {
        self.writer.as_ref().ok_or_else(|| {
            LedgerError::Rejected(format!("{op}: no operator key configured"))
        })
    }
}

/// Maps a contract call failure onto the ledger error taxonomy.
///
/// Reverts, explicit JSON-RPC refusals and ABI mismatches need operator
/// attention and are `Rejected`. Transport failures are `Connectivity`.
fn classify<M: Middleware>(op: &str, err: ContractError<M>) -> LedgerError {
    let rpc_refusal = match &err {
        ContractError::Revert(_) => return LedgerError::Rejected(format!("{op} reverted")),
        ContractError::AbiError(_)
        | ContractError::DecodingError(_)
        | ContractError::DetokenizationError(_) => {
            return LedgerError::Rejected(format!("{op}: contract ABI mismatch: {err}"))
        }
        ContractError::MiddlewareError { e } => MiddlewareError::as_error_response(e).cloned(),
        ContractError::ProviderError { e } => MiddlewareError::as_error_response(e).cloned(),
        _ => None,
    };

    match rpc_refusal {
        Some(rpc) if rpc.code != RPC_LIMIT_EXCEEDED => {
            LedgerError::Rejected(format!("{op}: {} (code {})", rpc.message, rpc.code))
        }
        _ => LedgerError::Connectivity(format!("{op}: {err}")),
    }
}

#[async_trait]
impl RegistryClient for EvmRegistryClient {
    async fn register_issuer(&self, did: &str, public_key: &str) -> Result<String, LedgerError> {
        let tx = self
            .writer("registerDid")?
            .register_did(did, public_key)
            .await
            .map_err(|e| classify("registerDid", e))?;
        info!("registered issuer key for {did} in tx {tx:?}");
        Ok(format!("{tx:?}"))
    }

    async fn get_public_key(&self, did: &str) -> Result<Option<String>, LedgerError> {
        let key = self
            .reader
            .get_public_key(did)
            .await
            .map_err(|e| classify("getPublicKey", e))?;
        if key.is_empty() {
            debug!("no public key registered for {did}");
            return Ok(None);
        }
        Ok(Some(key))
    }

    async fn issue_credential(&self, request: &AnchorRequest) -> Result<String, LedgerError> {
        let tx = self
            .writer("issueCredential")?
            .issue_credential(
                &request.credential_id,
                &request.student_did,
                &request.issuer_did,
                request.content_hash,
                &request.credential_type,
                &request.aux_ref,
            )
            .await
            .map_err(|e| classify("issueCredential", e))?;
        info!("anchored credential {} in tx {tx:?}", request.credential_id);
        Ok(format!("{tx:?}"))
    }

    async fn verify_hash(
        &self,
        credential_id: &str,
        provided_hash: &[u8; 32],
    ) -> Result<bool, LedgerError> {
        self.reader
            .verify_credential(credential_id, *provided_hash)
            .await
            .map_err(|e| classify("verifyCredential", e))
    }

    async fn get_credential_record(
        &self,
        credential_id: &str,
    ) -> Result<Option<LedgerCredentialRecord>, LedgerError> {
        let (id, student_did, issuer_did, hash, credential_type, issued_at, revoked, aux_ref) = self
            .reader
            .get_credential(credential_id)
            .await
            .map_err(|e| classify("getCredential", e))?;

        if id.is_empty() {
            return Ok(None);
        }
        Ok(Some(LedgerCredentialRecord {
            credential_id: id,
            student_did,
            issuer_did,
            credential_hash: format!("0x{}", hex::encode(hash.as_bytes())),
            credential_type,
            issued_at: issued_at.low_u64(),
            revoked,
            aux_ref,
        }))
    }

    async fn check_ledger_reachable(&self) -> bool {
        match self.reader.code().await {
            Ok(code) => {
                if code.is_empty() {
                    warn!("no contract code at registry address {:?}", self.reader.address());
                }
                !code.is_empty()
            }
            Err(e) => {
                warn!("ledger liveness check failed: {e}");
                false
            }
        }
    }

    async fn network_status(&self) -> Result<NetworkStatus, LedgerError> {
        let provider = self.reader.client();
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| LedgerError::Connectivity(format!("eth_chainId: {e}")))?
            .as_u64();
        let block_number = provider
            .get_block_number()
            .await
            .map_err(|e| LedgerError::Connectivity(format!("eth_blockNumber: {e}")))?
            .as_u64();

        Ok(NetworkStatus {
            chain_id,
            block_number,
            expected_chain: chain_id == self.expected_chain_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LedgerBackend, AMOY_CHAIN_ID, DEFAULT_REGISTRY_ADDRESS};
    use mockito::{mock, Matcher};
    use tokio_test::assert_err;

    fn settings(rpc_url: &str) -> LedgerSettings {
        LedgerSettings {
            backend: LedgerBackend::Evm,
            rpc_url: rpc_url.to_string(),
            chain_id: AMOY_CHAIN_ID,
            registry_address: DEFAULT_REGISTRY_ADDRESS.to_string(),
            timeout_ms: 2_000,
            anchor_retries: 0,
            retry_backoff_ms: 0,
        }
    }

    #[test]
    fn malformed_address_is_invalid_input() {
        let mut bad = settings("http://127.0.0.1:8545");
        bad.registry_address = "0xnot-an-address".into();
        assert!(matches!(
            EvmRegistryClient::new(&bad, None),
            Err(KritiError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn writes_without_operator_key_are_rejected() {
        let client = EvmRegistryClient::new(&settings("http://127.0.0.1:9"), None).unwrap();
        let err = assert_err!(client.register_issuer("did:kriti:issuer:vtu", "04ab").await);
        assert!(matches!(err, LedgerError::Rejected(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_connectivity() {
        let client = EvmRegistryClient::new(&settings("http://127.0.0.1:9"), None).unwrap();
        let err = assert_err!(client.get_public_key("did:kriti:issuer:vtu").await);
        assert!(err.is_retryable(), "{err:?}");
        assert!(!client.check_ledger_reachable().await);
    }

    #[tokio::test]
    async fn liveness_and_rpc_errors_against_mock_node() {
        let client = EvmRegistryClient::new(&settings(&mockito::server_url()), None).unwrap();

        let deployed = mock("POST", "/")
            .match_body(Matcher::Regex("eth_getCode".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x6080604052"}"#)
            .create();
        assert!(client.check_ledger_reachable().await);
        drop(deployed);

        let empty = mock("POST", "/")
            .match_body(Matcher::Regex("eth_getCode".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x"}"#)
            .create();
        assert!(!client.check_ledger_reachable().await);
        drop(empty);

        let refused = mock("POST", "/")
            .match_body(Matcher::Regex("eth_call".into()))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"execution reverted"}}"#,
            )
            .create();
        let err = assert_err!(client.get_public_key("did:kriti:issuer:vtu").await);
        assert!(matches!(err, LedgerError::Rejected(_)), "{err:?}");
        drop(refused);
    }
}

// src/contracts/kriti_registry.rs
//! Kriti registry smart contract interface.
//!
//! Typed wrapper over the anchoring contract's ABI. Supports issuer key
//! registration, credential anchoring, hash verification and record lookup.
//! Error classification and timeouts live one layer up, in
//! `blockchain::evm_client`.

use std::sync::Arc;

use ethers::providers::{Middleware, ProviderError};
use ethers_contract::{BaseContract, Contract, ContractCall, ContractError};
use ethers_core::abi::Abi;
use ethers_core::types::{Address, Bytes, H256, U256};
use once_cell::sync::Lazy;

use crate::error::KritiError;

static REGISTRY_ABI: Lazy<Result<Abi, String>> = Lazy::new(|| {
    serde_json::from_slice(include_bytes!("abi/KritiRegistry.json")).map_err(|e| e.to_string())
});

/// The registry contract ABI, parsed once.
pub fn registry_abi() -> Result<Abi, KritiError> {
    REGISTRY_ABI
        .clone()
        .map_err(|e| KritiError::InvalidInput(format!("registry ABI: {e}")))
}

/// Raw `getCredential` return tuple.
pub type RawCredentialRecord = (String, String, String, H256, String, U256, bool, String);

/// Kriti registry contract wrapper.
///
/// # Type Parameters
/// * `M` - middleware the calls go through (a bare provider for reads, a
///   signer middleware for writes)
pub struct KritiRegistry<M> {
    contract: Contract<M>,
    client: Arc<M>,
    address: Address,
}

impl<M: Middleware + 'static> KritiRegistry<M> {
    pub fn new(address: Address, client: Arc<M>) -> Result<Self, KritiError> {
        let base = BaseContract::from(registry_abi()?);
        Ok(Self {
            contract: Contract::new(address, base, client.clone()),
            client,
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn client(&self) -> &M {
        &self.client
    }

    /// Binds a public key to a DID. Returns the mined transaction hash.
    pub async fn register_did(
        &self,
        did: &str,
        public_key_hex: &str,
    ) -> Result<H256, ContractError<M>> {
        let call = self
            .contract
            .method::<_, ()>("registerDid", (did.to_owned(), public_key_hex.to_owned()))?;
        self.submit(call).await
    }

    /// Returns the registered key, or an empty string for an unknown DID.
    pub async fn get_public_key(&self, did: &str) -> Result<String, ContractError<M>> {
        self.contract
            .method::<_, String>("getPublicKey", did.to_owned())?
            .call()
            .await
    }

    pub async fn issue_credential(
        &self,
        credential_id: &str,
        student_did: &str,
        issuer_did: &str,
        credential_hash: [u8; 32],
        credential_type: &str,
        ipfs_hash: &str,
    ) -> Result<H256, ContractError<M>> {
        let call = self.contract.method::<_, ()>(
            "issueCredential",
            (
                credential_id.to_owned(),
                student_did.to_owned(),
                issuer_did.to_owned(),
                H256::from(credential_hash),
                credential_type.to_owned(),
                ipfs_hash.to_owned(),
            ),
        )?;
        self.submit(call).await
    }

    pub async fn verify_credential(
        &self,
        credential_id: &str,
        provided_hash: [u8; 32],
    ) -> Result<bool, ContractError<M>> {
        self.contract
            .method::<_, bool>(
                "verifyCredential",
                (credential_id.to_owned(), H256::from(provided_hash)),
            )?
            .call()
            .await
    }

    /// Unknown ids come back as a record with an empty credential id.
    pub async fn get_credential(
        &self,
        credential_id: &str,
    ) -> Result<RawCredentialRecord, ContractError<M>> {
        self.contract
            .method::<_, RawCredentialRecord>("getCredential", credential_id.to_owned())?
            .call()
            .await
    }

    /// Deployed bytecode at the registry address. Empty when nothing is deployed.
    pub async fn code(&self) -> Result<Bytes, M::Error> {
        self.client.get_code(self.address, None).await
    }

    /// Sends a state-changing call and waits for it to be mined.
    ///
    /// A mined transaction with a failed status is reported as a revert.
    async fn submit(&self, call: ContractCall<M, ()>) -> Result<H256, ContractError<M>> {
        let pending = call.send().await?;
        let tx_hash = pending.tx_hash();
        let receipt = pending
            .await
            .map_err(|e| ContractError::ProviderError { e })?;

        match receipt {
            Some(receipt) if receipt.status == Some(0u64.into()) => {
                Err(ContractError::Revert(Bytes::default()))
            }
            Some(_) => Ok(tx_hash),
            None => Err(ContractError::ProviderError {
                e: ProviderError::CustomError(format!(
                    "transaction {tx_hash:?} dropped before confirmation"
                )),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_exposes_registry_functions() {
        let abi = registry_abi().unwrap();
        for name in [
            "registerDid",
            "getPublicKey",
            "issueCredential",
            "verifyCredential",
            "getCredential",
        ] {
            assert!(abi.function(name).is_ok(), "missing {name}");
        }
        assert_eq!(abi.function("getCredential").unwrap().outputs.len(), 8);
    }
}

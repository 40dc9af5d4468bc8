// src/main.rs

//! # Kriti credential service - Main Entry Point
//!
//! Wires the configured ledger backend, the document store and the issuer key
//! provider into the issuance and verification services, then starts the API
//! server.
//!
//! ## Configuration
//! - `kriti.toml` and `KRITI_*` environment variables (see `config`)
//! - `KRITI_SECRETS_PATH`: JSON secret file with the operator and issuer keys
//! - `PRIVATE_KEY`: (Optional) operator key when no secret file provides one
//! - `RUST_LOG`: log filter, `info` by default

use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use log::{info, warn};

use kriti_credentials::blockchain::evm_client::EvmRegistryClient;
use kriti_credentials::blockchain::memory_ledger::InMemoryLedger;
use kriti_credentials::blockchain::registry_client::{BoundedRegistry, RegistryClient};
use kriti_credentials::config::{LedgerBackend, Secrets, Settings};
use kriti_credentials::services::api_server::ApiServer;
use kriti_credentials::services::credential_issuer::CredentialIssuer;
use kriti_credentials::services::verifier::Verifier;
use kriti_credentials::storage::credential_store::InMemoryCredentialStore;
use kriti_credentials::wallet::key_management::{parse_signing_key, StaticKeyProvider};

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load `.env`, logging, settings and secrets
/// 2. Build the ledger backend (no network calls yet)
/// 3. Initialize service components
/// 4. Start API server
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load().context("failed to load settings")?;
    let secrets =
        Secrets::load(settings.secrets_path.as_deref()).context("failed to load secrets")?;

    let keys = StaticKeyProvider::from_secrets(&secrets).context("invalid issuer key")?;
    info!("{} issuer signing key(s) provisioned", keys.len());

    let registry: Arc<dyn RegistryClient> = match settings.ledger.backend {
        LedgerBackend::Evm => {
            let operator_key = secrets
                .operator_key
                .as_deref()
                .map(parse_signing_key)
                .transpose()
                .context("invalid operator key")?;
            let client = EvmRegistryClient::new(&settings.ledger, operator_key.as_ref())
                .context("failed to initialize ledger client")?;
            info!(
                "anchoring on chain {} via {}",
                settings.ledger.chain_id, settings.ledger.rpc_url
            );
            Arc::new(BoundedRegistry::new(client, settings.ledger.timeout()))
        }
        LedgerBackend::Memory => {
            warn!("USING THE IN-MEMORY LEDGER: nothing is anchored on a real network");
            Arc::new(BoundedRegistry::new(
                InMemoryLedger::new(settings.ledger.chain_id),
                settings.ledger.timeout(),
            ))
        }
    };

    if !registry.check_ledger_reachable().await {
        warn!("anchoring ledger is not reachable, credentials will stay pending until it is");
    }

    // TODO: swap in a hosted document store once one is wired up; this one is lost on restart.
    let store = Arc::new(InMemoryCredentialStore::new());

    let credential_issuer = CredentialIssuer::new(store.clone(), registry.clone(), Arc::new(keys))
        .with_retry_policy(
            settings.ledger.anchor_retries,
            settings.ledger.retry_backoff(),
        );
    let verifier = Verifier::new(store, registry.clone());

    let api_server = ApiServer::new(credential_issuer, verifier, registry);
    info!("Available endpoints:");
    info!("- POST /credentials, GET /credentials/:id, GET /credentials?student=|issuer=");
    info!("- POST /credentials/:id/revoke");
    info!("- GET  /verify/:id, POST /verify/qr");
    info!("- POST /issuers, POST /issuers/keys");
    info!("- GET  /ledger/status, POST /anchors/retry");

    api_server
        .run(settings.server.bind_addr)
        .await
        .context("API server stopped")?;
    Ok(())
}

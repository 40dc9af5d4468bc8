// src/config.rs
//! Layered service configuration.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults (Polygon Amoy, local bind address)
//! 2. Optional `kriti.toml` in the working directory
//! 3. Environment variables prefixed `KRITI_`, with `__` separating sections
//!    (e.g. `KRITI_LEDGER__RPC_URL`, `KRITI_LEDGER__BACKEND=memory`)
//!
//! Key material is never part of these layers. It comes from the secret file
//! named by `secrets_path` (or `PRIVATE_KEY` for the operator key), loaded by
//! [`Secrets::load`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use ::config::builder::DefaultState;
use ::config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::error::KritiError;

pub const AMOY_RPC_URL: &str = "https://rpc-amoy.polygon.technology/";
pub const AMOY_CHAIN_ID: u64 = 80002;
pub const DEFAULT_REGISTRY_ADDRESS: &str = "0x99b15e2d5fb8f3b06149fbf909db32320c723d89";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// JSON-RPC against a deployed registry contract.
    Evm,
    /// In-process ledger, for local development only.
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub bind_addr: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerSettings {
    pub backend: LedgerBackend,
    pub rpc_url: String,
    pub chain_id: u64,
    pub registry_address: String,
    /// Upper bound on every registry call.
    pub timeout_ms: u64,
    pub anchor_retries: u32,
    pub retry_backoff_ms: u64,
}

impl LedgerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub secrets_path: Option<String>,
}

impl Settings {
    /// Reads defaults, `kriti.toml` and `KRITI_*` environment variables.
    pub fn load() -> Result<Self, KritiError> {
        let settings = Self::defaults_builder()?
            .add_source(File::with_name("kriti").required(false))
            .add_source(
                Environment::with_prefix("KRITI")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Built-in defaults only.
    pub fn defaults() -> Result<Self, KritiError> {
        Ok(Self::defaults_builder()?.build()?.try_deserialize()?)
    }

    fn defaults_builder() -> Result<ConfigBuilder<DefaultState>, KritiError> {
        Ok(Config::builder()
            .set_default("server.bind_addr", "127.0.0.1:3000")?
            .set_default("ledger.backend", "evm")?
            .set_default("ledger.rpc_url", AMOY_RPC_URL)?
            .set_default("ledger.chain_id", AMOY_CHAIN_ID as i64)?
            .set_default("ledger.registry_address", DEFAULT_REGISTRY_ADDRESS)?
            .set_default("ledger.timeout_ms", 10_000)?
            .set_default("ledger.anchor_retries", 3)?
            .set_default("ledger.retry_backoff_ms", 500)?)
    }
}

/// Key material injected at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    /// Hex secp256k1 key that pays for ledger writes.
    #[serde(default)]
    pub operator_key: Option<String>,
    /// Issuer id -> hex secp256k1 signing key.
    #[serde(default)]
    pub issuer_keys: HashMap<String, String>,
}

impl Secrets {
    /// Reads the JSON secret file if one is configured, then falls back to
    /// `PRIVATE_KEY` for the operator key.
    pub fn load(path: Option<&str>) -> Result<Self, KritiError> {
        let mut secrets = match path {
            Some(path) => Self::from_file(Path::new(path))?,
            None => Secrets::default(),
        };
        if secrets.operator_key.is_none() {
            secrets.operator_key = std::env::var("PRIVATE_KEY").ok().filter(|k| !k.is_empty());
        }
        Ok(secrets)
    }

    pub fn from_file(path: &Path) -> Result<Self, KritiError> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| KritiError::InvalidInput(format!("secret file {}: {e}", path.display())))
    }
}

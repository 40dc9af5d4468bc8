// src/utils/crypto.rs
//! Content hashing.
//!
//! Uses Keccak-256, the anchoring ledger's native hash, so a hash computed
//! here can be compared with `bytes32` values stored by the registry contract.

use std::fmt;
use std::str::FromStr;

use ethers::utils::{hex, keccak256};
use serde::Serialize;
use thiserror::Error;

use crate::error::EncodingError;
use crate::utils::canonical::{canonicalize, CanonicalBytes};

/// Computes a Keccak-256 hash of the input data (Ethereum-compatible).
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    keccak256(data)
}

/// 32-byte content digest, rendered as `0x`-prefixed lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(bytes: &CanonicalBytes) -> Self {
        Self(hash_data(bytes.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<[u8; 32]> for ContentHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("not a 32-byte hex digest: {0:?}")]
pub struct InvalidContentHash(pub String);

impl FromStr for ContentHash {
    type Err = InvalidContentHash;

    /// Accepts the digest with or without `0x`, in either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(digits).map_err(|_| InvalidContentHash(s.to_owned()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| InvalidContentHash(s.to_owned()))?;
        Ok(Self(bytes))
    }
}

/// `hash(canonicalize(payload))`.
pub fn content_hash<T: Serialize + ?Sized>(payload: &T) -> Result<ContentHash, EncodingError> {
    Ok(ContentHash::of(&canonicalize(payload)?))
}

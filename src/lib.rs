//! # Kriti credential integrity core
//!
//! Issues academic credentials with a tamper-evident content hash anchored on
//! an EVM ledger, and verifies them against the document store, the ledger
//! and the issuer's registered signing key.

// Module declarations (organized by functional domain)
pub mod blockchain; // Anchoring ledger backends
pub mod config; // Layered settings and secrets
pub mod contracts; // Registry contract bindings
pub mod error;
pub mod models; // Data structures
pub mod services; // Issuance, verification and API
pub mod storage; // Credential document store
pub mod utils; // Canonicalization and hashing
pub mod wallet; // Issuer keys and signatures

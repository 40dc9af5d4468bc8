pub mod api_server;
pub mod credential_issuer;
pub mod verifier;

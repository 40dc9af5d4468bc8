pub mod key_management;
pub mod signer;

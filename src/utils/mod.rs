pub mod canonical;
pub mod crypto;

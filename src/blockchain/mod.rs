pub mod evm_client;
pub mod memory_ledger;
pub mod registry_client;

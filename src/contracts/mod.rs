pub mod kriti_registry;

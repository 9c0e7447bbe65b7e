//! Persistence backends for the ledger. The chain store talks to them through
//! [`ledger_core::Storage`].

pub mod sled_store;

pub use sled_store::SledStore;

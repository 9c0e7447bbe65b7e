//! Tamper-evident ledger of plastic classification events.
//!
//! [`chain::ChainStore`] owns the append-only hash chain, [`verify`] checks
//! linkage, [`query`] serves most-recent-first tail windows from a single
//! snapshot and [`gateway::PollGateway`] is what pollers call.

pub mod block;
pub mod chain;
pub mod constants;
pub mod error;
pub mod gateway;
pub mod query;
pub mod verify;

pub use block::{
    genesis_block, unix_now, Block, Classification, Hash, VerificationStatus, ZERO_HASH,
};
pub use chain::{ChainStore, Snapshot, Storage};
pub use error::LedgerError;
pub use gateway::{PollError, PollGateway};
pub use query::{tail_window, TailQuery};
pub use verify::verify_chain;

//! Canonical chain state for blocksync.
//!
//! The synchronization core never validates or stores blocks itself; it
//! drives a [`ChainEngine`]. This crate defines that interface, the rejection
//! taxonomy the core uses to decide between deferral and peer penalties, and
//! [`MemoryChain`], an in-memory engine with snapshot persistence used by the
//! daemon and the test suites.

pub mod engine;
pub mod error;
pub mod genesis;
pub mod memory;
pub mod snapshot;
pub mod wallet;

pub use engine::{ChainEngine, ChainNode, UnspentOutput};
pub use error::{BlockRejection, ChainError, RejectReason};
pub use genesis::{genesis_block, genesis_hash, GENESIS_TIMESTAMP};
pub use memory::{MemoryChain, MAX_FUTURE_DRIFT_SECS};
pub use snapshot::{ChainSnapshot, SNAPSHOT_FILE};
pub use wallet::{BalanceFlag, WatchList};

//! The chain engine interface consumed by the synchronization core.

use std::fmt;

use blocksync_types::{Block, BlockHash, Timestamp};

use crate::error::{BlockRejection, ChainError};

/// A position in the block tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainNode {
    pub hash: BlockHash,
    pub height: u64,
    pub timestamp: Timestamp,
}

/// A coinbase output still credited to an address on the best chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnspentOutput {
    pub block: BlockHash,
    pub height: u64,
    pub payee: String,
    /// Base units (1e-8 of a coin).
    pub value: u64,
}

impl fmt::Display for UnspentOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>15.8} {} @ {} (coinbase {})",
            self.value as f64 / 1e8,
            self.payee,
            self.height,
            self.block
        )
    }
}

/// Owner of canonical chain state.
///
/// Only the event loop ever holds one of these, so no method needs to be
/// safe for concurrent callers.
pub trait ChainEngine: Send {
    /// Structural and consensus checks without mutating state.
    fn check_block(&self, block: &Block) -> Result<(), BlockRejection>;

    /// Apply a block to the tree, moving the tip if it wins fork choice.
    fn accept_block(&mut self, block: &Block) -> Result<(), ChainError>;

    /// Periodic bookkeeping run when nothing else is pending.
    fn idle_maintenance(&mut self);

    /// Current best tip.
    fn tip(&self) -> ChainNode;

    fn lookup(&self, hash: &BlockHash) -> Option<ChainNode>;

    /// Deepest block that is an ancestor of both nodes.
    fn common_ancestor(&self, a: &ChainNode, b: &ChainNode) -> ChainNode;

    /// Human-readable statistics.
    fn stats_summary(&self) -> String;

    /// Flush state to disk now.
    fn persist_now(&mut self) -> Result<(), ChainError>;

    /// Toggle automatic disk sync; enabling flushes pending changes.
    fn set_sync_enabled(&mut self, enabled: bool) -> Result<(), ChainError>;

    fn sync_enabled(&self) -> bool;

    fn close(&mut self) -> Result<(), ChainError>;

    /// Every block identifier in the index, for dedup seeding.
    fn known_hashes(&self) -> Vec<BlockHash>;

    /// Coinbase outputs credited to `address` on the best chain.
    fn unspent(&self, address: &str) -> Vec<UnspentOutput>;
}

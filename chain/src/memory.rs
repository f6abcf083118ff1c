//! In-memory reference chain engine.
//!
//! Blocks form a tree rooted at genesis. The best tip is the block with the
//! greatest height; the first block to reach a height keeps the tip, so an
//! equal-height competitor lands on a side branch until its branch grows
//! longer. State is persisted as a [`ChainSnapshot`] when a snapshot path is
//! configured.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use blocksync_types::{Block, BlockHash, Timestamp, CURRENT_BLOCK_VERSION};
use tracing::{debug, info, warn};

use crate::engine::{ChainEngine, ChainNode, UnspentOutput};
use crate::error::{BlockRejection, ChainError, RejectReason};
use crate::snapshot::{ChainSnapshot, SNAPSHOT_FILE};
use crate::wallet::WatchList;

/// How far ahead of the local clock a block timestamp may be.
pub const MAX_FUTURE_DRIFT_SECS: u64 = 2 * 60 * 60;

struct StoredBlock {
    block: Block,
    height: u64,
}

pub struct MemoryChain {
    blocks: HashMap<BlockHash, StoredBlock>,
    /// Acceptance order, replayed from snapshots.
    order: Vec<BlockHash>,
    genesis: BlockHash,
    tip: BlockHash,
    watch: WatchList,
    snapshot_path: Option<PathBuf>,
    sync_enabled: bool,
    dirty: bool,
    closed: bool,
    side_blocks: u64,
    reorgs: u64,
}

fn reject(hash: BlockHash, reason: RejectReason) -> Result<(), BlockRejection> {
    Err(BlockRejection::new(hash, reason))
}

impl MemoryChain {
    pub fn new(genesis: Block) -> Self {
        let hash = genesis.hash();
        let mut blocks = HashMap::new();
        blocks.insert(
            hash,
            StoredBlock {
                block: genesis,
                height: 0,
            },
        );
        Self {
            blocks,
            order: vec![hash],
            genesis: hash,
            tip: hash,
            watch: WatchList::default(),
            snapshot_path: None,
            sync_enabled: true,
            dirty: false,
            closed: false,
            side_blocks: 0,
            reorgs: 0,
        }
    }

    /// Open the chain stored in `dir`, or start a fresh one at `genesis`.
    pub fn open(dir: &Path, genesis: Block) -> Result<Self, ChainError> {
        let path = dir.join(SNAPSHOT_FILE);
        let mut chain = Self::new(genesis).with_snapshot_path(path.clone());
        if let Some(snapshot) = ChainSnapshot::read_from(&path)? {
            let mut blocks = snapshot.into_blocks()?.into_iter();
            match blocks.next() {
                Some(first) if first.hash() == chain.genesis => {}
                _ => {
                    return Err(ChainError::Snapshot(
                        "snapshot does not start at the expected genesis".into(),
                    ))
                }
            }
            for block in blocks {
                chain.insert(&block)?;
            }
            chain.dirty = false;
            info!(
                blocks = chain.order.len(),
                height = chain.height(),
                path = %path.display(),
                "chain loaded from snapshot"
            );
        }
        Ok(chain)
    }

    pub fn with_watch_list(mut self, watch: WatchList) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_snapshot_path(mut self, path: PathBuf) -> Self {
        self.snapshot_path = Some(path);
        self
    }

    pub fn height(&self) -> u64 {
        self.blocks.get(&self.tip).map_or(0, |s| s.height)
    }

    /// Number of blocks in the tree, genesis included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn node(&self, hash: &BlockHash) -> Option<ChainNode> {
        self.blocks.get(hash).map(|s| ChainNode {
            hash: *hash,
            height: s.height,
            timestamp: s.block.timestamp(),
        })
    }

    fn genesis_node(&self) -> ChainNode {
        self.node(&self.genesis).unwrap_or(ChainNode {
            hash: self.genesis,
            height: 0,
            timestamp: Timestamp::EPOCH,
        })
    }

    fn parent_node(&self, node: &ChainNode) -> Option<ChainNode> {
        if node.height == 0 {
            return None;
        }
        let parent = self.blocks.get(&node.hash)?.block.parent();
        self.node(&parent)
    }

    /// Whether any block from `from` down to (excluding) `stop` pays a
    /// watched address.
    fn segment_touches_watch(&self, from: BlockHash, stop: BlockHash) -> bool {
        let mut cursor = from;
        while cursor != stop {
            let Some(stored) = self.blocks.get(&cursor) else {
                return false;
            };
            if self.watch.watches(&stored.block.coinbase.payee) {
                return true;
            }
            if stored.height == 0 {
                return false;
            }
            cursor = stored.block.parent();
        }
        false
    }

    fn insert(&mut self, block: &Block) -> Result<(), ChainError> {
        self.check_block(block)?;
        let hash = block.hash();
        let parent_height = self
            .blocks
            .get(&block.parent())
            .map(|p| p.height)
            .ok_or(BlockRejection::new(hash, RejectReason::ParentUnknown))?;

        let old_tip = self.tip();
        let height = parent_height + 1;
        self.blocks.insert(
            hash,
            StoredBlock {
                block: block.clone(),
                height,
            },
        );
        self.order.push(hash);
        self.dirty = true;

        if height <= old_tip.height {
            self.side_blocks += 1;
            debug!(%hash, height, tip_height = old_tip.height, "block stored on side branch");
            return Ok(());
        }

        self.tip = hash;
        if block.parent() == old_tip.hash {
            if self.watch.watches(&block.coinbase.payee) {
                self.watch.flag().raise();
            }
            return Ok(());
        }

        self.reorgs += 1;
        let new_tip = self.tip();
        let fork = self.common_ancestor(&old_tip, &new_tip);
        info!(
            from = %old_tip.hash,
            to = %hash,
            depth = old_tip.height - fork.height,
            "chain reorganisation"
        );
        if self.segment_touches_watch(old_tip.hash, fork.hash)
            || self.segment_touches_watch(hash, fork.hash)
        {
            self.watch.flag().raise();
        }
        Ok(())
    }
}

impl ChainEngine for MemoryChain {
    fn check_block(&self, block: &Block) -> Result<(), BlockRejection> {
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return reject(hash, RejectReason::AlreadyKnown);
        }
        if block.header.version != CURRENT_BLOCK_VERSION {
            return reject(hash, RejectReason::UnsupportedVersion);
        }
        if block.compute_body_digest() != block.header.body_digest {
            return reject(hash, RejectReason::BodyDigestMismatch);
        }
        if block.coinbase.payee.is_empty() {
            return reject(hash, RejectReason::EmptyPayee);
        }
        if block.parent().is_zero() {
            return reject(hash, RejectReason::UnexpectedGenesis);
        }
        let Some(parent) = self.blocks.get(&block.parent()) else {
            return reject(hash, RejectReason::ParentUnknown);
        };
        if block.timestamp() < parent.block.timestamp() {
            return reject(hash, RejectReason::TimestampBeforeParent);
        }
        let horizon = Timestamp::now().as_secs().saturating_add(MAX_FUTURE_DRIFT_SECS);
        if block.timestamp().as_secs() > horizon {
            return reject(hash, RejectReason::TimestampInFuture);
        }
        Ok(())
    }

    fn accept_block(&mut self, block: &Block) -> Result<(), ChainError> {
        if self.closed {
            return Err(ChainError::Closed);
        }
        self.insert(block)
    }

    fn idle_maintenance(&mut self) {
        if self.sync_enabled && self.dirty {
            if let Err(e) = self.persist_now() {
                warn!(error = %e, "idle snapshot flush failed");
            }
        }
    }

    fn tip(&self) -> ChainNode {
        self.node(&self.tip).unwrap_or_else(|| self.genesis_node())
    }

    fn lookup(&self, hash: &BlockHash) -> Option<ChainNode> {
        self.node(hash)
    }

    fn common_ancestor(&self, a: &ChainNode, b: &ChainNode) -> ChainNode {
        let genesis = self.genesis_node();
        let (Some(mut x), Some(mut y)) = (self.node(&a.hash), self.node(&b.hash)) else {
            return genesis;
        };
        while x.hash != y.hash {
            let step = if x.height >= y.height {
                self.parent_node(&x).map(|p| x = p)
            } else {
                self.parent_node(&y).map(|p| y = p)
            };
            if step.is_none() {
                return genesis;
            }
        }
        x
    }

    fn stats_summary(&self) -> String {
        let tip = self.tip();
        format!(
            "height {} tip {} ({} blocks, {} side-branch, {} reorgs); sync {}{}",
            tip.height,
            tip.hash,
            self.blocks.len(),
            self.side_blocks,
            self.reorgs,
            if self.sync_enabled { "on" } else { "off" },
            if self.dirty { ", unsaved changes" } else { "" },
        )
    }

    fn persist_now(&mut self) -> Result<(), ChainError> {
        let Some(path) = self.snapshot_path.clone() else {
            self.dirty = false;
            return Ok(());
        };
        let blocks = self
            .order
            .iter()
            .filter_map(|h| self.blocks.get(h).map(|s| &s.block));
        ChainSnapshot::create(blocks)?.write_to(&path)?;
        self.dirty = false;
        debug!(blocks = self.order.len(), path = %path.display(), "chain snapshot written");
        Ok(())
    }

    fn set_sync_enabled(&mut self, enabled: bool) -> Result<(), ChainError> {
        self.sync_enabled = enabled;
        if enabled && self.dirty {
            self.persist_now()?;
        }
        Ok(())
    }

    fn sync_enabled(&self) -> bool {
        self.sync_enabled
    }

    fn close(&mut self) -> Result<(), ChainError> {
        if self.closed {
            return Ok(());
        }
        if self.dirty {
            self.persist_now()?;
        }
        self.closed = true;
        Ok(())
    }

    fn known_hashes(&self) -> Vec<BlockHash> {
        self.order.clone()
    }

    fn unspent(&self, address: &str) -> Vec<UnspentOutput> {
        let mut out = Vec::new();
        let mut cursor = self.tip;
        while let Some(stored) = self.blocks.get(&cursor) {
            if stored.block.coinbase.payee == address {
                out.push(UnspentOutput {
                    block: cursor,
                    height: stored.height,
                    payee: stored.block.coinbase.payee.clone(),
                    value: stored.block.coinbase.value,
                });
            }
            if stored.height == 0 {
                break;
            }
            cursor = stored.block.parent();
        }
        out.reverse();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::genesis_block;
    use crate::wallet::BalanceFlag;
    use blocksync_types::BlockBuilder;

    fn child(parent: &Block, nonce: u64) -> Block {
        BlockBuilder::new(parent.hash())
            .timestamp(Timestamp::new(parent.timestamp().as_secs() + 600))
            .payee("miner")
            .nonce(nonce)
            .build()
    }

    fn paying(parent: &Block, payee: &str) -> Block {
        BlockBuilder::new(parent.hash())
            .timestamp(Timestamp::new(parent.timestamp().as_secs() + 600))
            .payee(payee)
            .build()
    }

    #[test]
    fn extends_the_tip() {
        let genesis = genesis_block();
        let mut chain = MemoryChain::new(genesis.clone());
        let b1 = child(&genesis, 0);
        chain.accept_block(&b1).unwrap();
        assert_eq!(chain.tip().hash, b1.hash());
        assert_eq!(chain.tip().height, 1);
        assert_eq!(chain.known_hashes().len(), 2);
    }

    #[test]
    fn equal_height_competitor_is_a_side_block() {
        let genesis = genesis_block();
        let mut chain = MemoryChain::new(genesis.clone());
        let a = child(&genesis, 1);
        let b = child(&genesis, 2);
        chain.accept_block(&a).unwrap();
        chain.accept_block(&b).unwrap();
        assert_eq!(chain.tip().hash, a.hash());
        let side = chain.lookup(&b.hash()).unwrap();
        assert_eq!(side.height, 1);
        assert_eq!(chain.common_ancestor(&chain.tip(), &side).hash, genesis.hash());
    }

    #[test]
    fn longer_side_branch_reorganises() {
        let genesis = genesis_block();
        let mut chain = MemoryChain::new(genesis.clone());
        let a1 = child(&genesis, 1);
        let b1 = child(&genesis, 2);
        let b2 = child(&b1, 3);
        chain.accept_block(&a1).unwrap();
        chain.accept_block(&b1).unwrap();
        chain.accept_block(&b2).unwrap();
        assert_eq!(chain.tip().hash, b2.hash());
        assert_eq!(chain.tip().height, 2);
        assert!(chain.stats_summary().contains("1 reorgs"));
    }

    #[test]
    fn check_classifies_failures() {
        let genesis = genesis_block();
        let chain = MemoryChain::new(genesis.clone());

        let orphan = child(&child(&genesis, 9), 0);
        let err = chain.check_block(&orphan).unwrap_err();
        assert_eq!(err.reason, RejectReason::ParentUnknown);
        assert!(err.is_deferrable());

        let mut tampered = child(&genesis, 0);
        tampered.payload.push(1);
        let err = chain.check_block(&tampered).unwrap_err();
        assert_eq!(err.reason, RejectReason::BodyDigestMismatch);
        assert!(err.is_attributable());

        let err = chain.check_block(&genesis).unwrap_err();
        assert_eq!(err.reason, RejectReason::AlreadyKnown);

        let backwards = BlockBuilder::new(genesis.hash())
            .timestamp(Timestamp::new(1))
            .payee("x")
            .build();
        assert_eq!(
            chain.check_block(&backwards).unwrap_err().reason,
            RejectReason::TimestampBeforeParent
        );

        let future = BlockBuilder::new(genesis.hash())
            .timestamp(Timestamp::new(Timestamp::now().as_secs() + 10 * MAX_FUTURE_DRIFT_SECS))
            .payee("x")
            .build();
        assert!(chain.check_block(&future).unwrap_err().is_deferrable());

        let nobody = BlockBuilder::new(genesis.hash()).payee("").build();
        assert_eq!(
            chain.check_block(&nobody).unwrap_err().reason,
            RejectReason::EmptyPayee
        );
    }

    #[test]
    fn unspent_follows_the_best_chain() {
        let genesis = genesis_block();
        let mut chain = MemoryChain::new(genesis.clone());
        let a1 = paying(&genesis, "alice");
        let a2 = paying(&a1, "bob");
        let a3 = paying(&a2, "alice");
        for b in [&a1, &a2, &a3] {
            chain.accept_block(b).unwrap();
        }
        let outs = chain.unspent("alice");
        assert_eq!(outs.len(), 2);
        assert_eq!(outs[0].height, 1);
        assert_eq!(outs[1].height, 3);
        assert!(chain.unspent("carol").is_empty());
    }

    #[test]
    fn watched_payee_raises_the_flag() {
        let genesis = genesis_block();
        let flag = BalanceFlag::new();
        let mut chain = MemoryChain::new(genesis.clone())
            .with_watch_list(WatchList::new(["alice"], flag.clone()));

        let other = paying(&genesis, "bob");
        chain.accept_block(&other).unwrap();
        assert!(!flag.take());

        let mine = paying(&other, "alice");
        chain.accept_block(&mine).unwrap();
        assert!(flag.take());
    }

    #[test]
    fn reorg_away_from_watched_block_raises_the_flag() {
        let genesis = genesis_block();
        let flag = BalanceFlag::new();
        let mut chain = MemoryChain::new(genesis.clone())
            .with_watch_list(WatchList::new(["alice"], flag.clone()));

        let mine = paying(&genesis, "alice");
        chain.accept_block(&mine).unwrap();
        assert!(flag.take());

        let b1 = paying(&genesis, "bob");
        let b2 = paying(&b1, "bob");
        chain.accept_block(&b1).unwrap();
        assert!(!flag.is_raised());
        chain.accept_block(&b2).unwrap();
        assert!(flag.take());
        assert!(chain.unspent("alice").is_empty());
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let genesis = genesis_block();
        let b1 = child(&genesis, 0);
        let b2 = child(&b1, 0);
        {
            let mut chain = MemoryChain::open(dir.path(), genesis.clone()).unwrap();
            chain.accept_block(&b1).unwrap();
            chain.accept_block(&b2).unwrap();
            chain.close().unwrap();
            assert!(chain.accept_block(&child(&b2, 0)).is_err());
        }
        let chain = MemoryChain::open(dir.path(), genesis).unwrap();
        assert_eq!(chain.tip().hash, b2.hash());
        assert!(!chain.is_dirty());
    }

    #[test]
    fn sync_disabled_defers_idle_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let genesis = genesis_block();
        let mut chain = MemoryChain::open(dir.path(), genesis.clone()).unwrap();
        chain.set_sync_enabled(false).unwrap();
        chain.accept_block(&child(&genesis, 0)).unwrap();
        chain.idle_maintenance();
        assert!(chain.is_dirty());
        assert!(!dir.path().join(SNAPSHOT_FILE).exists());

        chain.set_sync_enabled(true).unwrap();
        assert!(!chain.is_dirty());
        assert!(dir.path().join(SNAPSHOT_FILE).exists());
    }

    #[test]
    fn common_ancestor_of_unknown_nodes_is_genesis() {
        let genesis = genesis_block();
        let chain = MemoryChain::new(genesis.clone());
        let ghost = ChainNode {
            hash: BlockHash::new([7; 32]),
            height: 5,
            timestamp: Timestamp::EPOCH,
        };
        assert_eq!(chain.common_ancestor(&ghost, &chain.tip()).hash, genesis.hash());
    }
}

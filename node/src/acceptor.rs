//! The acceptance orchestrator: the only code path that mutates chain state.
//!
//! Owned by the event loop, which lends it to the deferred cache during a
//! retry pass. After the chain engine applies a block, fresh blocks are
//! relayed and announced, side-branch acceptances are measured for fork
//! depth, and the balance flag is surfaced.

use std::sync::Arc;
use std::time::Instant;

use blocksync_chain::{BlockRejection, ChainEngine, ChainError, ChainNode};
use blocksync_types::{Block, Timestamp};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::context::NodeContext;
use crate::counters;

/// Side effects observed while accepting one block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Acceptance {
    /// The block is younger than the fresh-block window.
    pub fresh: bool,
    /// The tip moved as a result of this block.
    pub tip_advanced: bool,
    /// Peers the block was relayed to.
    pub relayed: usize,
    /// Set for fresh blocks that landed on a side branch.
    pub fork_depth: Option<u64>,
    pub deep_fork: bool,
    pub mined_by_us: bool,
    pub balance_changed: bool,
}

pub struct Acceptor<C> {
    chain: C,
    ctx: Arc<NodeContext>,
}

impl<C: ChainEngine> Acceptor<C> {
    pub fn new(chain: C, ctx: Arc<NodeContext>) -> Self {
        Self { chain, ctx }
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut C {
        &mut self.chain
    }

    pub fn into_chain(self) -> C {
        self.chain
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn check(&self, block: &Block) -> Result<(), BlockRejection> {
        self.chain.check_block(block)
    }

    /// Apply `block` through the chain engine and run the post-acceptance
    /// side effects. Failures are reported and returned, never retried here.
    pub fn accept_locally(
        &mut self,
        block: &Block,
        origin: &Arc<dyn Connection>,
    ) -> Result<Acceptance, ChainError> {
        let hash = block.hash();
        let previous_tip = self.chain.tip();

        let started = Instant::now();
        let result = self.chain.accept_block(block);
        let elapsed = started.elapsed();
        self.ctx
            .metrics
            .accept_time_ms
            .observe(elapsed.as_secs_f64() * 1000.0);

        if let Err(e) = result {
            self.ctx.counters.count(counters::ACCEPT_FAILED);
            warn!(
                hash = %hash,
                peer = origin.peer_id(),
                error = %e,
                "block passed checks but failed to apply; chain state may need a rebuild"
            );
            self.ctx.console.refresh_prompt();
            return Err(e);
        }

        let tip = self.chain.tip();
        self.ctx.metrics.blocks_accepted.inc();
        self.ctx.metrics.chain_height.set(tip.height as i64);

        if elapsed > self.ctx.config.slow_accept() {
            self.ctx.counters.count(counters::SLOW_ACCEPTS);
            warn!(
                height = tip.height,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow block acceptance"
            );
            self.ctx.console.refresh_prompt();
        }

        let mut acceptance = Acceptance {
            tip_advanced: tip.hash != previous_tip.hash,
            ..Acceptance::default()
        };

        let window = self.ctx.config.fresh_block_window_secs;
        if block.timestamp().is_recent(window, Timestamp::now()) {
            acceptance.fresh = true;
            self.announce_fresh(block, origin.as_ref(), &previous_tip, &tip, &mut acceptance);
        }

        if self.ctx.balance.take() {
            acceptance.balance_changed = true;
            info!("balance of a watched address has changed");
            self.ctx.console.bell();
            self.ctx.console.refresh_prompt();
        }

        self.ctx.set_last_accepted(tip);
        debug!(hash = %hash.short(), height = tip.height, ?acceptance, "block accepted");
        Ok(acceptance)
    }

    fn announce_fresh(
        &self,
        block: &Block,
        origin: &dyn Connection,
        previous_tip: &ChainNode,
        tip: &ChainNode,
        acceptance: &mut Acceptance,
    ) {
        let hash = block.hash();
        let config = &self.ctx.config;
        let console = &self.ctx.console;

        acceptance.relayed = self.ctx.peers.relay_except(&hash, origin.peer_id());

        if config.beep {
            info!(height = tip.height, hash = %hash.short(), "received fresh block");
            console.bell();
            console.refresh_prompt();
        }

        if let Some(miner) = config.miner_id.as_deref() {
            if block.mined_by(miner) {
                acceptance.mined_by_us = true;
                self.ctx.counters.count(counters::MINED_BY_US);
                info!(miner, hash = %hash, "block mined by us");
                console.bell();
                console.refresh_prompt();
            }
        }

        if acceptance.tip_advanced {
            return;
        }
        let Some(node) = self.chain.lookup(&hash) else {
            return;
        };
        let fork = self.chain.common_ancestor(previous_tip, &node);
        let depth = node.height.saturating_sub(fork.height);
        acceptance.fork_depth = Some(depth);
        self.ctx.counters.count(counters::ORPHANED_BLOCKS);
        info!(
            height = node.height,
            hash = %hash.short(),
            fork_height = fork.height,
            depth,
            "accepted block on a side branch"
        );
        if depth > 1 {
            acceptance.deep_fork = true;
            self.ctx.counters.count(counters::DEEP_FORKS);
            warn!(
                depth,
                fork_height = fork.height,
                tip_height = previous_tip.height,
                "deep fork detected: side branch is {depth} blocks past the common ancestor"
            );
            console.bell();
        }
        console.refresh_prompt();
    }
}

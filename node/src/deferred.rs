//! Deferred block cache: blocks that failed their check only because a
//! prerequisite is missing (unknown parent, timestamp not yet valid).
//!
//! Owned by the event loop. Entries are retried against current chain
//! state after every successful acceptance. When full, the entry with the
//! oldest receipt time is evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use blocksync_chain::ChainEngine;
use blocksync_types::{Block, BlockHash};
use tracing::{debug, info, warn};

use crate::acceptor::Acceptor;
use crate::connection::{Connection, PenaltyReason};
use crate::context::NodeContext;
use crate::counters;
use crate::tracing_spans::retry_span;

pub struct CachedBlock {
    pub received_at: Instant,
    pub block: Block,
    pub origin: Arc<dyn Connection>,
}

pub struct DeferredCache {
    entries: HashMap<BlockHash, CachedBlock>,
    capacity: usize,
    ctx: Arc<NodeContext>,
}

impl DeferredCache {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        let capacity = ctx.config.cache_capacity;
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
            ctx,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Hold `block` for a later retry. Returns the hash evicted to make
    /// room, if any.
    pub fn cache(&mut self, block: Block, origin: Arc<dyn Connection>) -> Option<BlockHash> {
        self.cache_at(block, origin, Instant::now())
    }

    pub fn cache_at(
        &mut self,
        block: Block,
        origin: Arc<dyn Connection>,
        now: Instant,
    ) -> Option<BlockHash> {
        let hash = block.hash();
        let mut evicted = None;
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&hash) {
            if let Some(oldest) = self.oldest() {
                self.entries.remove(&oldest);
                self.ctx.counters.count(counters::CACHE_BLOCKS_EXPIRED);
                debug!(evicted = %oldest.short(), "deferred cache full, evicted oldest entry");
                evicted = Some(oldest);
            }
        }
        self.entries.insert(
            hash,
            CachedBlock {
                received_at: now,
                block,
                origin,
            },
        );
        self.update_gauge();
        evicted
    }

    fn oldest(&self) -> Option<BlockHash> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.received_at)
            .map(|(hash, _)| *hash)
    }

    /// One pass over the cache, oldest entries first.
    ///
    /// Entries that are still deferrable stay. Permanently invalid entries
    /// are dropped, penalizing the origin when the fault is its own. The
    /// pass stops after the first successful acceptance, since it can make
    /// other entries valid. Returns `true` when a block was accepted and
    /// entries remain, i.e. another pass is worthwhile.
    pub fn retry<C: ChainEngine>(&mut self, acceptor: &mut Acceptor<C>) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let _span = retry_span(self.entries.len()).entered();

        let mut order: Vec<(Instant, BlockHash)> = self
            .entries
            .iter()
            .map(|(hash, entry)| (entry.received_at, *hash))
            .collect();
        order.sort_unstable();

        let mut accepted = false;
        for (_, hash) in order {
            let Some(entry) = self.entries.get(&hash) else {
                continue;
            };
            self.ctx.set_busy(format!("Cache.CheckBlock {}", hash.short()));
            match acceptor.check(&entry.block) {
                Err(rejection) if rejection.is_deferrable() => {}
                Err(rejection) => {
                    let Some(entry) = self.entries.remove(&hash) else {
                        continue;
                    };
                    self.ctx.counters.count(counters::BAD_CACHED_BLOCKS);
                    if rejection.is_attributable() {
                        self.ctx.counters.count(counters::CACHED_BLOCKS_DOS);
                        info!(peer = entry.origin.peer_id(), %rejection, "dropping invalid cached block");
                        self.ctx
                            .penalize(entry.origin.as_ref(), PenaltyReason::InvalidBlock);
                    } else {
                        debug!(%rejection, "dropping cached block");
                    }
                }
                Ok(()) => {
                    let Some(entry) = self.entries.remove(&hash) else {
                        continue;
                    };
                    self.ctx
                        .set_busy(format!("Cache.LocalAcceptBlock {}", hash.short()));
                    match acceptor.accept_locally(&entry.block, &entry.origin) {
                        Ok(_) => {
                            self.ctx.counters.count(counters::BLOCKS_FROM_CACHE);
                            accepted = true;
                            break;
                        }
                        Err(e) => {
                            self.ctx.counters.count(counters::CACHED_ACCEPT_FAILED);
                            warn!(peer = entry.origin.peer_id(), error = %e, "cached block failed to apply");
                            self.ctx
                                .penalize(entry.origin.as_ref(), PenaltyReason::AcceptFailed);
                        }
                    }
                }
            }
        }
        self.update_gauge();
        accepted && !self.entries.is_empty()
    }

    fn update_gauge(&self) {
        self.ctx.metrics.cached_blocks.set(self.entries.len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::context::SilentConsole;
    use crate::nullables::NullConnection;
    use blocksync_chain::{genesis_block, BalanceFlag, MemoryChain};
    use blocksync_types::{BlockBuilder, Timestamp};
    use std::time::Duration;

    fn setup(cache_capacity: usize) -> (DeferredCache, Acceptor<MemoryChain>) {
        let chain = MemoryChain::new(genesis_block());
        let config = SyncConfig {
            cache_capacity,
            ..SyncConfig::default()
        };
        let ctx = Arc::new(NodeContext::new(
            config,
            chain.tip(),
            BalanceFlag::new(),
            Arc::new(SilentConsole),
        ));
        (DeferredCache::new(ctx.clone()), Acceptor::new(chain, ctx))
    }

    fn child(parent: BlockHash, nonce: u64) -> Block {
        BlockBuilder::new(parent)
            .timestamp(Timestamp::new(1_700_000_000 + nonce))
            .nonce(nonce)
            .payee("miner")
            .build()
    }

    #[test]
    fn full_cache_evicts_the_oldest_entry() {
        let (mut cache, _) = setup(2);
        let peer = NullConnection::new("p");
        let base = Instant::now();
        let missing = BlockHash::new([9; 32]);
        let (a, b, c) = (child(missing, 1), child(missing, 2), child(missing, 3));

        assert_eq!(cache.cache_at(b.clone(), peer.clone(), base + Duration::from_secs(2)), None);
        assert_eq!(cache.cache_at(a.clone(), peer.clone(), base), None);
        assert_eq!(
            cache.cache_at(c.clone(), peer.clone(), base + Duration::from_secs(3)),
            Some(a.hash())
        );
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&b.hash()) && cache.contains(&c.hash()));
        assert_eq!(cache.ctx.counters.get(counters::CACHE_BLOCKS_EXPIRED), 1);
    }

    #[test]
    fn retry_with_only_deferrable_entries_changes_nothing() {
        let (mut cache, mut acceptor) = setup(10);
        let peer = NullConnection::new("p");
        let missing = BlockHash::new([9; 32]);
        cache.cache(child(missing, 1), peer.clone());
        cache.cache(child(missing, 2), peer.clone());

        assert!(!cache.retry(&mut acceptor));
        assert_eq!(cache.len(), 2);
        assert!(peer.penalties().is_empty());
    }

    #[test]
    fn retry_accepts_one_block_per_pass() {
        let (mut cache, mut acceptor) = setup(10);
        let peer = NullConnection::new("p");
        let genesis = genesis_block().hash();
        let p1 = child(genesis, 1);
        let p2 = child(p1.hash(), 2);
        let p3 = child(p2.hash(), 3);
        let base = Instant::now();
        cache.cache_at(p3.clone(), peer.clone(), base);
        cache.cache_at(p2.clone(), peer.clone(), base + Duration::from_millis(1));

        acceptor.accept_locally(&p1, &(peer.clone() as Arc<dyn Connection>)).unwrap();

        // p3 is older but still lacks its parent; p2 goes in and p3 remains.
        assert!(cache.retry(&mut acceptor));
        assert_eq!(cache.len(), 1);
        assert!(!cache.retry(&mut acceptor));
        assert!(cache.is_empty());
        assert_eq!(acceptor.chain().tip().hash, p3.hash());
        assert_eq!(cache.ctx.counters.get(counters::BLOCKS_FROM_CACHE), 2);
    }

    #[test]
    fn permanently_invalid_entry_is_dropped_and_penalized() {
        let (mut cache, mut acceptor) = setup(10);
        let peer = NullConnection::new("p");
        let mut bad = child(genesis_block().hash(), 1);
        bad.coinbase.payee = "tampered".into();
        cache.cache(bad, peer.clone());

        assert!(!cache.retry(&mut acceptor));
        assert!(cache.is_empty());
        assert_eq!(peer.penalties(), vec![PenaltyReason::InvalidBlock]);
        assert_eq!(cache.ctx.counters.get(counters::CACHED_BLOCKS_DOS), 1);
    }

    #[test]
    fn already_known_entry_is_dropped_without_penalty() {
        let (mut cache, mut acceptor) = setup(10);
        let peer = NullConnection::new("p");
        let block = child(genesis_block().hash(), 1);
        acceptor
            .accept_locally(&block, &(peer.clone() as Arc<dyn Connection>))
            .unwrap();
        cache.cache(block, peer.clone());

        assert!(!cache.retry(&mut acceptor));
        assert!(cache.is_empty());
        assert!(peer.penalties().is_empty());
        assert_eq!(cache.ctx.counters.get(counters::BAD_CACHED_BLOCKS), 1);
    }
}

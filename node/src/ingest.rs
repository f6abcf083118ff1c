//! The connection-handler side of the pipeline.
//!
//! [`IngestHandle`] is cloned into every connection task. It answers
//! inventory questions directly from the shared tracker and admits complete
//! block payloads into the bounded queue drained by the event loop. Parsing
//! and deduplication happen here, before a block ever reaches the queue.

use std::sync::Arc;

use blocksync_types::{Block, BlockHash};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::{Connection, PenaltyReason};
use crate::context::NodeContext;
use crate::counters;
use crate::inventory::Receipt;
use crate::tracing_spans::ingest_span;

/// A parsed, deduplicated block waiting for the event loop.
pub struct IngestEvent {
    pub block: Block,
    pub origin: Arc<dyn Connection>,
}

/// What happened to a delivered payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Queued,
    /// Already received once; dropped without touching the queue.
    Duplicate,
    /// Unparseable; the sender was penalized.
    Malformed,
    /// The event loop is gone.
    Closed,
}

#[derive(Clone)]
pub struct IngestHandle {
    ctx: Arc<NodeContext>,
    tx: mpsc::Sender<IngestEvent>,
}

impl IngestHandle {
    pub fn new(ctx: Arc<NodeContext>, tx: mpsc::Sender<IngestEvent>) -> Self {
        Self { ctx, tx }
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    /// A peer announced `hash`. Returns `true` if the caller should
    /// schedule a fetch.
    pub fn notify_inventory(&self, hash: BlockHash) -> bool {
        self.ctx.inventory.notify_inventory(hash).needs_fetch()
    }

    pub fn is_wanted(&self, hash: &BlockHash) -> bool {
        self.ctx.inventory.is_wanted(hash)
    }

    /// Next hash a connection should request, or `None` when nothing is
    /// pending or the ingestion queue already holds a full fetch window.
    pub fn next_fetch_target(&self) -> Option<BlockHash> {
        if self.queued() >= self.ctx.config.fetch_window {
            return None;
        }
        self.ctx.inventory.next_fetch_target()
    }

    /// Blocks sitting in the ingestion queue.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Deliver a raw block payload. Waits while the ingestion queue is full.
    pub async fn block_received(&self, origin: Arc<dyn Connection>, raw: &[u8]) -> IngestOutcome {
        let block = match self.admit(origin.as_ref(), raw) {
            Ok(block) => block,
            Err(outcome) => return outcome,
        };
        match self.tx.send(IngestEvent { block, origin }).await {
            Ok(()) => IngestOutcome::Queued,
            Err(_) => IngestOutcome::Closed,
        }
    }

    /// Blocking variant of [`block_received`](Self::block_received) for
    /// handlers running on plain threads.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn blocking_block_received(&self, origin: Arc<dyn Connection>, raw: &[u8]) -> IngestOutcome {
        let block = match self.admit(origin.as_ref(), raw) {
            Ok(block) => block,
            Err(outcome) => return outcome,
        };
        match self.tx.blocking_send(IngestEvent { block, origin }) {
            Ok(()) => IngestOutcome::Queued,
            Err(_) => IngestOutcome::Closed,
        }
    }

    fn admit(&self, origin: &dyn Connection, raw: &[u8]) -> Result<Block, IngestOutcome> {
        let _span = ingest_span(origin.peer_id()).entered();

        let block = match Block::from_bytes(raw) {
            Ok(block) => block,
            Err(e) => {
                warn!(peer = origin.peer_id(), len = raw.len(), error = %e, "malformed block payload");
                self.ctx.counters.count(counters::MALFORMED_BLOCK);
                self.ctx.penalize(origin, PenaltyReason::MalformedBlock);
                return Err(IngestOutcome::Malformed);
            }
        };
        let hash = block.hash();

        if !origin.clear_requested(&hash) {
            self.ctx.counters.count(counters::UNEXPECTED_BLOCK);
        }

        if self.ctx.inventory.mark_received(hash) == Receipt::Duplicate {
            debug!(hash = %hash.short(), "duplicate block dropped");
            return Err(IngestOutcome::Duplicate);
        }

        self.ctx.metrics.blocks_received.inc();
        Ok(block)
    }
}

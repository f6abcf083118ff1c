//! The event loop: the single consumer that owns the chain engine.
//!
//! Each iteration drains scheduled cache retries (yielding as soon as other
//! work shows up), then waits for whichever comes first: shutdown, an
//! ingested block, an operator command, or the idle tick. Nothing here
//! blocks on network I/O.

use std::sync::Arc;

use blocksync_chain::ChainEngine;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::acceptor::{Acceptance, Acceptor};
use crate::commands::{split_command, CommandContext, CommandRegistry, OperatorCommand};
use crate::connection::{PenaltyReason, PeerDatabase};
use crate::context::NodeContext;
use crate::counters;
use crate::deferred::DeferredCache;
use crate::ingest::IngestEvent;
use crate::tracing_spans::{block_span, command_span};
use crate::NodeError;

/// The next unit of work for the loop.
pub enum Dispatch {
    Shutdown,
    Block(IngestEvent),
    Command(OperatorCommand),
    Idle,
}

/// What happened to a block taken off the ingestion queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDisposition {
    Accepted(Acceptance),
    Deferred,
    Rejected,
    AcceptFailed,
}

pub struct EventLoop<C: ChainEngine> {
    ctx: Arc<NodeContext>,
    acceptor: Acceptor<C>,
    cache: DeferredCache,
    commands: CommandRegistry<C>,
    blocks: mpsc::Receiver<IngestEvent>,
    operator: mpsc::Receiver<OperatorCommand>,
    shutdown: broadcast::Receiver<()>,
    peer_db: Option<Box<dyn PeerDatabase>>,
    retry_pending: bool,
    exit_requested: bool,
}

impl<C: ChainEngine> EventLoop<C> {
    pub fn new(
        ctx: Arc<NodeContext>,
        chain: C,
        blocks: mpsc::Receiver<IngestEvent>,
        operator: mpsc::Receiver<OperatorCommand>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            acceptor: Acceptor::new(chain, ctx.clone()),
            cache: DeferredCache::new(ctx.clone()),
            commands: CommandRegistry::with_defaults(),
            ctx,
            blocks,
            operator,
            shutdown,
            peer_db: None,
            retry_pending: false,
            exit_requested: false,
        }
    }

    /// Closed after the chain engine when the loop exits.
    pub fn with_peer_database(mut self, db: Box<dyn PeerDatabase>) -> Self {
        self.peer_db = Some(db);
        self
    }

    pub fn with_commands(mut self, commands: CommandRegistry<C>) -> Self {
        self.commands = commands;
        self
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn chain(&self) -> &C {
        self.acceptor.chain()
    }

    pub fn cached_blocks(&self) -> usize {
        self.cache.len()
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Run until shutdown or `quit`, then close the chain engine and the
    /// peer database. Returns the closed engine.
    pub async fn run(mut self) -> Result<C, NodeError> {
        info!(
            height = self.chain().tip().height,
            cached = self.cache.len(),
            "event loop started"
        );
        while !self.exit_requested {
            self.ctx.counters.count(counters::MAIN_LOOP_ITERATIONS);
            self.drain_retries();
            self.ctx.clear_busy();
            let next = self.next_dispatch().await;
            self.dispatch(next);
        }
        self.close()
    }

    /// Retry passes back to back while each one accepts a block and
    /// nothing else is waiting.
    pub fn drain_retries(&mut self) {
        while self.retry_pending {
            self.retry_pending = self.cache.retry(&mut self.acceptor);
            if !self.blocks.is_empty() || !self.operator.is_empty() {
                break;
            }
        }
    }

    async fn next_dispatch(&mut self) -> Dispatch {
        let idle = self.ctx.config.idle_interval();
        tokio::select! {
            biased;
            _ = self.shutdown.recv() => Dispatch::Shutdown,
            Some(event) = self.blocks.recv() => Dispatch::Block(event),
            Some(command) = self.operator.recv() => Dispatch::Command(command),
            _ = tokio::time::sleep(idle) => Dispatch::Idle,
        }
    }

    pub fn dispatch(&mut self, next: Dispatch) {
        match next {
            Dispatch::Shutdown => {
                info!("shutdown requested");
                self.exit_requested = true;
            }
            Dispatch::Command(command) => self.run_command(command),
            Dispatch::Idle => self.on_idle(),
            Dispatch::Block(event) => {
                self.ctx.counters.count(counters::NET_BLOCKS_GOT);
                self.handle_block(event);
            }
        }
    }

    fn on_idle(&mut self) {
        self.ctx.counters.count(counters::MAIN_LOOP_TIMEOUTS);
        if !self.retry_pending {
            self.ctx.set_busy("Idle");
            self.acceptor.chain_mut().idle_maintenance();
        }
        self.ctx.refresh_inventory_gauges();
    }

    /// Check a queued block and accept, defer, or reject it.
    pub fn handle_block(&mut self, event: IngestEvent) -> BlockDisposition {
        let hash = event.block.hash();
        let _span = block_span(&hash).entered();

        self.ctx.set_busy(format!("CheckBlock {}", hash.short()));
        if let Err(rejection) = self.acceptor.check(&event.block) {
            if rejection.is_deferrable() {
                self.ctx.counters.count(counters::BLOCKS_DEFERRED);
                self.ctx.metrics.blocks_deferred.inc();
                debug!(peer = event.origin.peer_id(), %rejection, "deferring block");
                self.cache.cache(event.block, event.origin);
                return BlockDisposition::Deferred;
            }
            self.ctx.counters.count(counters::BLOCKS_REJECTED);
            self.ctx.metrics.blocks_rejected.inc();
            if rejection.is_attributable() {
                info!(peer = event.origin.peer_id(), %rejection, "rejecting invalid block");
                self.ctx
                    .penalize(event.origin.as_ref(), PenaltyReason::InvalidBlock);
            } else {
                debug!(peer = event.origin.peer_id(), %rejection, "ignoring block");
            }
            return BlockDisposition::Rejected;
        }

        self.ctx
            .set_busy(format!("LocalAcceptBlock {}", hash.short()));
        match self.acceptor.accept_locally(&event.block, &event.origin) {
            Ok(acceptance) => {
                self.retry_pending = !self.cache.is_empty();
                BlockDisposition::Accepted(acceptance)
            }
            Err(e) => {
                debug!(error = %e, "acceptance failed after a passing check");
                self.ctx
                    .penalize(event.origin.as_ref(), PenaltyReason::AcceptFailed);
                BlockDisposition::AcceptFailed
            }
        }
    }

    fn run_command(&mut self, command: OperatorCommand) {
        self.ctx.counters.count(counters::UI_COMMANDS);
        self.ctx.set_busy("UI command");
        let (name, _) = split_command(&command.line);
        let _span = command_span(name).entered();

        let mut cx = CommandContext {
            chain: self.acceptor.chain_mut(),
            ctx: &self.ctx,
            cached_blocks: self.cache.len(),
            exit_requested: false,
        };
        let reply = self.commands.dispatch(&mut cx, &command.line);
        if cx.exit_requested {
            info!("quit requested from the console");
            self.exit_requested = true;
        }
        if command.reply.send(reply).is_err() {
            debug!("console went away before the reply was sent");
        }
    }

    fn close(self) -> Result<C, NodeError> {
        info!("closing chain engine");
        let mut chain = self.acceptor.into_chain();
        let chain_result = chain.close();
        if let Err(e) = &chain_result {
            error!(error = %e, "chain engine failed to close cleanly");
        }
        if let Some(mut db) = self.peer_db {
            info!("closing peer database");
            if let Err(e) = db.close() {
                warn!(error = %e, "peer database failed to close cleanly");
                chain_result?;
                return Err(e);
            }
        }
        chain_result?;
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::context::SilentConsole;
    use crate::nullables::NullConnection;
    use blocksync_chain::{genesis_block, BalanceFlag, MemoryChain};
    use blocksync_types::{Block, BlockBuilder, BlockHash};

    struct Wiring {
        event_loop: EventLoop<MemoryChain>,
        _blocks: mpsc::Sender<IngestEvent>,
        _commands: mpsc::Sender<OperatorCommand>,
        _shutdown: broadcast::Sender<()>,
    }

    fn wiring() -> Wiring {
        let chain = MemoryChain::new(genesis_block());
        let ctx = Arc::new(NodeContext::new(
            SyncConfig::default(),
            chain.tip(),
            BalanceFlag::new(),
            Arc::new(SilentConsole),
        ));
        let (block_tx, block_rx) = mpsc::channel(8);
        let (command_tx, command_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Wiring {
            event_loop: EventLoop::new(ctx, chain, block_rx, command_rx, shutdown_rx),
            _blocks: block_tx,
            _commands: command_tx,
            _shutdown: shutdown_tx,
        }
    }

    fn event(block: &Block, origin: &Arc<NullConnection>) -> IngestEvent {
        IngestEvent {
            block: block.clone(),
            origin: origin.clone(),
        }
    }

    fn child(parent: BlockHash, nonce: u64) -> Block {
        BlockBuilder::new(parent).nonce(nonce).payee("m").build()
    }

    #[test]
    fn acceptance_schedules_a_retry_only_when_cache_has_entries() {
        let mut w = wiring();
        let peer = NullConnection::new("p");
        let genesis = genesis_block().hash();
        let a = child(genesis, 1);
        let b = child(a.hash(), 2);

        let first = w.event_loop.handle_block(event(&a, &peer));
        assert!(matches!(first, BlockDisposition::Accepted(_)));
        assert!(!w.event_loop.retry_pending());

        let c = child(b.hash(), 3);
        assert_eq!(
            w.event_loop.handle_block(event(&c, &peer)),
            BlockDisposition::Deferred
        );
        assert!(matches!(
            w.event_loop.handle_block(event(&b, &peer)),
            BlockDisposition::Accepted(_)
        ));
        assert!(w.event_loop.retry_pending());

        w.event_loop.drain_retries();
        assert!(!w.event_loop.retry_pending());
        assert_eq!(w.event_loop.cached_blocks(), 0);
        assert_eq!(w.event_loop.chain().tip().hash, c.hash());
    }

    #[test]
    fn already_known_block_is_rejected_quietly() {
        let mut w = wiring();
        let peer = NullConnection::new("p");
        let a = child(genesis_block().hash(), 1);
        w.event_loop.handle_block(event(&a, &peer));

        assert_eq!(
            w.event_loop.handle_block(event(&a, &peer)),
            BlockDisposition::Rejected
        );
        assert!(peer.penalties().is_empty());
    }

    #[test]
    fn idle_tick_runs_maintenance_and_counts() {
        let mut w = wiring();
        w.event_loop.dispatch(Dispatch::Idle);
        let ctx = w.event_loop.context();
        assert_eq!(ctx.counters.get(counters::MAIN_LOOP_TIMEOUTS), 1);
        assert_eq!(ctx.busy(), "Idle");
    }

    #[test]
    fn shutdown_dispatch_sets_the_exit_flag() {
        let mut w = wiring();
        w.event_loop.dispatch(Dispatch::Shutdown);
        assert!(w.event_loop.exit_requested());
    }

    #[test]
    fn command_reply_is_delivered() {
        let mut w = wiring();
        let (reply, mut rx) = tokio::sync::oneshot::channel();
        w.event_loop.dispatch(Dispatch::Command(OperatorCommand {
            line: "q".into(),
            reply,
        }));
        assert_eq!(rx.try_recv().unwrap(), "Exiting...");
        assert!(w.event_loop.exit_requested());
        assert_eq!(
            w.event_loop.context().counters.get(counters::UI_COMMANDS),
            1
        );
    }
}

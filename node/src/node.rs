//! Wiring: builds the shared context, the channels and the event loop
//! around a chain engine.

use std::sync::Arc;

use blocksync_chain::{BalanceFlag, ChainEngine};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::commands::ConsoleHandle;
use crate::config::SyncConfig;
use crate::context::{ConsoleHook, NodeContext};
use crate::event_loop::EventLoop;
use crate::ingest::IngestHandle;
use crate::shutdown::ShutdownController;
use crate::NodeError;

/// A fully wired but not yet running node.
///
/// The fields are public so callers can swap in extra commands or a peer
/// database on `event_loop` before spawning it.
pub struct SyncNode<C: ChainEngine> {
    pub event_loop: EventLoop<C>,
    pub ingest: IngestHandle,
    pub console: ConsoleHandle,
    pub context: Arc<NodeContext>,
}

impl<C: ChainEngine> SyncNode<C> {
    /// Seed the dedup ledger from `chain`, record its tip as the last
    /// accepted block, and create the ingestion and command queues.
    pub fn new(
        config: SyncConfig,
        mut chain: C,
        balance: BalanceFlag,
        console_hook: Arc<dyn ConsoleHook>,
        shutdown: &ShutdownController,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        if chain.sync_enabled() != config.sync_enabled {
            chain.set_sync_enabled(config.sync_enabled)?;
        }

        let tip = chain.tip();
        let block_queue = config.ingest_queue_capacity;
        let command_queue = config.command_queue_capacity;
        let context = Arc::new(NodeContext::new(config, tip, balance, console_hook));

        let seeded = context.inventory.seed_received(chain.known_hashes());
        context.refresh_inventory_gauges();
        info!(
            seeded,
            height = tip.height,
            tip = %tip.hash.short(),
            "dedup ledger seeded from the chain index"
        );

        let (block_tx, block_rx) = mpsc::channel(block_queue);
        let (command_tx, command_rx) = mpsc::channel(command_queue);

        Ok(Self {
            event_loop: EventLoop::new(
                context.clone(),
                chain,
                block_rx,
                command_rx,
                shutdown.subscribe(),
            ),
            ingest: IngestHandle::new(context.clone(), block_tx),
            console: ConsoleHandle::new(command_tx),
            context,
        })
    }
}

impl<C: ChainEngine + 'static> SyncNode<C> {
    /// Start the event loop on the tokio runtime.
    pub fn spawn(self) -> RunningNode<C> {
        RunningNode {
            handle: tokio::spawn(self.event_loop.run()),
            ingest: self.ingest,
            console: self.console,
            context: self.context,
        }
    }
}

pub struct RunningNode<C> {
    handle: JoinHandle<Result<C, NodeError>>,
    pub ingest: IngestHandle,
    pub console: ConsoleHandle,
    pub context: Arc<NodeContext>,
}

impl<C> RunningNode<C> {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the event loop to exit and return the closed engine. A
    /// panic inside the loop is re-raised here.
    pub async fn join(self) -> Result<C, NodeError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(NodeError::EventLoopStopped),
        }
    }
}

//! State shared between connection handlers, the event loop and the console.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use blocksync_chain::{BalanceFlag, ChainNode};
use blocksync_types::Timestamp;
use tracing::debug;

use crate::config::SyncConfig;
use crate::connection::{Connection, ConnectionRegistry, PenaltyReason};
use crate::counters::Counters;
use crate::inventory::InventoryTracker;
use crate::metrics::SyncMetrics;

/// Operator-facing side effects the pipeline triggers: redrawing the prompt
/// after a log burst, and an audible alert.
pub trait ConsoleHook: Send + Sync {
    fn refresh_prompt(&self);
    fn bell(&self);
}

/// Console hook for headless runs.
pub struct SilentConsole;

impl ConsoleHook for SilentConsole {
    fn refresh_prompt(&self) {}
    fn bell(&self) {}
}

/// The block the event loop last saw at the tip, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastAccepted {
    pub node: ChainNode,
    pub at: Timestamp,
}

pub struct NodeContext {
    pub config: SyncConfig,
    pub counters: Arc<Counters>,
    pub metrics: SyncMetrics,
    pub inventory: InventoryTracker,
    pub peers: ConnectionRegistry,
    pub balance: BalanceFlag,
    pub console: Arc<dyn ConsoleHook>,
    last_accepted: RwLock<LastAccepted>,
    busy: Mutex<String>,
}

impl NodeContext {
    pub fn new(
        config: SyncConfig,
        tip: ChainNode,
        balance: BalanceFlag,
        console: Arc<dyn ConsoleHook>,
    ) -> Self {
        let counters = Arc::new(Counters::new());
        let inventory = InventoryTracker::new(config.pending_capacity, counters.clone());
        let metrics = SyncMetrics::new();
        metrics.chain_height.set(tip.height as i64);
        Self {
            config,
            counters,
            metrics,
            inventory,
            peers: ConnectionRegistry::new(),
            balance,
            console,
            last_accepted: RwLock::new(LastAccepted {
                node: tip,
                at: tip.timestamp,
            }),
            busy: Mutex::new(String::new()),
        }
    }

    pub fn last_accepted(&self) -> LastAccepted {
        *self
            .last_accepted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_last_accepted(&self, node: ChainNode) {
        *self
            .last_accepted
            .write()
            .unwrap_or_else(PoisonError::into_inner) = LastAccepted {
            node,
            at: Timestamp::now(),
        };
    }

    /// What the event loop is doing right now; empty while it waits.
    pub fn busy(&self) -> String {
        self.busy.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_busy(&self, what: impl Into<String>) {
        *self.busy.lock().unwrap_or_else(PoisonError::into_inner) = what.into();
    }

    pub fn clear_busy(&self) {
        self.busy.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn penalize(&self, conn: &dyn Connection, reason: PenaltyReason) {
        debug!(peer = conn.peer_id(), %reason, "penalizing peer");
        conn.apply_penalty(reason);
        self.metrics.penalties.inc();
    }

    /// Refresh the gauges derived from the inventory tracker.
    pub fn refresh_inventory_gauges(&self) {
        self.metrics
            .pending_blocks
            .set(self.inventory.pending_len() as i64);
        self.metrics
            .received_blocks
            .set(self.inventory.received_len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nullables::NullConnection;
    use blocksync_types::BlockHash;

    fn context() -> NodeContext {
        let tip = ChainNode {
            hash: BlockHash::new([1; 32]),
            height: 3,
            timestamp: Timestamp::new(100),
        };
        NodeContext::new(
            SyncConfig::default(),
            tip,
            BalanceFlag::new(),
            Arc::new(SilentConsole),
        )
    }

    #[test]
    fn starts_from_the_given_tip() {
        let ctx = context();
        let last = ctx.last_accepted();
        assert_eq!(last.node.height, 3);
        assert_eq!(last.at, Timestamp::new(100));
        assert_eq!(ctx.metrics.chain_height.get(), 3);
    }

    #[test]
    fn busy_marker_set_and_cleared() {
        let ctx = context();
        ctx.set_busy("CheckBlock");
        assert_eq!(ctx.busy(), "CheckBlock");
        ctx.clear_busy();
        assert!(ctx.busy().is_empty());
    }

    #[test]
    fn penalize_reaches_connection_and_metrics() {
        let ctx = context();
        let peer = NullConnection::new("p");
        ctx.penalize(peer.as_ref(), PenaltyReason::InvalidBlock);
        assert_eq!(peer.penalties(), vec![PenaltyReason::InvalidBlock]);
        assert_eq!(ctx.metrics.penalties.get(), 1);
    }
}

//! The connection seam.
//!
//! Wire protocol, handshakes and peer discovery live outside this crate. A
//! connection handler hands payloads to [`IngestHandle`](crate::IngestHandle)
//! and exposes itself through [`Connection`] so the pipeline can penalize,
//! relay to, and clear request markers on it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use blocksync_types::BlockHash;
use tracing::trace;

use crate::NodeError;

/// Why a connection is being penalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PenaltyReason {
    /// The payload could not be parsed as a block.
    MalformedBlock,
    /// The chain engine rejected the block for a reason the sender is
    /// responsible for.
    InvalidBlock,
    /// The chain engine accepted the check but failed to apply the block.
    AcceptFailed,
}

impl PenaltyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedBlock => "malformed_block",
            Self::InvalidBlock => "invalid_block",
            Self::AcceptFailed => "accept_failed",
        }
    }
}

impl fmt::Display for PenaltyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live peer connection as seen by the sync pipeline.
pub trait Connection: Send + Sync {
    fn peer_id(&self) -> &str;

    /// Lower this peer's standing. Disconnect policy is the network layer's.
    fn apply_penalty(&self, reason: PenaltyReason);

    /// Clear the "block requested" marker if it matches `hash`. Returns
    /// `false` when this connection never asked for the block.
    fn clear_requested(&self, hash: &BlockHash) -> bool;

    /// Announce `hash` to the peer.
    fn relay_inventory(&self, hash: &BlockHash);
}

/// Connections eligible for relaying fresh blocks, keyed by peer id.
#[derive(Default)]
pub struct ConnectionRegistry {
    peers: RwLock<HashMap<String, Arc<dyn Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any previous one with the same id.
    pub fn register(&self, conn: Arc<dyn Connection>) -> Option<Arc<dyn Connection>> {
        let id = conn.peer_id().to_string();
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, conn)
    }

    pub fn unregister(&self, peer_id: &str) -> Option<Arc<dyn Connection>> {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Announce `hash` to every connection except `origin`. Returns the
    /// number of peers reached.
    pub fn relay_except(&self, hash: &BlockHash, origin: &str) -> usize {
        // Snapshot first so a slow peer never holds the registry lock.
        let targets: Vec<Arc<dyn Connection>> = self
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(id, _)| id.as_str() != origin)
            .map(|(_, conn)| conn.clone())
            .collect();
        for conn in &targets {
            trace!(peer = conn.peer_id(), hash = %hash.short(), "relaying inventory");
            conn.relay_inventory(hash);
        }
        targets.len()
    }
}

/// Persistent peer address book, closed once the event loop stops.
pub trait PeerDatabase: Send {
    fn close(&mut self) -> Result<(), NodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nullables::NullConnection;

    #[test]
    fn relay_skips_the_origin() {
        let registry = ConnectionRegistry::new();
        let a = NullConnection::new("a");
        let b = NullConnection::new("b");
        let c = NullConnection::new("c");
        registry.register(a.clone());
        registry.register(b.clone());
        registry.register(c.clone());

        let hash = BlockHash::new([7; 32]);
        assert_eq!(registry.relay_except(&hash, "a"), 2);
        assert!(a.relayed().is_empty());
        assert_eq!(b.relayed(), vec![hash]);
        assert_eq!(c.relayed(), vec![hash]);
    }

    #[test]
    fn register_replaces_and_unregister_removes() {
        let registry = ConnectionRegistry::new();
        assert!(registry.register(NullConnection::new("a")).is_none());
        assert!(registry.register(NullConnection::new("a")).is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister("a").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn penalty_reasons_have_stable_names() {
        assert_eq!(PenaltyReason::MalformedBlock.to_string(), "malformed_block");
        assert_eq!(PenaltyReason::AcceptFailed.as_str(), "accept_failed");
    }
}

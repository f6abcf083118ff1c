//! Nullable collaborators for deterministic testing.
//!
//! Each stand-in records what the pipeline did to it instead of touching a
//! socket or a terminal, so tests can assert on penalties, relays and
//! console alerts.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use blocksync_types::BlockHash;

use crate::connection::{Connection, PenaltyReason, PeerDatabase};
use crate::context::ConsoleHook;
use crate::NodeError;

/// A connection that records penalties and relays.
pub struct NullConnection {
    id: String,
    requested: Mutex<HashSet<BlockHash>>,
    penalties: Mutex<Vec<PenaltyReason>>,
    relayed: Mutex<Vec<BlockHash>>,
}

impl NullConnection {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            requested: Mutex::new(HashSet::new()),
            penalties: Mutex::new(Vec::new()),
            relayed: Mutex::new(Vec::new()),
        })
    }

    /// Mark `hash` as requested from this peer.
    pub fn request(&self, hash: BlockHash) {
        self.requested.lock().unwrap().insert(hash);
    }

    pub fn is_requested(&self, hash: &BlockHash) -> bool {
        self.requested.lock().unwrap().contains(hash)
    }

    pub fn penalties(&self) -> Vec<PenaltyReason> {
        self.penalties.lock().unwrap().clone()
    }

    pub fn relayed(&self) -> Vec<BlockHash> {
        self.relayed.lock().unwrap().clone()
    }
}

impl Connection for NullConnection {
    fn peer_id(&self) -> &str {
        &self.id
    }

    fn apply_penalty(&self, reason: PenaltyReason) {
        self.penalties.lock().unwrap().push(reason);
    }

    fn clear_requested(&self, hash: &BlockHash) -> bool {
        self.requested.lock().unwrap().remove(hash)
    }

    fn relay_inventory(&self, hash: &BlockHash) {
        self.relayed.lock().unwrap().push(*hash);
    }
}

/// A console that counts alerts.
#[derive(Default)]
pub struct NullConsole {
    bells: AtomicUsize,
    refreshes: AtomicUsize,
}

impl NullConsole {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn bells(&self) -> usize {
        self.bells.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl ConsoleHook for NullConsole {
    fn refresh_prompt(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }

    fn bell(&self) {
        self.bells.fetch_add(1, Ordering::SeqCst);
    }
}

/// A peer database that only remembers whether it was closed. Clones share
/// the flag, so a test can keep one and hand the other to the event loop.
#[derive(Clone, Default)]
pub struct NullPeerDatabase {
    closed: Arc<AtomicBool>,
}

impl NullPeerDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PeerDatabase for NullPeerDatabase {
    fn close(&mut self) -> Result<(), NodeError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

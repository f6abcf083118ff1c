//! Inventory tracking: which announced blocks are still wanted, and which
//! blocks have already been received.
//!
//! Two structures share one lock:
//!
//! * the **pending set** with its FIFO fetch queue, holding hashes peers
//!   announced that we have not yet received, bounded by
//!   `pending_capacity`;
//! * the **dedup ledger**, mapping every hash ever fully received (or seeded
//!   from the chain index at startup) to the time it first arrived. It is
//!   never pruned.
//!
//! A hash is never in both at once. Observing otherwise means the tracker is
//! corrupt and the process aborts.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use blocksync_types::BlockHash;
use tracing::{debug, error, trace};

use crate::counters::{self, Counters};

/// Result of a peer announcing that it has a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Announcement {
    /// Newly pending; the caller should schedule a fetch.
    Wanted,
    AlreadyPending,
    AlreadyReceived,
    /// The pending set is at capacity; the announcement is dropped.
    QueueFull,
}

impl Announcement {
    pub fn needs_fetch(self) -> bool {
        matches!(self, Self::Wanted)
    }
}

/// Result of recording a fully received block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    Fresh,
    Duplicate,
}

#[derive(Default)]
struct InventoryState {
    pending: HashSet<BlockHash>,
    fetch_queue: VecDeque<BlockHash>,
    received: HashMap<BlockHash, SystemTime>,
}

pub struct InventoryTracker {
    state: Mutex<InventoryState>,
    pending_capacity: usize,
    counters: Arc<Counters>,
}

impl InventoryTracker {
    pub fn new(pending_capacity: usize, counters: Arc<Counters>) -> Self {
        Self {
            state: Mutex::new(InventoryState::default()),
            pending_capacity,
            counters,
        }
    }

    fn state(&self) -> MutexGuard<'_, InventoryState> {
        // Poisoned only by a consistency panic; nobody may carry on after that.
        self.state
            .lock()
            .expect("inventory tracker poisoned by a consistency failure")
    }

    /// Record hashes the chain already holds, so they are never fetched or
    /// queued again. Returns how many were new to the ledger.
    pub fn seed_received(&self, hashes: impl IntoIterator<Item = BlockHash>) -> usize {
        let now = SystemTime::now();
        let mut state = self.state();
        let before = state.received.len();
        for hash in hashes {
            state.pending.remove(&hash);
            state.received.entry(hash).or_insert(now);
        }
        state.received.len() - before
    }

    /// A peer announced `hash`.
    pub fn notify_inventory(&self, hash: BlockHash) -> Announcement {
        let outcome = {
            let mut state = self.state();
            if state.pending.contains(&hash) {
                Announcement::AlreadyPending
            } else if state.received.contains_key(&hash) {
                Announcement::AlreadyReceived
            } else if state.fetch_queue.len() >= self.pending_capacity {
                Announcement::QueueFull
            } else {
                state.pending.insert(hash);
                state.fetch_queue.push_back(hash);
                Announcement::Wanted
            }
        };
        self.counters.count(match outcome {
            Announcement::Wanted => counters::INV_FOR_WANTED,
            Announcement::AlreadyPending => counters::INV_FOR_PENDING,
            Announcement::AlreadyReceived => counters::INV_FOR_RECEIVED,
            Announcement::QueueFull => counters::INV_QUEUE_FULL,
        });
        trace!(hash = %hash.short(), ?outcome, "inventory announced");
        outcome
    }

    /// Whether a block is still worth requesting: true unless it was
    /// already received. Pending membership is not consulted, so a hash
    /// handed out by `next_fetch_target` stays wanted.
    pub fn is_wanted(&self, hash: &BlockHash) -> bool {
        let wanted = !self.state().received.contains_key(hash);
        if !wanted {
            self.counters.count(counters::BLOCK_NOT_WANTED);
        }
        wanted
    }

    /// Oldest pending hash still worth fetching.
    ///
    /// Entries that were received in the meantime are dropped from both the
    /// queue and the pending set. A queued entry that is neither received
    /// nor in the pending set is dropped and counted as an inconsistency.
    /// The returned hash is rotated to the back of the queue and stays
    /// pending until received.
    pub fn next_fetch_target(&self) -> Option<BlockHash> {
        let mut satisfied = 0u64;
        let mut inconsistent = 0u64;
        let target = {
            let mut state = self.state();
            loop {
                let Some(hash) = state.fetch_queue.pop_front() else {
                    break None;
                };
                if state.received.contains_key(&hash) {
                    state.pending.remove(&hash);
                    satisfied += 1;
                } else if state.pending.contains(&hash) {
                    state.fetch_queue.push_back(hash);
                    break Some(hash);
                } else {
                    inconsistent += 1;
                }
            }
        };
        if satisfied > 0 {
            self.counters.add(counters::FETCH_ALREADY_RECEIVED, satisfied);
        }
        if inconsistent > 0 {
            debug!(inconsistent, "dropped fetch queue entries with no pending record");
            self.counters.add(counters::PENDING_INCONSISTENT, inconsistent);
        }
        target
    }

    /// Record that a complete block arrived. The first receipt moves the
    /// hash out of the pending set and into the ledger; every later one is a
    /// duplicate.
    ///
    /// # Panics
    ///
    /// Panics if the hash is found in both the pending set and the ledger.
    pub fn mark_received(&self, hash: BlockHash) -> Receipt {
        let receipt = {
            let mut state = self.state();
            if state.received.contains_key(&hash) {
                if state.pending.contains(&hash) {
                    error!(hash = %hash, "block is both pending and received");
                    panic!("inventory corrupted: {hash} is both pending and received");
                }
                Receipt::Duplicate
            } else {
                state.received.insert(hash, SystemTime::now());
                state.pending.remove(&hash);
                Receipt::Fresh
            }
        };
        if receipt == Receipt::Duplicate {
            self.counters.count(counters::SAME_BLOCK_RECEIVED);
        }
        receipt
    }

    pub fn is_pending(&self, hash: &BlockHash) -> bool {
        self.state().pending.contains(hash)
    }

    pub fn is_received(&self, hash: &BlockHash) -> bool {
        self.state().received.contains_key(hash)
    }

    pub fn received_at(&self, hash: &BlockHash) -> Option<SystemTime> {
        self.state().received.get(hash).copied()
    }

    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn fetch_queue_len(&self) -> usize {
        self.state().fetch_queue.len()
    }

    pub fn received_len(&self) -> usize {
        self.state().received.len()
    }

    #[cfg(test)]
    fn corrupt_for_test(&self, hash: BlockHash) {
        let mut state = self.state();
        state.pending.insert(hash);
        state.received.insert(hash, SystemTime::now());
    }

    #[cfg(test)]
    fn orphan_queue_entry_for_test(&self, hash: BlockHash) {
        self.state().fetch_queue.push_back(hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn h(n: u8) -> BlockHash {
        BlockHash::new([n; 32])
    }

    fn tracker(capacity: usize) -> (InventoryTracker, Arc<Counters>) {
        let counters = Arc::new(Counters::new());
        (InventoryTracker::new(capacity, counters.clone()), counters)
    }

    #[test]
    fn announcement_of_unknown_hash_is_wanted() {
        let (inv, counters) = tracker(10);
        assert_eq!(inv.notify_inventory(h(1)), Announcement::Wanted);
        assert!(inv.is_pending(&h(1)));
        assert_eq!(inv.fetch_queue_len(), 1);
        assert_eq!(counters.get(counters::INV_FOR_WANTED), 1);
    }

    #[test]
    fn repeated_announcement_is_not_queued_twice() {
        let (inv, counters) = tracker(10);
        inv.notify_inventory(h(1));
        assert_eq!(inv.notify_inventory(h(1)), Announcement::AlreadyPending);
        assert_eq!(inv.fetch_queue_len(), 1);
        assert_eq!(counters.get(counters::INV_FOR_PENDING), 1);
    }

    #[test]
    fn announcement_of_received_hash_is_ignored() {
        let (inv, _) = tracker(10);
        inv.mark_received(h(1));
        assert_eq!(inv.notify_inventory(h(1)), Announcement::AlreadyReceived);
        assert!(!inv.is_pending(&h(1)));
    }

    #[test]
    fn full_queue_drops_announcements() {
        let (inv, counters) = tracker(2);
        assert!(inv.notify_inventory(h(1)).needs_fetch());
        assert!(inv.notify_inventory(h(2)).needs_fetch());
        assert_eq!(inv.notify_inventory(h(3)), Announcement::QueueFull);
        assert!(!inv.is_pending(&h(3)));
        assert_eq!(counters.get(counters::INV_QUEUE_FULL), 1);
    }

    #[test]
    fn capacity_frees_only_after_fetch_queue_prunes() {
        let (inv, _) = tracker(2);
        inv.notify_inventory(h(1));
        inv.notify_inventory(h(2));
        assert_eq!(inv.notify_inventory(h(3)), Announcement::QueueFull);

        inv.mark_received(h(1));
        // h(1) is still queued until a fetch pass drops it.
        assert_eq!(inv.notify_inventory(h(3)), Announcement::QueueFull);
        assert_eq!(inv.next_fetch_target(), Some(h(2)));
        assert_eq!(inv.notify_inventory(h(3)), Announcement::Wanted);
    }

    #[test]
    fn is_wanted_only_checks_received() {
        let (inv, counters) = tracker(10);
        assert!(inv.is_wanted(&h(1)));
        inv.notify_inventory(h(1));
        assert_eq!(inv.next_fetch_target(), Some(h(1)));
        assert!(inv.is_pending(&h(1)));
        assert!(inv.is_wanted(&h(1)));
        assert_eq!(counters.get(counters::BLOCK_NOT_WANTED), 0);

        inv.mark_received(h(1));
        assert!(!inv.is_wanted(&h(1)));
        inv.mark_received(h(2));
        assert!(!inv.is_wanted(&h(2)));
        assert_eq!(counters.get(counters::BLOCK_NOT_WANTED), 2);
    }

    #[test]
    fn queued_entry_without_pending_record_is_dropped() {
        let (inv, counters) = tracker(10);
        inv.orphan_queue_entry_for_test(h(3));
        inv.notify_inventory(h(4));

        assert_eq!(inv.next_fetch_target(), Some(h(4)));
        assert_eq!(inv.fetch_queue_len(), 1);
        assert_eq!(counters.get(counters::PENDING_INCONSISTENT), 1);
        assert!(inv.is_wanted(&h(3)));
    }

    #[test]
    fn concurrent_receipts_of_one_hash_yield_a_single_fresh() {
        const THREADS: usize = 8;
        let (inv, counters) = tracker(10);
        inv.notify_inventory(h(7));

        let receipts: Vec<Receipt> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| s.spawn(|| inv.mark_received(h(7))))
                .collect();
            handles.into_iter().map(|t| t.join().unwrap()).collect()
        });

        let fresh = receipts.iter().filter(|r| **r == Receipt::Fresh).count();
        assert_eq!(fresh, 1);
        assert_eq!(receipts.len() - fresh, THREADS - 1);
        assert_eq!(
            counters.get(counters::SAME_BLOCK_RECEIVED),
            (THREADS - 1) as u64
        );
        assert!(!inv.is_pending(&h(7)));
        assert!(inv.is_received(&h(7)));
    }

    #[test]
    fn fetch_target_rotates_and_skips_received() {
        let (inv, counters) = tracker(10);
        inv.notify_inventory(h(1));
        inv.notify_inventory(h(2));
        inv.notify_inventory(h(3));

        assert_eq!(inv.next_fetch_target(), Some(h(1)));
        assert_eq!(inv.next_fetch_target(), Some(h(2)));

        inv.mark_received(h(3));
        inv.mark_received(h(1));
        assert_eq!(inv.next_fetch_target(), Some(h(2)));
        assert_eq!(inv.pending_len(), 1);
        assert_eq!(counters.get(counters::FETCH_ALREADY_RECEIVED), 2);
    }

    #[test]
    fn fetch_target_on_empty_queue_is_none() {
        let (inv, _) = tracker(10);
        assert_eq!(inv.next_fetch_target(), None);
    }

    #[test]
    fn announce_receive_then_fetch_scenario() {
        let (inv, counters) = tracker(2);
        assert!(inv.notify_inventory(h(0xA)).needs_fetch());
        assert!(inv.notify_inventory(h(0xB)).needs_fetch());
        assert!(!inv.notify_inventory(h(0xC)).needs_fetch());

        assert_eq!(inv.mark_received(h(0xA)), Receipt::Fresh);
        assert_eq!(inv.next_fetch_target(), Some(h(0xB)));
        assert!(!inv.is_pending(&h(0xA)));
        assert!(inv.is_pending(&h(0xB)));

        assert_eq!(inv.mark_received(h(0xA)), Receipt::Duplicate);
        assert_eq!(counters.get(counters::SAME_BLOCK_RECEIVED), 1);
    }

    #[test]
    fn seeding_marks_hashes_received() {
        let (inv, _) = tracker(10);
        assert_eq!(inv.seed_received([h(1), h(2), h(2)]), 2);
        assert!(!inv.is_wanted(&h(1)));
        assert_eq!(inv.mark_received(h(2)), Receipt::Duplicate);
        assert!(inv.received_at(&h(1)).is_some());
    }

    #[test]
    #[should_panic(expected = "both pending and received")]
    fn receipt_of_corrupted_entry_aborts() {
        let (inv, _) = tracker(10);
        inv.corrupt_for_test(h(9));
        inv.mark_received(h(9));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Announce(u8),
        Receive(u8),
        Fetch,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..16).prop_map(Op::Announce),
            (0u8..16).prop_map(Op::Receive),
            Just(Op::Fetch),
        ]
    }

    proptest! {
        #[test]
        fn pending_and_received_stay_disjoint(ops in prop::collection::vec(op(), 0..200)) {
            let (inv, _) = tracker(8);
            for op in ops {
                match op {
                    Op::Announce(n) => { inv.notify_inventory(h(n)); }
                    Op::Receive(n) => { inv.mark_received(h(n)); }
                    Op::Fetch => {
                        if let Some(target) = inv.next_fetch_target() {
                            prop_assert!(inv.is_pending(&target));
                        }
                    }
                }
                prop_assert!(inv.fetch_queue_len() <= 8);
                for n in 0u8..16 {
                    prop_assert!(!(inv.is_pending(&h(n)) && inv.is_received(&h(n))));
                }
            }
        }
    }
}

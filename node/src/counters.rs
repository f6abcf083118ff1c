//! Named diagnostic counters.
//!
//! Cheap string-keyed tallies of pipeline events, shown by the `counters`
//! operator command. They sit behind their own lock so that bumping a
//! counter never contends with the inventory tracker.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const INV_FOR_WANTED: &str = "inv_for_wanted_block";
pub const INV_FOR_PENDING: &str = "inv_for_pending_block";
pub const INV_FOR_RECEIVED: &str = "inv_for_received_block";
pub const INV_QUEUE_FULL: &str = "inv_queue_full";
pub const BLOCK_NOT_WANTED: &str = "block_not_wanted";
pub const FETCH_ALREADY_RECEIVED: &str = "fetch_already_received";
pub const PENDING_INCONSISTENT: &str = "pending_inconsistent";

pub const MALFORMED_BLOCK: &str = "malformed_block";
pub const UNEXPECTED_BLOCK: &str = "unexpected_block_received";
pub const SAME_BLOCK_RECEIVED: &str = "same_block_received";
pub const NET_BLOCKS_GOT: &str = "net_blocks_got";

pub const BLOCKS_DEFERRED: &str = "blocks_deferred";
pub const BLOCKS_REJECTED: &str = "blocks_rejected";
pub const ACCEPT_FAILED: &str = "accept_failed";
pub const SLOW_ACCEPTS: &str = "slow_accepts";
pub const ORPHANED_BLOCKS: &str = "orphaned_blocks";
pub const DEEP_FORKS: &str = "deep_forks";
pub const MINED_BY_US: &str = "blocks_mined_by_us";

pub const CACHE_BLOCKS_EXPIRED: &str = "cache_blocks_expired";
pub const BLOCKS_FROM_CACHE: &str = "blocks_from_cache";
pub const CACHED_ACCEPT_FAILED: &str = "cached_blocks_accept_failed";
pub const BAD_CACHED_BLOCKS: &str = "bad_cached_blocks";
pub const CACHED_BLOCKS_DOS: &str = "cached_blocks_dos";

pub const MAIN_LOOP_ITERATIONS: &str = "main_loop_iterations";
pub const MAIN_LOOP_TIMEOUTS: &str = "main_loop_timeouts";
pub const UI_COMMANDS: &str = "ui_commands";

#[derive(Default)]
pub struct Counters {
    values: Mutex<BTreeMap<&'static str, u64>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic elsewhere must not take the diagnostics down with it.
    fn values(&self) -> MutexGuard<'_, BTreeMap<&'static str, u64>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn count(&self, name: &'static str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &'static str, n: u64) {
        *self.values().entry(name).or_insert(0) += n;
    }

    pub fn get(&self, name: &str) -> u64 {
        self.values().get(name).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        self.values().clone()
    }

    /// One `name: value` line per counter, sorted by name.
    pub fn render(&self) -> String {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return "no counters recorded yet".to_string();
        }
        let width = snapshot.keys().map(|k| k.len()).max().unwrap_or(0);
        let mut out = String::new();
        for (name, value) in snapshot {
            let _ = writeln!(out, "{name:<width$}  {value}");
        }
        out.pop();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_counter_reads_zero() {
        assert_eq!(Counters::new().get(DEEP_FORKS), 0);
    }

    #[test]
    fn count_and_add_accumulate() {
        let counters = Counters::new();
        counters.count(SAME_BLOCK_RECEIVED);
        counters.count(SAME_BLOCK_RECEIVED);
        counters.add(NET_BLOCKS_GOT, 5);
        assert_eq!(counters.get(SAME_BLOCK_RECEIVED), 2);
        assert_eq!(counters.get(NET_BLOCKS_GOT), 5);
    }

    #[test]
    fn render_is_sorted() {
        let counters = Counters::new();
        counters.count(UI_COMMANDS);
        counters.count(BLOCKS_DEFERRED);
        let text = counters.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(BLOCKS_DEFERRED));
        assert!(lines[1].starts_with(UI_COMMANDS));
    }

    #[test]
    fn counting_is_safe_across_threads() {
        let counters = std::sync::Arc::new(Counters::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = counters.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        c.count(MAIN_LOOP_ITERATIONS);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counters.get(MAIN_LOOP_ITERATIONS), 1000);
    }
}

//! Prometheus metrics for the sync pipeline.
//!
//! [`SyncMetrics`] owns a dedicated [`Registry`]; the operator `metrics`
//! command encodes it in the Prometheus text exposition format.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};

use crate::NodeError;

pub struct SyncMetrics {
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Blocks that passed the dedup gate and entered the ingestion queue.
    pub blocks_received: IntCounter,
    /// Blocks the chain engine accepted, directly or from the cache.
    pub blocks_accepted: IntCounter,
    /// Blocks placed in the deferred cache.
    pub blocks_deferred: IntCounter,
    /// Blocks rejected for good.
    pub blocks_rejected: IntCounter,
    pub penalties: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    pub pending_blocks: IntGauge,
    pub received_blocks: IntGauge,
    pub cached_blocks: IntGauge,
    pub chain_height: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Wall time of a single chain acceptance, in milliseconds.
    pub accept_time_ms: Histogram,
}

impl SyncMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let blocks_received = register_int_counter_with_registry!(
            Opts::new(
                "blocksync_blocks_received_total",
                "Blocks admitted to the ingestion queue"
            ),
            registry
        )
        .expect("failed to register blocks_received counter");

        let blocks_accepted = register_int_counter_with_registry!(
            Opts::new(
                "blocksync_blocks_accepted_total",
                "Blocks accepted into the chain"
            ),
            registry
        )
        .expect("failed to register blocks_accepted counter");

        let blocks_deferred = register_int_counter_with_registry!(
            Opts::new(
                "blocksync_blocks_deferred_total",
                "Blocks placed in the deferred cache"
            ),
            registry
        )
        .expect("failed to register blocks_deferred counter");

        let blocks_rejected = register_int_counter_with_registry!(
            Opts::new(
                "blocksync_blocks_rejected_total",
                "Blocks rejected by the chain engine"
            ),
            registry
        )
        .expect("failed to register blocks_rejected counter");

        let penalties = register_int_counter_with_registry!(
            Opts::new(
                "blocksync_peer_penalties_total",
                "Penalties applied to delivering connections"
            ),
            registry
        )
        .expect("failed to register penalties counter");

        let pending_blocks = register_int_gauge_with_registry!(
            Opts::new(
                "blocksync_pending_blocks",
                "Announced blocks waiting to be fetched"
            ),
            registry
        )
        .expect("failed to register pending_blocks gauge");

        let received_blocks = register_int_gauge_with_registry!(
            Opts::new(
                "blocksync_received_blocks",
                "Entries in the dedup ledger"
            ),
            registry
        )
        .expect("failed to register received_blocks gauge");

        let cached_blocks = register_int_gauge_with_registry!(
            Opts::new(
                "blocksync_cached_blocks",
                "Blocks held in the deferred cache"
            ),
            registry
        )
        .expect("failed to register cached_blocks gauge");

        let chain_height = register_int_gauge_with_registry!(
            Opts::new("blocksync_chain_height", "Height of the chain tip"),
            registry
        )
        .expect("failed to register chain_height gauge");

        // 0.1 ms up to roughly 3 s.
        let accept_time_ms = register_histogram_with_registry!(
            HistogramOpts::new(
                "blocksync_accept_time_ms",
                "Chain acceptance time in milliseconds"
            )
            .buckets(
                prometheus::exponential_buckets(0.1, 2.0, 16)
                    .expect("static bucket layout is valid")
            ),
            registry
        )
        .expect("failed to register accept_time_ms histogram");

        Self {
            registry,
            blocks_received,
            blocks_accepted,
            blocks_deferred,
            blocks_rejected,
            penalties,
            pending_blocks,
            received_blocks,
            cached_blocks,
            chain_height,
            accept_time_ms,
        }
    }

    /// Encode every registered metric in the text exposition format.
    pub fn render(&self) -> Result<String, NodeError> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|e| NodeError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| NodeError::Metrics(e.to_string()))
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

//! Span constructors shared across the sync pipeline, so block, retry and
//! command traces carry the same names and fields everywhere.

use blocksync_types::BlockHash;
use tracing::{debug_span, info_span, Span};

/// Span covering check and acceptance of one block taken off the queue.
pub fn block_span(hash: &BlockHash) -> Span {
    info_span!("block", hash = %hash.short())
}

/// Span covering one pass over the deferred cache.
pub fn retry_span(cached: usize) -> Span {
    debug_span!("cache_retry", cached)
}

/// Span covering a single operator command.
pub fn command_span(command: &str) -> Span {
    info_span!("command", command = %command)
}

/// Span covering admission of a payload delivered by a connection.
pub fn ingest_span(peer: &str) -> Span {
    debug_span!("ingest", peer = %peer)
}

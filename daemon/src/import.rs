//! Block import from a directory of encoded block files.
//!
//! Files are fed in name order through the same ingestion path network
//! connections use, from a local pseudo-connection, so dedup, deferral and
//! retry all apply.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use blocksync_node::{Connection, IngestHandle, IngestOutcome, PenaltyReason};
use blocksync_types::BlockHash;

pub const IMPORT_PEER_ID: &str = "import";

/// The importer's stand-in for a peer. Everything it delivers counts as
/// requested, and penalties are only logged.
#[derive(Default)]
pub struct ImportConnection {
    penalties: AtomicUsize,
}

impl ImportConnection {
    pub fn penalties(&self) -> usize {
        self.penalties.load(Ordering::Relaxed)
    }
}

impl Connection for ImportConnection {
    fn peer_id(&self) -> &str {
        IMPORT_PEER_ID
    }

    fn apply_penalty(&self, reason: PenaltyReason) {
        self.penalties.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(%reason, "imported block was refused");
    }

    fn clear_requested(&self, _hash: &BlockHash) -> bool {
        true
    }

    fn relay_inventory(&self, _hash: &BlockHash) {}
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub files: usize,
    pub queued: usize,
    pub duplicates: usize,
    pub malformed: usize,
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files: {} queued, {} duplicates, {} malformed",
            self.files, self.queued, self.duplicates, self.malformed
        )
    }
}

/// Feed every regular file in `dir`, sorted by name. Stops early if the
/// event loop goes away.
pub async fn feed_directory(ingest: &IngestHandle, dir: &Path) -> anyhow::Result<ImportSummary> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("cannot read import directory {}", dir.display()))?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            paths.push(entry.path());
        }
    }
    paths.sort();

    let origin: Arc<dyn Connection> = Arc::new(ImportConnection::default());
    let mut summary = ImportSummary::default();
    for path in paths {
        let raw = tokio::fs::read(&path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        summary.files += 1;
        match ingest.block_received(origin.clone(), &raw).await {
            IngestOutcome::Queued => summary.queued += 1,
            IngestOutcome::Duplicate => summary.duplicates += 1,
            IngestOutcome::Malformed => {
                tracing::warn!(file = %path.display(), "not a block, skipped");
                summary.malformed += 1;
            }
            IngestOutcome::Closed => {
                tracing::info!("event loop stopped, import interrupted");
                break;
            }
        }
    }
    Ok(summary)
}

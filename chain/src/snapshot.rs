//! Chain snapshots: the on-disk form of the in-memory block tree.
//!
//! A snapshot lists every block in acceptance order so that replaying it
//! rebuilds the same tree and tip. The checksum is a Blake2b digest over the
//! encoded blocks, letting a truncated or corrupted file be detected before
//! any block is replayed.

use std::fs;
use std::path::Path;

use blocksync_types::{Block, BlockHash};
use serde::{Deserialize, Serialize};

use crate::error::ChainError;

pub const SNAPSHOT_VERSION: u32 = 1;

/// File name used inside the data directory.
pub const SNAPSHOT_FILE: &str = "chain.snapshot";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub version: u32,
    /// Encoded blocks in acceptance order; the first is genesis.
    pub blocks: Vec<Vec<u8>>,
    pub checksum: BlockHash,
}

impl ChainSnapshot {
    pub fn create<'a>(blocks: impl IntoIterator<Item = &'a Block>) -> Result<Self, ChainError> {
        let blocks = blocks
            .into_iter()
            .map(|b| b.to_bytes().map_err(|e| ChainError::Snapshot(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        let checksum = Self::compute_checksum(&blocks);
        Ok(Self {
            version: SNAPSHOT_VERSION,
            blocks,
            checksum,
        })
    }

    fn compute_checksum(blocks: &[Vec<u8>]) -> BlockHash {
        let parts: Vec<&[u8]> = blocks.iter().map(Vec::as_slice).collect();
        BlockHash::digest(&parts)
    }

    /// Decode the stored blocks after verifying version and checksum.
    pub fn into_blocks(self) -> Result<Vec<Block>, ChainError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(ChainError::Snapshot(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        if Self::compute_checksum(&self.blocks) != self.checksum {
            return Err(ChainError::Snapshot("checksum mismatch".into()));
        }
        self.blocks
            .iter()
            .map(|raw| Block::from_bytes(raw).map_err(|e| ChainError::Snapshot(e.to_string())))
            .collect()
    }

    /// Write atomically: a temp file next to `path`, then rename over it.
    pub fn write_to(&self, path: &Path) -> Result<(), ChainError> {
        let bytes = bincode::serialize(self).map_err(|e| ChainError::Snapshot(e.to_string()))?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read a snapshot; `Ok(None)` when no file exists yet.
    pub fn read_from(path: &Path) -> Result<Option<Self>, ChainError> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        let snapshot =
            bincode::deserialize(&bytes).map_err(|e| ChainError::Snapshot(e.to_string()))?;
        Ok(Some(snapshot))
    }
}

use std::fmt;

use blocksync_types::BlockHash;
use thiserror::Error;

/// Why the engine refused a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// The block is already part of the tree.
    AlreadyKnown,
    /// The parent has not been seen yet.
    ParentUnknown,
    /// The timestamp is too far ahead of the local clock.
    TimestampInFuture,
    /// The timestamp precedes the parent's.
    TimestampBeforeParent,
    /// The header does not commit to the body that came with it.
    BodyDigestMismatch,
    /// A second block claims to be a genesis block.
    UnexpectedGenesis,
    /// The coinbase pays nobody.
    EmptyPayee,
    /// Unknown header version.
    UnsupportedVersion,
}

impl RejectReason {
    /// The block may become acceptable once earlier data arrives.
    pub fn is_deferrable(self) -> bool {
        matches!(self, Self::ParentUnknown | Self::TimestampInFuture)
    }

    /// The sending peer is to blame for the block.
    pub fn is_attributable(self) -> bool {
        matches!(
            self,
            Self::TimestampBeforeParent
                | Self::BodyDigestMismatch
                | Self::UnexpectedGenesis
                | Self::EmptyPayee
                | Self::UnsupportedVersion
        )
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AlreadyKnown => "already known",
            Self::ParentUnknown => "parent unknown",
            Self::TimestampInFuture => "timestamp in the future",
            Self::TimestampBeforeParent => "timestamp before parent",
            Self::BodyDigestMismatch => "body digest mismatch",
            Self::UnexpectedGenesis => "unexpected genesis",
            Self::EmptyPayee => "empty coinbase payee",
            Self::UnsupportedVersion => "unsupported version",
        };
        f.write_str(s)
    }
}

/// Outcome of a failed structural/consensus check.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("block {hash} rejected: {reason}")]
pub struct BlockRejection {
    pub hash: BlockHash,
    pub reason: RejectReason,
}

impl BlockRejection {
    pub fn new(hash: BlockHash, reason: RejectReason) -> Self {
        Self { hash, reason }
    }

    pub fn is_deferrable(&self) -> bool {
        self.reason.is_deferrable()
    }

    pub fn is_attributable(&self) -> bool {
        self.reason.is_attributable()
    }
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Rejected(#[from] BlockRejection),

    #[error("chain engine is closed")]
    Closed,

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

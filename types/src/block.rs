//! Block structure and the wire codec used between connections and the core.
//!
//! A block's identity is the Blake2b-256 digest of its header. The header
//! commits to the body (coinbase + payload) through `body_digest`, so a peer
//! that tampers with the body produces a block that fails the chain engine's
//! structural check rather than a different identifier.

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::hash::BlockHash;
use crate::time::Timestamp;

/// Header version produced by [`BlockBuilder`].
pub const CURRENT_BLOCK_VERSION: u32 = 1;

/// Largest encoded block accepted from the wire.
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_BLOCK_SIZE as u64)
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    /// Hash of the parent block (zero only for genesis).
    pub parent: BlockHash,
    /// Claimed mining time.
    pub timestamp: Timestamp,
    /// Commitment to the coinbase and payload.
    pub body_digest: BlockHash,
    pub nonce: u64,
}

/// The block reward output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coinbase {
    /// Address credited with the reward.
    pub payee: String,
    /// Reward in base units (1e-8 of a coin).
    pub value: u64,
    /// Free-form miner tag, used for mined-by alerts.
    pub tag: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub coinbase: Coinbase,
    pub payload: Vec<u8>,
    #[serde(skip)]
    hash: BlockHash,
}

impl Block {
    /// Parse a raw wire payload into a block and compute its identifier.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, TypesError> {
        if raw.is_empty() {
            return Err(TypesError::EmptyPayload);
        }
        if raw.len() > MAX_BLOCK_SIZE {
            return Err(TypesError::Oversized {
                size: raw.len(),
                limit: MAX_BLOCK_SIZE,
            });
        }
        let mut block: Block = codec()
            .deserialize(raw)
            .map_err(|e| TypesError::Decode(e.to_string()))?;
        block.seal();
        Ok(block)
    }

    /// Encode the block for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        codec()
            .serialize(self)
            .map_err(|e| TypesError::Encode(e.to_string()))
    }

    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    pub fn parent(&self) -> BlockHash {
        self.header.parent
    }

    pub fn timestamp(&self) -> Timestamp {
        self.header.timestamp
    }

    /// Recompute the cached identifier after editing the header.
    pub fn seal(&mut self) {
        self.hash = header_hash(&self.header);
    }

    /// Digest of the body as it currently stands. A valid block has
    /// `compute_body_digest() == header.body_digest`.
    pub fn compute_body_digest(&self) -> BlockHash {
        body_digest(&self.coinbase, &self.payload)
    }

    /// Whether the coinbase tag carries the given miner identity.
    pub fn mined_by(&self, miner_id: &str) -> bool {
        !miner_id.is_empty() && self.coinbase.tag.contains(miner_id)
    }
}

fn header_hash(header: &BlockHeader) -> BlockHash {
    BlockHash::digest(&[
        &header.version.to_le_bytes(),
        header.parent.as_bytes(),
        &header.timestamp.as_secs().to_le_bytes(),
        header.body_digest.as_bytes(),
        &header.nonce.to_le_bytes(),
    ])
}

fn body_digest(coinbase: &Coinbase, payload: &[u8]) -> BlockHash {
    BlockHash::digest(&[
        &(coinbase.payee.len() as u64).to_le_bytes(),
        coinbase.payee.as_bytes(),
        &coinbase.value.to_le_bytes(),
        &(coinbase.tag.len() as u64).to_le_bytes(),
        coinbase.tag.as_bytes(),
        payload,
    ])
}

/// Builds well-formed blocks: the body digest and identifier are filled in
/// by [`BlockBuilder::build`].
#[derive(Clone, Debug)]
pub struct BlockBuilder {
    parent: BlockHash,
    timestamp: Timestamp,
    nonce: u64,
    coinbase: Coinbase,
    payload: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(parent: BlockHash) -> Self {
        Self {
            parent,
            timestamp: Timestamp::now(),
            nonce: 0,
            coinbase: Coinbase {
                payee: "unassigned".to_string(),
                value: 50 * 100_000_000,
                tag: String::new(),
            },
            payload: Vec::new(),
        }
    }

    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn payee(mut self, payee: impl Into<String>) -> Self {
        self.coinbase.payee = payee.into();
        self
    }

    pub fn value(mut self, value: u64) -> Self {
        self.coinbase.value = value;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.coinbase.tag = tag.into();
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Block {
        let header = BlockHeader {
            version: CURRENT_BLOCK_VERSION,
            parent: self.parent,
            timestamp: self.timestamp,
            body_digest: body_digest(&self.coinbase, &self.payload),
            nonce: self.nonce,
        };
        let mut block = Block {
            header,
            coinbase: self.coinbase,
            payload: self.payload,
            hash: BlockHash::ZERO,
        };
        block.seal();
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Block {
        BlockBuilder::new(BlockHash::new([1; 32]))
            .timestamp(Timestamp::new(1_000))
            .payee("addr-a")
            .tag("/pool-x/")
            .payload(vec![9, 9, 9])
            .build()
    }

    #[test]
    fn decode_recomputes_identifier() {
        let block = sample();
        let raw = block.to_bytes().unwrap();
        let decoded = Block::from_bytes(&raw).unwrap();
        assert_eq!(decoded.hash(), block.hash());
        assert_eq!(decoded, block);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(Block::from_bytes(&[]), Err(TypesError::EmptyPayload)));
        assert!(matches!(
            Block::from_bytes(&[0xde, 0xad, 0xbe, 0xef]),
            Err(TypesError::Decode(_))
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut raw = sample().to_bytes().unwrap();
        raw.push(0);
        assert!(Block::from_bytes(&raw).is_err());
    }

    #[test]
    fn body_edit_breaks_digest_but_not_identity() {
        let mut block = sample();
        let id = block.hash();
        block.payload.push(1);
        assert_eq!(block.hash(), id);
        assert_ne!(block.compute_body_digest(), block.header.body_digest);
    }

    #[test]
    fn nonce_changes_identity() {
        let a = BlockBuilder::new(BlockHash::ZERO)
            .timestamp(Timestamp::new(5))
            .build();
        let b = BlockBuilder::new(BlockHash::ZERO)
            .timestamp(Timestamp::new(5))
            .nonce(1)
            .build();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn mined_by_matches_tag_substring() {
        let block = sample();
        assert!(block.mined_by("pool-x"));
        assert!(!block.mined_by("pool-y"));
        assert!(!block.mined_by(""));
    }
}

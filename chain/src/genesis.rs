//! The fixed genesis block every chain starts from.

use blocksync_types::{Block, BlockBuilder, BlockHash, Timestamp};

/// Genesis timestamp (2009-01-03T18:15:05Z).
pub const GENESIS_TIMESTAMP: u64 = 1_231_006_505;

pub fn genesis_block() -> Block {
    BlockBuilder::new(BlockHash::ZERO)
        .timestamp(Timestamp::new(GENESIS_TIMESTAMP))
        .payee("genesis")
        .tag("blocksync genesis")
        .build()
}

pub fn genesis_hash() -> BlockHash {
    genesis_block().hash()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_stable() {
        assert_eq!(genesis_hash(), genesis_hash());
        assert!(genesis_block().parent().is_zero());
    }
}

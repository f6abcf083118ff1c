//! Fundamental types for blocksync.
//!
//! This crate defines the types shared by every other crate in the workspace:
//! block identifiers, timestamps, and the block structure with its wire codec.

pub mod block;
pub mod error;
pub mod hash;
pub mod time;

pub use block::{Block, BlockBuilder, BlockHeader, Coinbase, CURRENT_BLOCK_VERSION, MAX_BLOCK_SIZE};
pub use error::TypesError;
pub use hash::BlockHash;
pub use time::Timestamp;

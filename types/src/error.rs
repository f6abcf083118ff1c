//! Errors raised while decoding wire data into core types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("block payload is empty")]
    EmptyPayload,

    #[error("block payload of {size} bytes exceeds the {limit} byte limit")]
    Oversized { size: usize, limit: usize },

    #[error("block decode failed: {0}")]
    Decode(String),

    #[error("block encode failed: {0}")]
    Encode(String),

    #[error("block hash must be 32 bytes, got {0}")]
    InvalidHashLength(usize),
}

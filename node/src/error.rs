use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("chain error: {0}")]
    Chain(#[from] blocksync_chain::ChainError),

    #[error("block decode error: {0}")]
    Decode(#[from] blocksync_types::TypesError),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("event loop has stopped")]
    EventLoopStopped,

    #[error("peer database error: {0}")]
    PeerDatabase(String),

    #[error("metrics error: {0}")]
    Metrics(String),

    #[error("logging error: {0}")]
    Logging(String),
}

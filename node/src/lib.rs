//! blocksync node core: moves candidate blocks from many concurrent
//! connections into a single chain engine.
//!
//! - [`IngestHandle`] runs on connection tasks: inventory bookkeeping,
//!   parsing, dedup and the bounded ingestion queue.
//! - [`EventLoop`] is the only owner of the [`ChainEngine`]; it checks,
//!   accepts or defers blocks and runs operator commands.
//! - [`DeferredCache`] holds blocks waiting on a missing prerequisite.
//! - [`Acceptor`] applies blocks and reacts to forks, fresh blocks and
//!   balance changes.
//!
//! [`ChainEngine`]: blocksync_chain::ChainEngine

pub mod acceptor;
pub mod commands;
pub mod config;
pub mod connection;
pub mod context;
pub mod counters;
pub mod deferred;
pub mod error;
pub mod event_loop;
pub mod ingest;
pub mod inventory;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod nullables;
pub mod shutdown;
pub mod tracing_spans;

pub use acceptor::{Acceptance, Acceptor};
pub use commands::{
    CommandContext, CommandHandler, CommandRegistry, ConsoleHandle, OperatorCommand,
};
pub use config::SyncConfig;
pub use connection::{Connection, ConnectionRegistry, PeerDatabase, PenaltyReason};
pub use context::{ConsoleHook, LastAccepted, NodeContext, SilentConsole};
pub use counters::Counters;
pub use deferred::{CachedBlock, DeferredCache};
pub use error::NodeError;
pub use event_loop::{BlockDisposition, Dispatch, EventLoop};
pub use ingest::{IngestEvent, IngestHandle, IngestOutcome};
pub use inventory::{Announcement, InventoryTracker, Receipt};
pub use logging::{init_logging, LogFormat};
pub use metrics::SyncMetrics;
pub use node::{RunningNode, SyncNode};
pub use shutdown::ShutdownController;

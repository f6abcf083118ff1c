//! Sync configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::logging::LogFormat;
use crate::NodeError;

/// Tunables for the synchronization core and the daemon around it.
///
/// Loaded from a TOML file via [`SyncConfig::from_toml_file`] or built
/// programmatically (tests mostly start from `SyncConfig::default()` and
/// shrink the capacities).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Data directory for the chain snapshot.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Maximum number of announced hashes waiting to be fetched.
    #[serde(default = "default_pending_capacity")]
    pub pending_capacity: usize,

    /// Maximum number of blocks held back for a missing parent or a
    /// future timestamp.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Bound of the queue between connection handlers and the event loop.
    #[serde(default = "default_ingest_queue_capacity")]
    pub ingest_queue_capacity: usize,

    /// No new fetch target is handed out once this many blocks are queued.
    #[serde(default = "default_fetch_window")]
    pub fetch_window: usize,

    /// Bound of the operator command queue.
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,

    /// Event loop idle tick, in milliseconds.
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,

    /// Blocks whose timestamp is younger than this are relayed and announced.
    #[serde(default = "default_fresh_block_window_secs")]
    pub fresh_block_window_secs: u64,

    /// Acceptances slower than this are reported.
    #[serde(default = "default_slow_accept_ms")]
    pub slow_accept_ms: u64,

    /// Ring the console bell for every fresh block.
    #[serde(default)]
    pub beep: bool,

    /// Coinbase tag identifying blocks mined by this operator.
    #[serde(default)]
    pub miner_id: Option<String>,

    /// Start with chain persistence enabled.
    #[serde(default = "default_true")]
    pub sync_enabled: bool,

    /// Payee addresses whose balance changes are announced.
    #[serde(default)]
    pub watch_addresses: Vec<String>,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./blocksync_data")
}

fn default_pending_capacity() -> usize {
    2000
}

fn default_cache_capacity() -> usize {
    600
}

fn default_ingest_queue_capacity() -> usize {
    300
}

fn default_fetch_window() -> usize {
    200
}

fn default_command_queue_capacity() -> usize {
    1
}

fn default_idle_interval_ms() -> u64 {
    1000
}

fn default_fresh_block_window_secs() -> u64 {
    600
}

fn default_slow_accept_ms() -> u64 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        let config: Self = toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Reject settings the event loop cannot run with.
    pub fn validate(&self) -> Result<(), NodeError> {
        let positive = [
            ("pending_capacity", self.pending_capacity),
            ("cache_capacity", self.cache_capacity),
            ("ingest_queue_capacity", self.ingest_queue_capacity),
            ("command_queue_capacity", self.command_queue_capacity),
            ("fetch_window", self.fetch_window),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(NodeError::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.fetch_window > self.ingest_queue_capacity {
            return Err(NodeError::Config(format!(
                "fetch_window ({}) exceeds ingest_queue_capacity ({})",
                self.fetch_window, self.ingest_queue_capacity
            )));
        }
        if self.idle_interval_ms == 0 {
            return Err(NodeError::Config(
                "idle_interval_ms must be greater than zero".into(),
            ));
        }
        self.log_format()?;
        Ok(())
    }

    pub fn log_format(&self) -> Result<LogFormat, NodeError> {
        self.log_format.parse()
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn slow_accept(&self) -> Duration {
        Duration::from_millis(self.slow_accept_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            pending_capacity: default_pending_capacity(),
            cache_capacity: default_cache_capacity(),
            ingest_queue_capacity: default_ingest_queue_capacity(),
            fetch_window: default_fetch_window(),
            command_queue_capacity: default_command_queue_capacity(),
            idle_interval_ms: default_idle_interval_ms(),
            fresh_block_window_secs: default_fresh_block_window_secs(),
            slow_accept_ms: default_slow_accept_ms(),
            beep: false,
            miner_id: None,
            sync_enabled: default_true(),
            watch_addresses: Vec::new(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = SyncConfig {
            miner_id: Some("rig-7".into()),
            watch_addresses: vec!["alice".into()],
            ..SyncConfig::default()
        };
        let toml_str = config.to_toml_string().unwrap();
        let parsed = SyncConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed.pending_capacity, config.pending_capacity);
        assert_eq!(parsed.miner_id.as_deref(), Some("rig-7"));
        assert_eq!(parsed.watch_addresses, vec!["alice".to_string()]);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = SyncConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.pending_capacity, 2000);
        assert_eq!(config.cache_capacity, 600);
        assert_eq!(config.ingest_queue_capacity, 300);
        assert_eq!(config.fetch_window, 200);
        assert_eq!(config.idle_interval(), Duration::from_secs(1));
        assert!(config.sync_enabled);
        assert!(!config.beep);
        assert_eq!(config.log_format, "human");
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            cache_capacity = 10
            beep = true
            sync_enabled = false
        "#;
        let config = SyncConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.cache_capacity, 10);
        assert!(config.beep);
        assert!(!config.sync_enabled);
        assert_eq!(config.pending_capacity, 2000); // default
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = SyncConfig::from_toml_str("pending_capacity = 0").unwrap_err();
        assert!(matches!(err, NodeError::Config(msg) if msg.contains("pending_capacity")));
    }

    #[test]
    fn fetch_window_larger_than_queue_is_rejected() {
        let config = SyncConfig {
            fetch_window: 500,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(SyncConfig::from_toml_str("log_format = \"xml\"").is_err());
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = SyncConfig::from_toml_file("/nonexistent/blocksync.toml");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }
}

//! blocksync daemon: opens the chain, runs the sync core, and attaches the
//! operator console and the block importer.

mod console;
mod import;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use blocksync_chain::{genesis_block, BalanceFlag, ChainEngine, MemoryChain, WatchList};
use blocksync_node::{
    init_logging, ConsoleHook, ShutdownController, SilentConsole, SyncConfig, SyncNode,
};
use clap::Parser;

#[derive(Parser)]
#[command(name = "blocksync-daemon", about = "Block synchronization node daemon")]
struct Cli {
    /// Data directory for the chain snapshot.
    #[arg(long, env = "BLOCKSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Path to a TOML configuration file. File settings are the base; CLI
    /// flags and env vars override them.
    #[arg(long, env = "BLOCKSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Start with disk sync disabled (re-enable with the `sync` command).
    #[arg(long)]
    nosync: bool,

    /// Ring the terminal bell for every fresh block.
    #[arg(long)]
    beep: bool,

    /// Coinbase tag identifying blocks mined by this operator.
    #[arg(long, env = "BLOCKSYNC_MINER")]
    miner: Option<String>,

    /// Addresses whose balance changes are announced (comma-separated).
    #[arg(long, value_delimiter = ',')]
    watch: Vec<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "BLOCKSYNC_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "BLOCKSYNC_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the node.
    Run {
        /// Feed every file in this directory through the ingestion path.
        #[arg(long)]
        import: Option<PathBuf>,

        /// Run without the interactive console.
        #[arg(long)]
        headless: bool,
    },
    /// Print the effective configuration as TOML and exit.
    Config,
}

fn build_config(cli: &Cli) -> anyhow::Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let path = path.to_string_lossy();
            SyncConfig::from_toml_file(&path)
                .with_context(|| format!("failed to load config file {path}"))?
        }
        None => SyncConfig::default(),
    };

    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if cli.nosync {
        config.sync_enabled = false;
    }
    if cli.beep {
        config.beep = true;
    }
    if let Some(miner) = &cli.miner {
        config.miner_id = Some(miner.clone());
    }
    if !cli.watch.is_empty() {
        config.watch_addresses = cli.watch.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.log_format = format.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Run { import, headless } => run(config, import, headless).await,
    }
}

async fn run(config: SyncConfig, import: Option<PathBuf>, headless: bool) -> anyhow::Result<()> {
    init_logging(config.log_format()?, &config.log_level)?;

    let balance = BalanceFlag::new();
    let watch = WatchList::new(config.watch_addresses.iter().cloned(), balance.clone());
    let chain = MemoryChain::open(&config.data_dir, genesis_block())
        .with_context(|| format!("failed to open chain in {}", config.data_dir.display()))?
        .with_watch_list(watch);
    tracing::info!(
        data_dir = %config.data_dir.display(),
        height = chain.tip().height,
        sync = config.sync_enabled,
        "starting blocksync node"
    );

    let shutdown = ShutdownController::new();
    let hook: Arc<dyn ConsoleHook> = if headless {
        Arc::new(SilentConsole)
    } else {
        Arc::new(console::TerminalConsole)
    };
    let node = SyncNode::new(config, chain, balance, hook, &shutdown)?.spawn();

    let signals = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signals.wait_for_signal().await {
            tracing::warn!(error = %e, "cannot listen for shutdown signals");
        }
    });

    if let Some(dir) = import {
        let ingest = node.ingest.clone();
        tokio::spawn(async move {
            match import::feed_directory(&ingest, &dir).await {
                Ok(summary) => tracing::info!(%summary, dir = %dir.display(), "import finished"),
                Err(e) => tracing::warn!(error = %e, dir = %dir.display(), "import aborted"),
            }
        });
    }

    if !headless {
        console::spawn(node.console.clone(), shutdown.clone())
            .context("failed to start the console thread")?;
    }

    let chain = node.join().await?;
    tracing::info!(height = chain.tip().height, "blocksync daemon exited cleanly");
    Ok(())
}

//! Chainlet node binary.
//!
//! Opens the asset, transfer, and identity ledgers, registers with any
//! bootstrap peers, and serves the HTTP API until Ctrl+C.

use std::path::PathBuf;

use anyhow::Context;
use chainlet_node_lib::config::LogFormat;
use chainlet_node_lib::{App, Node, NodeConfig, router};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "chainlet-node",
    version,
    about = "Chainlet ledger node with proof-of-work sealing and peer reconciliation"
)]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for ledger storage
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// HTTP bind address
    #[arg(long)]
    bind: Option<String>,

    /// HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// URL other nodes should use to reach this one
    #[arg(long)]
    public_url: Option<String>,

    /// Leading zero hex characters required in block hashes
    #[arg(long)]
    difficulty: Option<u32>,

    /// Worker threads per mining attempt
    #[arg(long)]
    mining_threads: Option<usize>,

    /// Peers to register with at startup (comma-separated)
    #[arg(long, value_delimiter = ',')]
    bootstrap_peers: Vec<String>,

    /// Keep all ledgers in memory
    #[arg(long)]
    ephemeral: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long)]
    log_format: Option<String>,
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply(self, mut config: NodeConfig) -> anyhow::Result<NodeConfig> {
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(bind) = self.bind {
            config.http_bind = bind;
        }
        if let Some(port) = self.port {
            config.http_port = port;
        }
        if self.public_url.is_some() {
            config.public_url = self.public_url;
        }
        if let Some(difficulty) = self.difficulty {
            config.difficulty = difficulty;
        }
        if let Some(threads) = self.mining_threads {
            config.mining_threads = threads;
        }
        if !self.bootstrap_peers.is_empty() {
            config.bootstrap_peers = self.bootstrap_peers;
        }
        if self.ephemeral {
            config.ephemeral = true;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = match format.as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => anyhow::bail!("unknown log format: {other}"),
            };
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let loaded = NodeConfig::load(args.config.as_deref()).context("loading configuration")?;
    let config = args.apply(loaded)?;

    init_logging(&config.log_level, config.log_format);

    info!("Chainlet node v{}", env!("CARGO_PKG_VERSION"));
    info!(data_dir = ?config.data_dir, ephemeral = config.ephemeral, "storage");
    info!(addr = %config.http_addr(), public_url = %config.public_url(), "http");
    info!(difficulty = config.difficulty, threads = config.mining_threads, "mining");

    if !config.ephemeral {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data dir {:?}", config.data_dir))?;
    }

    let node = Node::open(config.clone()).context("opening node")?;
    for app in App::ALL {
        let ledger = node.ledger(app);
        info!(%app, height = ledger.height(), "ledger ready");
    }

    node.bootstrap().await;

    let listener = tokio::net::TcpListener::bind(config.http_addr())
        .await
        .with_context(|| format!("binding {}", config.http_addr()))?;
    info!("HTTP API listening on {}", config.http_addr());
    info!("Chainlet node running (Ctrl+C to stop)");

    axum::serve(listener, router(node))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP API")?;

    info!("Chainlet node shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down..."),
        Err(e) => {
            tracing::error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    }
}

/// Initialize tracing with the given level and output format.
///
/// `RUST_LOG`, when set, takes precedence over `level_str`.
fn init_logging(level_str: &str, format: LogFormat) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init(),
    }
}

//! Node configuration.
//!
//! [`NodeConfig`] carries defaults for every field. [`NodeConfig::load`]
//! layers an optional TOML file and `CHAINLET_*` environment variables on top
//! (nested keys use `__`, e.g. `CHAINLET_HTTP_PORT=9000`); the binary then
//! applies its command-line overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chainlet_core::constants::{DEFAULT_DIFFICULTY, DEFAULT_HTTP_PORT, DEFAULT_PEER_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config: {0}")]
    Load(#[from] config::ConfigError),
}

/// Configuration for a node instance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for persistent data; one RocksDB per application.
    pub data_dir: PathBuf,
    /// Keep everything in memory; nothing is written to `data_dir`.
    pub ephemeral: bool,
    pub http_bind: String,
    pub http_port: u16,
    /// Base URL peers should use to reach this node. Derived from the bind
    /// address when unset.
    pub public_url: Option<String>,
    /// Required leading zero hex characters in every block hash.
    pub difficulty: u32,
    /// Worker threads per mining attempt.
    pub mining_threads: usize,
    /// Peers registered with at startup.
    pub bootstrap_peers: Vec<String>,
    pub peer_timeout_secs: u64,
    /// Log level filter string (e.g. "info", "debug", "chainlet_node_lib=trace").
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chainlet");

        Self {
            data_dir,
            ephemeral: false,
            http_bind: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            public_url: None,
            difficulty: DEFAULT_DIFFICULTY,
            mining_threads: 1,
            bootstrap_peers: Vec::new(),
            peer_timeout_secs: DEFAULT_PEER_TIMEOUT_SECS,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl NodeConfig {
    /// Defaults, then the optional file, then `CHAINLET_*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(file, None)
    }

    /// Like [`NodeConfig::load`], reading variables from `vars` instead of the
    /// process environment when given.
    fn load_with_env(
        file: Option<&Path>,
        vars: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let cfg = builder
            .add_source(
                config::Environment::with_prefix("CHAINLET")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("bootstrap_peers")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?
            .try_deserialize()?;
        Ok(cfg)
    }

    /// Database directory for one application's ledger.
    pub fn db_path(&self, app: &str) -> PathBuf {
        self.data_dir.join(app)
    }

    /// Socket address string for the HTTP server.
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_bind, self.http_port)
    }

    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.http_addr()))
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }
}

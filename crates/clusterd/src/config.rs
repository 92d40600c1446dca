//! Configuration management for clusterd.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use fleet_common::constants::{
    CLUSTER_KEY_LEN, DEFAULT_CLUSTER_PORT, DEFAULT_LISTEN_ADDR, DEFAULT_PLAIN_SIZE,
    DEFAULT_RPC_LISTEN_ADDR, DEFAULT_RPC_TIMEOUT_SECS, DEFAULT_RUN_DIR, DEFAULT_STORE_SOCKET,
    store,
};
use fleet_common::{ClusterError, NodeType};

static KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+$").unwrap());
static INTERVAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)([ms])$").unwrap());

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP status API listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Peer RPC listen address
    #[serde(default = "default_rpc_listen_addr")]
    pub rpc_listen_addr: String,

    /// Coordination store control socket
    #[serde(default = "default_store_socket")]
    pub store_socket: PathBuf,

    /// Directory holding daemon pid files
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,

    /// Remote RPC connect/read timeout
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Attempts made by a retrying store connect
    #[serde(default = "default_store_max_retries")]
    pub store_max_retries: u32,

    /// Pause between store connect attempts
    #[serde(default = "default_store_retry_interval")]
    pub store_retry_interval_ms: u64,

    /// Cluster section, validated by [`ClusterConfig::try_from`]
    #[serde(default)]
    pub cluster: ClusterSection,
}

/// Cluster section as written in the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSection {
    #[serde(default = "default_disabled")]
    pub disabled: bool,

    /// Shared 32-character alphanumeric secret
    #[serde(default)]
    pub key: Option<String>,

    #[serde(default)]
    pub node_name: Option<String>,

    #[serde(default = "default_node_type")]
    pub node_type: String,

    /// Cluster name
    #[serde(default = "default_cluster_name")]
    pub name: String,

    /// Fleet addresses, `host` or `host:port`
    #[serde(default)]
    pub nodes: Vec<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    /// `<int>s` or `<int>m`
    #[serde(default = "default_interval")]
    pub interval: String,

    #[serde(default = "default_plain_size")]
    pub plain_size: usize,

    /// Extra RPC verbs accepted on top of the built-in ones
    #[serde(default = "default_list_requests")]
    pub list_requests: Vec<String>,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            disabled: default_disabled(),
            key: None,
            node_name: None,
            node_type: default_node_type(),
            name: default_cluster_name(),
            nodes: Vec::new(),
            port: default_port(),
            interval: default_interval(),
            plain_size: default_plain_size(),
            list_requests: default_list_requests(),
        }
    }
}

/// Validated cluster configuration, immutable for the life of a coordination cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub key: String,
    pub node_name: String,
    pub node_type: NodeType,
    pub name: String,
    pub nodes: Vec<String>,
    pub port: u16,
    pub interval: Duration,
    pub plain_size: usize,
    pub list_requests: Vec<String>,
}

impl TryFrom<&ClusterSection> for ClusterConfig {
    type Error = ClusterError;

    fn try_from(section: &ClusterSection) -> Result<Self, Self::Error> {
        let key = section
            .key
            .clone()
            .ok_or_else(|| ClusterError::validation("key", "Unspecified key"))?;
        if key.len() != CLUSTER_KEY_LEN || !KEY_RE.is_match(&key) {
            return Err(ClusterError::validation(
                "key",
                "Key must be 32 characters long and only have alphanumeric characters",
            ));
        }

        let node_name = section
            .node_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| ClusterError::validation("node_name", "Unspecified node name"))?;

        let node_type = section
            .node_type
            .parse::<NodeType>()
            .map_err(|reason| ClusterError::validation("node_type", reason))?;

        let interval = parse_interval(&section.interval)?;

        if section.nodes.iter().all(|n| n == "localhost") {
            return Err(ClusterError::validation(
                "nodes",
                "Please specify IPs of all cluster nodes",
            ));
        }

        if section.plain_size == 0 {
            return Err(ClusterError::validation("plain_size", "must be positive"));
        }

        Ok(Self {
            key,
            node_name,
            node_type,
            name: section.name.clone(),
            nodes: section.nodes.clone(),
            port: section.port,
            interval,
            plain_size: section.plain_size,
            list_requests: section.list_requests.clone(),
        })
    }
}

/// Parse a `<int>[s|m]` sync interval
pub fn parse_interval(raw: &str) -> Result<Duration, ClusterError> {
    let invalid = || {
        ClusterError::validation(
            "interval",
            "Invalid interval specification. Please, specify it with format <number>s or <number>m",
        )
    };

    let caps = INTERVAL_RE.captures(raw).ok_or_else(invalid)?;
    let amount: u64 = caps[1].parse().map_err(|_| invalid())?;
    let secs = match &caps[2] {
        "m" => amount.checked_mul(60).ok_or_else(invalid)?,
        _ => amount,
    };
    Ok(Duration::from_secs(secs))
}

// Default value functions
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_rpc_listen_addr() -> String { DEFAULT_RPC_LISTEN_ADDR.to_string() }
fn default_store_socket() -> PathBuf { PathBuf::from(DEFAULT_STORE_SOCKET) }
fn default_run_dir() -> PathBuf { PathBuf::from(DEFAULT_RUN_DIR) }
fn default_rpc_timeout() -> u64 { DEFAULT_RPC_TIMEOUT_SECS }
fn default_store_max_retries() -> u32 { store::MAX_RETRIES }
fn default_store_retry_interval() -> u64 { store::RETRY_INTERVAL.as_millis() as u64 }
fn default_disabled() -> bool { true }
fn default_node_type() -> String { "master".to_string() }
fn default_cluster_name() -> String { "fleet".to_string() }
fn default_port() -> u16 { DEFAULT_CLUSTER_PORT }
fn default_interval() -> String { "2m".to_string() }
fn default_plain_size() -> usize { DEFAULT_PLAIN_SIZE }

fn default_list_requests() -> Vec<String> {
    ["file_status", "sync_info", "agent_info"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl AppConfig {
    /// Load configuration from file and `CLUSTERD_*` environment, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        if !Path::new(config_path).exists() {
            tracing::warn!(
                path = %config_path,
                "Config file not found, using defaults and environment"
            );
        }
        let mut config = Self::from_sources(config_path, Self::environment())?;

        // Apply CLI overrides
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(ref rpc_listen) = args.rpc_listen {
            config.rpc_listen_addr = rpc_listen.clone();
        }
        if let Some(ref socket) = args.store_socket {
            config.store_socket = socket.clone();
        }

        Ok(config)
    }

    /// `CLUSTERD_<KEY>`, nested sections split on `__`
    /// (`CLUSTERD_CLUSTER__NODE_NAME`)
    fn environment() -> config::Environment {
        config::Environment::with_prefix("CLUSTERD")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    /// Optional file layered under the environment
    fn from_sources(config_path: &str, env: config::Environment) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(env)
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Validated cluster section, or `None` when clustering is disabled
    pub fn cluster_config(&self) -> Result<Option<ClusterConfig>, ClusterError> {
        if self.cluster.disabled {
            return Ok(None);
        }
        ClusterConfig::try_from(&self.cluster).map(Some)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn store_retry_interval(&self) -> Duration {
        Duration::from_millis(self.store_retry_interval_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            rpc_listen_addr: default_rpc_listen_addr(),
            store_socket: default_store_socket(),
            run_dir: default_run_dir(),
            rpc_timeout_secs: default_rpc_timeout(),
            store_max_retries: default_store_max_retries(),
            store_retry_interval_ms: default_store_retry_interval(),
            cluster: ClusterSection::default(),
        }
    }
}

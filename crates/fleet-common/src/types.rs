//! Core types shared across fleet coordination components.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Configured role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Master,
    Client,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master" => Ok(Self::Master),
            "client" => Ok(Self::Client),
            other => Err(format!(
                "Invalid node type {other}. Correct values are master and client"
            )),
        }
    }
}

/// Role of a node as reported by discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Master,
    /// The currently elected leader
    MasterActive,
    Client,
    Unknown,
}

impl NodeKind {
    /// True for both plain and elected masters
    pub fn is_master(&self) -> bool {
        matches!(self, Self::Master | Self::MasterActive)
    }
}

impl From<NodeType> for NodeKind {
    fn from(value: NodeType) -> Self {
        match value {
            NodeType::Master => Self::Master,
            NodeType::Client => Self::Client,
        }
    }
}

/// Reachability of a node during the last discovery pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// What a node says about itself in reply to the `node` RPC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node: String,
    pub cluster: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
}

/// One entry of a discovery report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub url: String,
    pub node: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    pub localhost: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeStatus {
    /// A reachable node
    pub fn connected(url: impl Into<String>, info: NodeInfo, localhost: bool) -> Self {
        Self {
            url: url.into(),
            node: info.node,
            kind: info.kind,
            status: ConnectionStatus::Connected,
            cluster: Some(info.cluster),
            localhost,
            error: None,
        }
    }

    /// Placeholder for a node that could not be queried
    pub fn disconnected(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            node: "unknown".to_string(),
            kind: NodeKind::Unknown,
            status: ConnectionStatus::Disconnected,
            cluster: None,
            localhost: false,
            error: Some(error.into()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Result of a discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub items: Vec<NodeStatus>,
    #[serde(rename = "totalItems")]
    pub total_items: usize,
}

impl From<Vec<NodeStatus>> for ClusterReport {
    fn from(items: Vec<NodeStatus>) -> Self {
        let total_items = items.len();
        Self { items, total_items }
    }
}

/// Response envelope of every RPC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub error: i32,
    pub data: serde_json::Value,
}

impl RpcResponse {
    /// Success reply; a payload that fails to encode becomes an error reply
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self { error: 0, data },
            Err(e) => Self::err(format!("response encoding failed: {e}")),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            error: 1,
            data: serde_json::Value::String(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error == 0
    }
}

/// Sync status of one tracked file on one manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSyncEntry {
    pub manager: String,
    pub filename: String,
    pub status: String,
}

/// `{manager -> {status -> [filenames]}}`
pub type FileStatusReport = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Serialized as `"yes"` / `"no"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YesNo {
    Yes,
    No,
}

impl From<bool> for YesNo {
    fn from(value: bool) -> Self {
        if value { Self::Yes } else { Self::No }
    }
}

/// Whether clustering is enabled and the daemon is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub enabled: YesNo,
    pub running: YesNo,
}

/// Master recorded in the coordination store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveMaster {
    pub name: Option<String>,
    pub url: Option<String>,
}

/// Last completed file synchronization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastSync {
    pub date: chrono::DateTime<chrono::Utc>,
    /// Seconds
    pub duration: f64,
}

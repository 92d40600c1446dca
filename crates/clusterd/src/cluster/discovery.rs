//! Node discovery and status aggregation.
//!
//! Walks the configured fleet in sorted order. The local node is answered
//! from the coordination store; every remote node gets a padded `node` RPC.
//! Remote RPCs are fanned out concurrently and folded back in order, so a
//! dead peer costs one timeout, not one per peer. A peer that fails becomes
//! a `disconnected` entry instead of failing the pass.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::Deserialize;

use fleet_common::{
    ClusterError, ClusterReport, NodeInfo, NodeKind, NodeStatus, NodeType, RpcResponse,
};

use super::election;
use super::protocol::CommandRules;
use super::store::Session;
use super::transport::RpcClient;
use crate::config::ClusterConfig;

/// Options for a discovery pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NodeQuery {
    /// Write every resolved name/address pair into the store
    pub update_bindings: bool,
    /// Always report the local node, whatever its role
    pub include_localhost: bool,
}

/// A fleet address split into host and port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    /// The address exactly as configured
    pub url: String,
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    /// `host` or `host:port`
    pub fn parse(entry: &str, default_port: u16) -> Self {
        let (host, port) = match entry.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => match port.parse() {
                Ok(port) => (host, port),
                Err(_) => (entry, default_port),
            },
            _ => (entry, default_port),
        };

        Self {
            url: entry.to_string(),
            host: host.to_string(),
            port,
        }
    }
}

/// Discovery service, one per cluster configuration
#[derive(Debug, Clone)]
pub struct Discovery {
    config: Arc<ClusterConfig>,
    rules: CommandRules,
    rpc: RpcClient,
    local_addrs: HashSet<String>,
}

impl Discovery {
    pub fn new(config: Arc<ClusterConfig>, rpc: RpcClient, local_addrs: HashSet<String>) -> Self {
        Self {
            rules: CommandRules::from_config(&config),
            config,
            rpc,
            local_addrs,
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn is_local(&self, addr: &NodeAddress) -> bool {
        self.local_addrs.contains(&addr.host)
    }

    /// What this node reports about itself
    pub async fn get_node(&self, session: &mut Session<'_>) -> Result<NodeInfo, ClusterError> {
        let active = session.get_active_master().await?;
        let kind = if active.name.as_deref() == Some(self.config.node_name.as_str()) {
            NodeKind::MasterActive
        } else {
            self.config.node_type.into()
        };

        Ok(NodeInfo {
            node: self.config.node_name.clone(),
            cluster: self.config.name.clone(),
            kind,
        })
    }

    /// Status of every configured node, with the active master elected
    pub async fn get_nodes(
        &self,
        query: NodeQuery,
        session: &mut Session<'_>,
    ) -> Result<ClusterReport, ClusterError> {
        let mut items = self.scan(query, session).await?;
        election::select_active_master(&mut items, session).await?;
        Ok(ClusterReport::from(items))
    }

    /// One discovery pass without election
    pub async fn scan(
        &self,
        query: NodeQuery,
        session: &mut Session<'_>,
    ) -> Result<Vec<NodeStatus>, ClusterError> {
        let mut entries: Vec<&String> = self.config.nodes.iter().collect();
        entries.sort();
        let addrs: Vec<NodeAddress> = entries
            .into_iter()
            .map(|entry| NodeAddress::parse(entry, self.config.port))
            .collect();

        let command = self.rules.node_request(self.config.node_type)?;
        let replies = join_all(addrs.iter().map(|addr| async {
            if self.is_local(addr) {
                None
            } else {
                Some(self.rpc.send_request(&addr.host, addr.port, &command, None).await)
            }
        }))
        .await;

        let mut items = Vec::with_capacity(addrs.len());
        for (addr, reply) in addrs.iter().zip(replies) {
            let (info, localhost) = match reply {
                None => (self.get_node(session).await?, true),
                Some(reply) => match remote_info(&addr.url, reply) {
                    Ok(info) => (info, false),
                    Err(e) => {
                        tracing::warn!(url = %addr.url, error = %e, "Error connecting with node");
                        items.push(NodeStatus::disconnected(&addr.url, e.to_string()));
                        continue;
                    }
                },
            };

            let reported = self.config.node_type == NodeType::Master
                || info.kind.is_master()
                || (query.include_localhost && localhost);
            if !reported {
                continue;
            }

            if query.update_bindings {
                session.record_binding(&info.node, &addr.url).await?;
            }
            items.push(NodeStatus::connected(&addr.url, info, localhost));
        }

        Ok(items)
    }
}

fn remote_info(
    url: &str,
    reply: Result<RpcResponse, ClusterError>,
) -> Result<NodeInfo, ClusterError> {
    let response = reply?;
    if !response.is_ok() {
        let message = match response.data {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        return Err(ClusterError::Remote {
            peer: url.to_string(),
            message,
        });
    }

    serde_json::from_value(response.data).map_err(|e| {
        ClusterError::ProtocolViolation(format!("unexpected node reply from {url}: {e}"))
    })
}

/// Addresses of this host, plus loopback names
pub async fn local_addresses() -> HashSet<String> {
    let mut addrs: HashSet<String> = ["localhost", "127.0.0.1", "::1"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    match tokio::process::Command::new("hostname")
        .arg("--all-ip-addresses")
        .output()
        .await
    {
        Ok(output) if output.status.success() => {
            addrs.extend(
                String::from_utf8_lossy(&output.stdout)
                    .split_whitespace()
                    .map(str::to_string),
            );
        }
        Ok(output) => {
            tracing::warn!(status = %output.status, "Could not list local addresses");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not list local addresses");
        }
    }

    addrs
}

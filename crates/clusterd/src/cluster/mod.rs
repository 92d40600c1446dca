//! Cluster coordination modules.
//!
//! Implements:
//! - Encrypted single-shot RPC between nodes (client and responder)
//! - Command authorization by node role
//! - Coordination store client (local control socket)
//! - Node discovery, active master election, file-sync status

mod crypto;
mod discovery;
mod election;
mod files;
mod frame;
mod protocol;
mod server;
mod status;
pub(crate) mod store;
mod transport;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use fleet_common::{ActiveMaster, ClusterError, ClusterReport, FileStatusReport, LastSync, NodeInfo};

use crate::config::ClusterConfig;

pub use crypto::ClusterCipher;
pub use discovery::{Discovery, NodeQuery, local_addresses};
pub use files::FileStatusQuery;
pub use server::RpcServer;
pub use status::{PidFile, cluster_status};
pub use store::{CoordinationStore, RetryPolicy};
pub use transport::RpcClient;

/// Entry point for every coordination operation of one node
#[derive(Debug, Clone)]
pub struct Coordinator {
    discovery: Discovery,
    store: CoordinationStore,
}

impl Coordinator {
    pub fn new(
        config: Arc<ClusterConfig>,
        store: CoordinationStore,
        rpc_timeout: Duration,
        local_addrs: HashSet<String>,
    ) -> Result<Self, ClusterError> {
        let rpc = RpcClient::new(ClusterCipher::new(&config.key)?, rpc_timeout);
        Ok(Self {
            discovery: Discovery::new(config, rpc, local_addrs),
            store,
        })
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn store(&self) -> &CoordinationStore {
        &self.store
    }

    /// Discovery pass plus election
    pub async fn get_nodes(&self, query: NodeQuery) -> Result<ClusterReport, ClusterError> {
        self.discovery.get_nodes(query, &mut self.store.session()).await
    }

    /// This node's own status
    pub async fn get_node(&self) -> Result<NodeInfo, ClusterError> {
        self.discovery.get_node(&mut self.store.session()).await
    }

    pub async fn active_master(&self) -> Result<ActiveMaster, ClusterError> {
        self.store.session().get_active_master().await
    }

    /// File status over one retrying store connection
    pub async fn file_status(
        &self,
        query: &FileStatusQuery,
    ) -> Result<FileStatusReport, ClusterError> {
        let mut conn = self.store.connect(true).await?;
        files::get_file_status(&self.discovery, &mut (&mut conn).into(), query).await
    }

    pub async fn last_sync(&self) -> Result<Option<LastSync>, ClusterError> {
        self.store.session().last_sync().await
    }
}

/// Background worker: one discovery pass with binding refresh per interval
pub async fn coordination_worker(
    coordinator: Arc<Coordinator>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let interval = coordinator.discovery().config().interval;
    tracing::info!(interval_secs = interval.as_secs(), "Coordination worker started");

    let query = NodeQuery {
        update_bindings: true,
        include_localhost: true,
    };
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match coordinator.get_nodes(query).await {
                    Ok(report) => {
                        let connected = report.items.iter().filter(|n| n.is_connected()).count();
                        tracing::debug!(
                            nodes = report.total_items,
                            connected,
                            "Coordination pass complete"
                        );
                    }
                    Err(e) => tracing::error!(error = %e, "Coordination pass failed"),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Coordination worker shutting down");
                break;
            }
        }
    }
}

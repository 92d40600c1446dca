//! Application state and shared resources.

use anyhow::{Context, Result};
use std::sync::Arc;

use fleet_common::{ClusterError, ClusterStatus};

use crate::cluster::{self, CoordinationStore, Coordinator, RetryPolicy};
use crate::config::AppConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Cluster coordinator, absent while clustering is disabled
    pub coordinator: Option<Arc<Coordinator>>,
}

impl AppState {
    /// Build state from configuration, validating the cluster section
    pub async fn new(config: AppConfig) -> Result<Self> {
        let coordinator = match config.cluster_config().context("Invalid cluster configuration")? {
            Some(cluster) => {
                let store = CoordinationStore::new(
                    config.store_socket.clone(),
                    RetryPolicy {
                        max_attempts: config.store_max_retries,
                        interval: config.store_retry_interval(),
                    },
                );
                let local_addrs = cluster::local_addresses().await;
                tracing::debug!(addrs = ?local_addrs, "Local addresses");

                let coordinator =
                    Coordinator::new(Arc::new(cluster), store, config.rpc_timeout(), local_addrs)?;
                Some(Arc::new(coordinator))
            }
            None => None,
        };

        Ok(Self {
            config: Arc::new(config),
            coordinator,
        })
    }

    /// The coordinator, or an error when clustering is disabled
    pub fn coordinator(&self) -> Result<&Coordinator, ClusterError> {
        self.coordinator
            .as_deref()
            .ok_or_else(|| ClusterError::Config("Cluster is disabled".to_string()))
    }

    pub fn cluster_status(&self) -> ClusterStatus {
        cluster::cluster_status(self.coordinator.is_some(), &self.config.run_dir)
    }
}

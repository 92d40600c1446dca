//! Peer RPC responder.
//!
//! Answers one encrypted request per connection. Frames that fail to decrypt
//! are dropped without a reply; commands that fail authorization get an
//! error envelope and are never acted upon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use fleet_common::constants::rpc::{MAX_CONNECTIONS, MAX_REQUEST_FRAME_SIZE};
use fleet_common::constants::verbs;
use fleet_common::{ClusterError, NodeType, RpcResponse};

use super::crypto::ClusterCipher;
use super::discovery::Discovery;
use super::frame;
use super::protocol::CommandRules;
use super::store::CoordinationStore;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

struct Handler {
    discovery: Discovery,
    store: CoordinationStore,
    cipher: ClusterCipher,
    rules: CommandRules,
    role: NodeType,
}

/// TCP listener for peer RPCs
pub struct RpcServer {
    listener: TcpListener,
    handler: Arc<Handler>,
    request_timeout: Duration,
    max_connections: usize,
}

impl RpcServer {
    pub async fn bind(
        addr: &str,
        discovery: Discovery,
        store: CoordinationStore,
    ) -> Result<Self, ClusterError> {
        let listener = TcpListener::bind(addr).await?;
        let config = discovery.config();
        let handler = Handler {
            cipher: ClusterCipher::new(&config.key)?,
            rules: CommandRules::from_config(config),
            role: config.node_type,
            discovery,
            store,
        };

        Ok(Self {
            listener,
            handler: Arc::new(handler),
            request_timeout: REQUEST_TIMEOUT,
            max_connections: MAX_CONNECTIONS,
        })
    }

    /// Deadline for a whole request frame, and the number of peers served at once
    pub fn with_limits(mut self, request_timeout: Duration, max_connections: usize) -> Self {
        self.request_timeout = request_timeout;
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept peers until shutdown
    pub async fn run(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<(), ClusterError> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "Cluster RPC listener started");
        let slots = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let Ok(permit) = slots.clone().try_acquire_owned() else {
                                tracing::warn!(
                                    peer = %peer,
                                    "Cluster RPC connection limit reached"
                                );
                                continue;
                            };
                            let handler = self.handler.clone();
                            let timeout = self.request_timeout;
                            tokio::spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handler.serve(stream, peer, timeout).await {
                                    tracing::warn!(peer = %peer, error = %e, "Cluster RPC dropped");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Cluster RPC accept error");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cluster RPC listener shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

impl Handler {
    async fn serve(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        timeout: Duration,
    ) -> Result<(), ClusterError> {
        let peer_ip = peer.ip().to_string();
        let body =
            frame::read_frame(&mut stream, timeout, MAX_REQUEST_FRAME_SIZE, &peer_ip).await?;
        let request = frame::decode_request(&self.cipher, &body, &peer_ip)?;

        let response = self.respond(&request.command).await;
        let reply = frame::encode_response(&self.cipher, &response)?;
        stream.write_all(&reply).await?;
        stream.shutdown().await?;
        Ok(())
    }

    async fn respond(&self, command: &str) -> RpcResponse {
        let tokens: Vec<&str> = command.split(' ').collect();
        if !self.rules.accepts(&tokens, self.role) {
            tracing::warn!(verb = tokens[0], "Rejected cluster command");
            return RpcResponse::err(format!(
                "protocol violation: command '{}' rejected",
                tokens[0]
            ));
        }

        match tokens[0] {
            verbs::NODE => match self.discovery.get_node(&mut self.store.session()).await {
                Ok(info) => RpcResponse::ok(info),
                Err(e) => RpcResponse::err(e.to_string()),
            },
            verb => {
                tracing::debug!(verb = verb, "Unsupported cluster command");
                RpcResponse::err(format!("unsupported command '{verb}'"))
            }
        }
    }
}

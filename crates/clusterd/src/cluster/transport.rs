//! Single request/response RPC against a remote node.
//!
//! Each call owns its socket and walks an explicit state machine:
//!
//! ```text
//! Connecting -> Writing -> AwaitingTerminator -> Decoding -> Done
//!      \            \              \                \
//!       +------------+--------------+----------------+--> Failed
//! ```
//!
//! Reading starts only once the whole request frame is written. The socket
//! is dropped as soon as the terminator arrives, before decryption.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use fleet_common::constants::rpc::{CHUNK_SIZE, MAX_RESPONSE_FRAME_SIZE};
use fleet_common::{ClusterError, RpcResponse};

use super::crypto::ClusterCipher;
use super::frame;
use super::protocol::Command;

/// Per-call state
enum RpcState {
    Connecting,
    Writing(TcpStream),
    AwaitingTerminator(TcpStream),
    Decoding(Vec<u8>),
    Done(RpcResponse),
    Failed(ClusterError),
}

impl RpcState {
    fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Writing(_) => "writing",
            Self::AwaitingTerminator(_) => "awaiting_terminator",
            Self::Decoding(_) => "decoding",
            Self::Done(_) => "done",
            Self::Failed(_) => "failed",
        }
    }
}

/// Encrypted RPC client
#[derive(Debug, Clone)]
pub struct RpcClient {
    cipher: ClusterCipher,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(cipher: ClusterCipher, timeout: Duration) -> Self {
        Self { cipher, timeout }
    }

    /// Send one authorized command (and optional binary payload) to `host:port`
    pub async fn send_request(
        &self,
        host: &str,
        port: u16,
        command: &Command,
        payload: Option<&[u8]>,
    ) -> Result<RpcResponse, ClusterError> {
        let peer = format!("{host}:{port}");
        let mut state = RpcState::Connecting;

        loop {
            tracing::trace!(peer = %peer, state = state.name(), verb = %command, "RPC step");

            state = match state {
                RpcState::Connecting => match self.connect(&peer).await {
                    Ok(stream) => RpcState::Writing(stream),
                    Err(e) => RpcState::Failed(e),
                },
                RpcState::Writing(mut stream) => {
                    match self.write_frame(&mut stream, command, payload).await {
                        Ok(()) => RpcState::AwaitingTerminator(stream),
                        Err(e) => RpcState::Failed(e),
                    }
                }
                RpcState::AwaitingTerminator(mut stream) => {
                    let read = frame::read_frame(
                        &mut stream,
                        self.timeout,
                        MAX_RESPONSE_FRAME_SIZE,
                        &peer,
                    );
                    match read.await {
                        Ok(body) => RpcState::Decoding(body),
                        Err(e) => RpcState::Failed(e),
                    }
                }
                RpcState::Decoding(body) => {
                    match frame::decode_response(&self.cipher, &body, host) {
                        Ok(response) => RpcState::Done(response),
                        Err(e) => RpcState::Failed(e),
                    }
                }
                RpcState::Done(response) => return Ok(response),
                RpcState::Failed(e) => {
                    tracing::debug!(peer = %peer, error = %e, "RPC failed");
                    return Err(e);
                }
            };
        }
    }

    async fn connect(&self, peer: &str) -> Result<TcpStream, ClusterError> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(peer)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ClusterError::ConnectFailed {
                target: peer.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ClusterError::ConnectFailed {
                target: peer.to_string(),
                reason: format!("no answer within {:?}", self.timeout),
            }),
        }
    }

    async fn write_frame(
        &self,
        stream: &mut TcpStream,
        command: &Command,
        payload: Option<&[u8]>,
    ) -> Result<(), ClusterError> {
        let msg = frame::encode_request(&self.cipher, command.as_str(), payload)?;

        let mut i = 0;
        while i < msg.len() {
            let next_i = (i + CHUNK_SIZE).min(msg.len());
            let sent = tokio::time::timeout(self.timeout, stream.write(&msg[i..next_i]))
                .await
                .map_err(|_| ClusterError::Timeout("RPC write".into()))??;
            if sent == 0 {
                return Err(ClusterError::Io(std::io::ErrorKind::WriteZero.into()));
            }
            i += sent;
        }

        stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::protocol::CommandRules;
    use fleet_common::NodeType;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    const KEY: &str = "c98b62a9b6169ac5f67dae55ae4a9088";

    fn client(key: &str) -> RpcClient {
        RpcClient::new(ClusterCipher::new(key).unwrap(), Duration::from_secs(2))
    }

    fn node_command() -> Command {
        CommandRules::new(100, Vec::new())
            .node_request(NodeType::Master)
            .unwrap()
    }

    /// Echo server: replies with the decrypted command, written in 3-byte pieces
    async fn spawn_echo(key: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let cipher = ClusterCipher::new(key).unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            let end = loop {
                let n = stream.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if let Some(end) = frame::find_terminator(&buf, 0) {
                    break end;
                }
            };
            let request = frame::decode_request(&cipher, &buf[..end], "client").unwrap();
            let reply = frame::encode_response(&cipher, &RpcResponse::ok(request.command)).unwrap();
            for piece in reply.chunks(3) {
                stream.write_all(piece).await.unwrap();
            }
        });
        port
    }

    #[tokio::test]
    async fn test_request_roundtrip() {
        let port = spawn_echo(KEY).await;
        let command = node_command();

        let response = client(KEY)
            .send_request("127.0.0.1", port, &command, None)
            .await
            .unwrap();

        assert!(response.is_ok());
        assert_eq!(response.data, serde_json::json!(command.as_str()));
    }

    #[tokio::test]
    async fn test_reply_under_wrong_key() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let other = ClusterCipher::new("0000000000000000000000000000000a").unwrap();
            let mut chunk = [0u8; 4096];
            let _ = stream.read(&mut chunk).await.unwrap();
            let reply = frame::encode_response(&other, &RpcResponse::ok("hi")).unwrap();
            stream.write_all(&reply).await.unwrap();
        });

        let err = client(KEY)
            .send_request("127.0.0.1", port, &node_command(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::DecryptionFailed(ref peer) if peer == "127.0.0.1"));
    }

    #[tokio::test]
    async fn test_unreachable_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = client(KEY)
            .send_request("127.0.0.1", port, &node_command(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::ConnectFailed { .. }));
    }

    #[tokio::test]
    async fn test_trickling_peer_hits_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut chunk = [0u8; 4096];
            let _ = stream.read(&mut chunk).await;
            for _ in 0..50 {
                if stream.write_all(b"x").await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });

        let rpc = RpcClient::new(ClusterCipher::new(KEY).unwrap(), Duration::from_millis(500));
        let started = std::time::Instant::now();
        let err = rpc
            .send_request("127.0.0.1", port, &node_command(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ClusterError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_early_close_without_terminator() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut chunk = [0u8; 4096];
            let _ = stream.read(&mut chunk).await;
            stream.write_all(b"partial").await.unwrap();
        });

        let err = client(KEY)
            .send_request("127.0.0.1", port, &node_command(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClusterError::ProtocolViolation(_) | ClusterError::Io(_)
        ));
    }
}

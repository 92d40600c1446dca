//! Shared constants for fleet coordination components.

use std::time::Duration;

/// Default HTTP status API listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:55000";

/// Default peer RPC listen address
pub const DEFAULT_RPC_LISTEN_ADDR: &str = "0.0.0.0:1516";

/// Default cluster RPC port
pub const DEFAULT_CLUSTER_PORT: u16 = 1516;

/// Default coordination store control socket
pub const DEFAULT_STORE_SOCKET: &str = "/var/run/fleet/cluster_db";

/// Default directory holding daemon pid files
pub const DEFAULT_RUN_DIR: &str = "/var/run/fleet";

/// Daemon name used for pid files (`<run_dir>/clusterd-<pid>.pid`)
pub const DAEMON_NAME: &str = "clusterd";

/// Remote RPC connect/read timeout (seconds)
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 20;

/// Exact length of a plaintext RPC command, spaces included
pub const DEFAULT_PLAIN_SIZE: usize = 100;

/// Length of the shared cluster key
pub const CLUSTER_KEY_LEN: usize = 32;

/// RPC protocol constants
pub mod rpc {
    /// End-of-frame marker. Never produced by the token alphabet.
    pub const TERMINATOR: &[u8] = b"\n\t\t\n";

    /// Separates the command token from an optional payload token
    pub const PAYLOAD_SEPARATOR: u8 = b'.';

    /// Socket write chunk size
    pub const CHUNK_SIZE: usize = 4096;

    /// Upper bound on an incoming request frame, terminator excluded.
    /// Requests carry a padded command and at most a small payload.
    pub const MAX_REQUEST_FRAME_SIZE: usize = 64 * 1024;

    /// Upper bound on an incoming response frame, terminator excluded
    pub const MAX_RESPONSE_FRAME_SIZE: usize = 16 * 1024 * 1024;

    /// Concurrent peer connections served by one responder
    pub const MAX_CONNECTIONS: usize = 256;

    /// XChaCha20 nonce length
    pub const NONCE_LEN: usize = 24;
}

/// Coordination store client constants
pub mod store {
    use super::Duration;

    /// Attempts made by a retrying connect
    pub const MAX_RETRIES: u32 = 100;

    /// Pause between connect attempts
    pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

    /// Single-read receive buffer
    pub const RECV_BUFFER_SIZE: usize = 10_000;

    /// Rows fetched per `select` page
    pub const FILE_PAGE_SIZE: u64 = 100;
}

/// Built-in RPC verbs
pub mod verbs {
    pub const NODE: &str = "node";
    pub const ZIP: &str = "zip";
    pub const READY: &str = "ready";
    pub const DATA: &str = "data";
}

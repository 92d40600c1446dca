//! Coordination store client.
//!
//! The store is a local process holding node name/address bindings, the
//! recorded active master, and per-node file-sync rows. It speaks a bare text
//! protocol over a Unix control socket: one command per write, one
//! null-padded reply per read, empty reply meaning "not found".
//!
//! Operations run on a [`Session`], either sharing one open connection across
//! a batch or opening a fresh connection per operation.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use fleet_common::constants::store::{MAX_RETRIES, RECV_BUFFER_SIZE, RETRY_INTERVAL};
use fleet_common::{ActiveMaster, ClusterError, LastSync};

/// Requests understood by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRequest<'a> {
    GetIp(&'a str),
    GetName(&'a str),
    SelectActual,
    InsertActual(&'a str),
    InsertName { name: &'a str, addr: &'a str },
    Count(&'a str),
    Select { manager: &'a str, limit: u64, offset: u64 },
    SelectLast,
}

impl StoreRequest<'_> {
    /// Text form sent over the socket
    pub fn to_wire(&self) -> String {
        match self {
            Self::GetIp(name) => format!("getip {name}"),
            Self::GetName(addr) => format!("getname {addr}"),
            Self::SelectActual => "selactual".to_string(),
            Self::InsertActual(name) => format!("insertactual {name}"),
            Self::InsertName { name, addr } => format!("insertname {name} {addr}"),
            Self::Count(manager) => format!("count {manager}"),
            Self::Select { manager, limit, offset } => format!("select {manager} {limit} {offset}"),
            Self::SelectLast => "sellast".to_string(),
        }
    }
}

/// Connect attempts and pause between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRIES,
            interval: RETRY_INTERVAL,
        }
    }
}

/// Handle on the local coordination store
#[derive(Debug, Clone)]
pub struct CoordinationStore {
    socket_path: PathBuf,
    retry: RetryPolicy,
}

impl CoordinationStore {
    pub fn new(socket_path: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            socket_path: socket_path.into(),
            retry,
        }
    }

    /// Open a connection. With `retry`, keeps trying per the retry policy;
    /// otherwise a single attempt.
    pub async fn connect(&self, retry: bool) -> Result<StoreConnection, ClusterError> {
        let attempts = if retry { self.retry.max_attempts } else { 1 };
        let path = &self.socket_path;

        let stream = connect_with_retry(attempts, self.retry.interval, || UnixStream::connect(path))
            .await?;

        Ok(StoreConnection { stream })
    }

    /// Session that opens one connection per operation
    pub fn session(&self) -> Session<'_> {
        Session::PerOperation(self)
    }
}

/// Run `attempt` up to `max_attempts` times, pausing `interval` between failures
pub(crate) async fn connect_with_retry<T, F, Fut>(
    max_attempts: u32,
    interval: Duration,
    mut attempt: F,
) -> Result<T, ClusterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut last_error = String::new();

    for n in 1..=max_attempts {
        match attempt().await {
            Ok(conn) => {
                if n > 1 {
                    tracing::debug!(attempt = n, "Coordination store connected after retry");
                }
                return Ok(conn);
            }
            Err(e) => {
                tracing::debug!(
                    attempt = n,
                    max_attempts,
                    error = %e,
                    "Coordination store connect failed"
                );
                last_error = e.to_string();
                if n < max_attempts {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    Err(ClusterError::CoordinationUnavailable {
        attempts: max_attempts,
        reason: last_error,
    })
}

/// An open store connection
#[derive(Debug)]
pub struct StoreConnection {
    stream: UnixStream,
}

impl StoreConnection {
    /// Write a raw command
    pub async fn send(&mut self, command: &str) -> Result<(), ClusterError> {
        self.stream.write_all(command.as_bytes()).await?;
        Ok(())
    }

    /// Read one reply, null padding stripped
    pub async fn receive(&mut self) -> Result<String, ClusterError> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Err(ClusterError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }

        let reply: Vec<u8> = buf[..n].iter().copied().filter(|b| *b != 0).collect();
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    pub async fn execute(&mut self, request: StoreRequest<'_>) -> Result<String, ClusterError> {
        self.send(&request.to_wire()).await?;
        self.receive().await
    }
}

/// Where store operations run
pub enum Session<'a> {
    /// Reuse a caller-owned connection for a batch
    Shared(&'a mut StoreConnection),
    /// Connect, run one operation, close
    PerOperation(&'a CoordinationStore),
}

impl<'a> From<&'a mut StoreConnection> for Session<'a> {
    fn from(conn: &'a mut StoreConnection) -> Self {
        Self::Shared(conn)
    }
}

impl Session<'_> {
    async fn execute(&mut self, request: StoreRequest<'_>) -> Result<String, ClusterError> {
        match self {
            Self::Shared(conn) => conn.execute(request).await,
            Self::PerOperation(store) => {
                let mut conn = store.connect(false).await?;
                conn.execute(request).await
            }
        }
    }

    /// Address bound to a node name
    pub async fn get_ip(&mut self, name: &str) -> Result<Option<String>, ClusterError> {
        let ip = non_blank(self.execute(StoreRequest::GetIp(name)).await?);
        if ip.is_none() {
            tracing::warn!(node = %name, "No address recorded for node");
        }
        Ok(ip)
    }

    /// Node name bound to an address
    pub async fn get_name(&mut self, addr: &str) -> Result<Option<String>, ClusterError> {
        let name = non_blank(self.execute(StoreRequest::GetName(addr)).await?);
        if name.is_none() {
            tracing::warn!(url = %addr, "No name recorded for address");
        }
        Ok(name)
    }

    /// Recorded active master and its address
    pub async fn get_active_master(&mut self) -> Result<ActiveMaster, ClusterError> {
        let Some(name) = non_blank(self.execute(StoreRequest::SelectActual).await?) else {
            return Ok(ActiveMaster::default());
        };

        let url = self.get_ip(&name).await?;
        Ok(ActiveMaster {
            name: Some(name),
            url,
        })
    }

    pub async fn record_active_master(&mut self, name: &str) -> Result<(), ClusterError> {
        self.execute(StoreRequest::InsertActual(name)).await?;
        Ok(())
    }

    pub async fn record_binding(&mut self, name: &str, addr: &str) -> Result<(), ClusterError> {
        self.execute(StoreRequest::InsertName { name, addr }).await?;
        Ok(())
    }

    /// Number of tracked files for a manager
    pub async fn count_files(&mut self, manager: &str) -> Result<u64, ClusterError> {
        let reply = self.execute(StoreRequest::Count(manager)).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Ok(0);
        }
        reply.parse().map_err(|_| {
            ClusterError::ProtocolViolation(format!("count for {manager} is not a number: {reply}"))
        })
    }

    /// One page of `(filename, status)` rows
    pub async fn select_files(
        &mut self,
        manager: &str,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<(String, String)>, ClusterError> {
        let reply = self
            .execute(StoreRequest::Select { manager, limit, offset })
            .await?;
        Ok(parse_file_rows(&reply))
    }

    /// Timestamp and duration of the last synchronization
    pub async fn last_sync(&mut self) -> Result<Option<LastSync>, ClusterError> {
        let Some(reply) = non_blank(self.execute(StoreRequest::SelectLast).await?) else {
            return Ok(None);
        };

        let malformed = || ClusterError::ProtocolViolation(format!("malformed last sync: {reply}"));
        let (date, duration) = reply.split_once(' ').ok_or_else(malformed)?;
        let date = date
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .ok_or_else(malformed)?;
        let duration = duration.trim().parse::<f64>().map_err(|_| malformed())?;

        Ok(Some(LastSync { date, duration }))
    }
}

fn non_blank(reply: String) -> Option<String> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Rows look like `name*status name*status ...`
fn parse_file_rows(reply: &str) -> Vec<(String, String)> {
    reply
        .split_whitespace()
        .filter_map(|row| {
            row.split_once('*')
                .map(|(file, status)| (file.to_string(), status.to_string()))
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::fake::{self, FakeState};
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_wire_format() {
        assert_eq!(StoreRequest::GetIp("node01").to_wire(), "getip node01");
        assert_eq!(StoreRequest::SelectActual.to_wire(), "selactual");
        assert_eq!(
            StoreRequest::InsertName { name: "node02", addr: "10.0.0.2" }.to_wire(),
            "insertname node02 10.0.0.2"
        );
        assert_eq!(
            StoreRequest::Select { manager: "10.0.0.2", limit: 100, offset: 200 }.to_wire(),
            "select 10.0.0.2 100 200"
        );
    }

    #[test]
    fn test_parse_file_rows() {
        let rows = parse_file_rows("/etc/rules.xml*synchronized /etc/dec.xml*pending ");
        assert_eq!(
            rows,
            vec![
                ("/etc/rules.xml".to_string(), "synchronized".to_string()),
                ("/etc/dec.xml".to_string(), "pending".to_string()),
            ]
        );
        assert!(parse_file_rows("").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_sixth_attempt() {
        let calls = AtomicU32::new(0);
        let result = connect_with_retry(100, Duration::from_secs(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= 5 {
                    Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(assert_ok!(result), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_no_retry_fails_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = connect_with_retry(1, Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)) }
        })
        .await;

        let err = assert_err!(result);
        assert!(matches!(err, ClusterError::CoordinationUnavailable { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_socket_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let retry = RetryPolicy {
            max_attempts: 3,
            interval: Duration::from_millis(5),
        };
        let store = CoordinationStore::new(fake::socket_in(&dir), retry);

        let err = store.connect(true).await.unwrap_err();
        assert!(matches!(err, ClusterError::CoordinationUnavailable { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_shared_session_batches_operations() {
        let fake = fake::spawn(FakeState::default());
        let mut conn = fake.store.connect(true).await.unwrap();
        let mut session = Session::from(&mut conn);

        session.record_binding("node02", "10.0.0.2").await.unwrap();
        assert_eq!(session.get_ip("node02").await.unwrap().as_deref(), Some("10.0.0.2"));
        assert_eq!(session.get_name("10.0.0.2").await.unwrap().as_deref(), Some("node02"));
        assert_eq!(session.get_ip("node09").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_active_master_lookup() {
        let fake = fake::spawn(FakeState::default());
        let mut session = fake.store.session();

        assert_eq!(session.get_active_master().await.unwrap(), ActiveMaster::default());

        session.record_binding("node01", "10.0.0.1").await.unwrap();
        session.record_active_master("node01").await.unwrap();
        let master = session.get_active_master().await.unwrap();
        assert_eq!(master.name.as_deref(), Some("node01"));
        assert_eq!(master.url.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_last_sync() {
        let fake = fake::spawn(FakeState {
            last_sync: Some("1700000000 2.5".into()),
            ..Default::default()
        });

        let last = fake.store.session().last_sync().await.unwrap().unwrap();
        assert_eq!(last.date.timestamp(), 1_700_000_000);
        assert_eq!(last.duration, 2.5);
    }
}

//! Terminator-delimited RPC frames.
//!
//! ```text
//! request  = token(command) [ "." token(payload) ] TERMINATOR
//! response = token(json {error, data})              TERMINATOR
//! ```

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use fleet_common::constants::rpc::{CHUNK_SIZE, PAYLOAD_SEPARATOR, TERMINATOR};
use fleet_common::{ClusterError, RpcResponse};

use super::crypto::ClusterCipher;

/// Decrypted request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: String,
    pub payload: Option<Vec<u8>>,
}

/// Seal a request into a ready-to-send frame
pub fn encode_request(
    cipher: &ClusterCipher,
    command: &str,
    payload: Option<&[u8]>,
) -> Result<Vec<u8>, ClusterError> {
    let mut frame = cipher.encrypt(command.as_bytes())?;
    if let Some(payload) = payload {
        frame.push(PAYLOAD_SEPARATOR);
        frame.extend(cipher.encrypt(payload)?);
    }
    frame.extend_from_slice(TERMINATOR);
    Ok(frame)
}

/// Open a request body (terminator already stripped)
pub fn decode_request(
    cipher: &ClusterCipher,
    body: &[u8],
    peer: &str,
) -> Result<Request, ClusterError> {
    let (command, payload) = match body.iter().position(|b| *b == PAYLOAD_SEPARATOR) {
        Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
        None => (body, None),
    };

    let command = String::from_utf8(cipher.decrypt(command, peer)?)
        .map_err(|_| ClusterError::ProtocolViolation("command is not UTF-8".into()))?;
    let payload = payload.map(|p| cipher.decrypt(p, peer)).transpose()?;

    Ok(Request { command, payload })
}

/// Seal a response into a ready-to-send frame
pub fn encode_response(
    cipher: &ClusterCipher,
    response: &RpcResponse,
) -> Result<Vec<u8>, ClusterError> {
    let json = serde_json::to_vec(response)
        .map_err(|e| ClusterError::Internal(format!("response encoding failed: {e}")))?;
    let mut frame = cipher.encrypt(&json)?;
    frame.extend_from_slice(TERMINATOR);
    Ok(frame)
}

/// Open a response body (terminator already stripped)
pub fn decode_response(
    cipher: &ClusterCipher,
    body: &[u8],
    peer: &str,
) -> Result<RpcResponse, ClusterError> {
    let json = cipher.decrypt(body, peer)?;
    serde_json::from_slice(&json).map_err(|e| {
        ClusterError::ProtocolViolation(format!("malformed response from {peer}: {e}"))
    })
}

/// Offset of the first terminator in `buf`, searching from `from`
pub fn find_terminator(buf: &[u8], from: usize) -> Option<usize> {
    let start = from.min(buf.len());
    buf[start..]
        .windows(TERMINATOR.len())
        .position(|w| w == TERMINATOR)
        .map(|pos| start + pos)
}

/// Read until the terminator; returns the body without it.
/// The whole read, not each chunk, must finish within `deadline`, and the
/// body may not grow past `max_size`.
pub async fn read_frame<R>(
    reader: &mut R,
    deadline: Duration,
    max_size: usize,
    peer: &str,
) -> Result<Vec<u8>, ClusterError>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(deadline, read_until_terminator(reader, max_size, peer))
        .await
        .map_err(|_| ClusterError::Timeout(format!("waiting for frame from {peer}")))?
}

async fn read_until_terminator<R>(
    reader: &mut R,
    max_size: usize,
    peer: &str,
) -> Result<Vec<u8>, ClusterError>
where
    R: AsyncRead + Unpin,
{
    let mut received = Vec::new();
    let mut chunk = [0u8; CHUNK_SIZE];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(ClusterError::ProtocolViolation(format!(
                "{peer} closed the connection before the terminator"
            )));
        }

        // the terminator may straddle two reads
        let search_from = received.len().saturating_sub(TERMINATOR.len() - 1);
        received.extend_from_slice(&chunk[..n]);

        if let Some(end) = find_terminator(&received, search_from) {
            received.truncate(end);
            return Ok(received);
        }
        if received.len() > max_size {
            return Err(ClusterError::ProtocolViolation(format!(
                "frame from {peer} exceeds {max_size} bytes"
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> ClusterCipher {
        ClusterCipher::new("c98b62a9b6169ac5f67dae55ae4a9088").unwrap()
    }

    #[test]
    fn test_request_with_payload() {
        let cipher = cipher();
        let frame = encode_request(&cipher, "zip 3 aaaa", Some(b"\x00binary\n\t\t\n")).unwrap();

        let end = find_terminator(&frame, 0).unwrap();
        assert_eq!(end + TERMINATOR.len(), frame.len());

        let request = decode_request(&cipher, &frame[..end], "peer").unwrap();
        assert_eq!(request.command, "zip 3 aaaa");
        assert_eq!(request.payload.as_deref(), Some(&b"\x00binary\n\t\t\n"[..]));
    }

    #[test]
    fn test_request_without_payload() {
        let cipher = cipher();
        let frame = encode_request(&cipher, "node aaaa", None).unwrap();
        let end = find_terminator(&frame, 0).unwrap();

        let request = decode_request(&cipher, &frame[..end], "peer").unwrap();
        assert_eq!(request.payload, None);
    }

    #[test]
    fn test_find_terminator_across_reads() {
        let buf = b"abc\n\t\t\nrest";
        assert_eq!(find_terminator(buf, 0), Some(3));
        assert_eq!(find_terminator(buf, 2), Some(3));
        assert_eq!(find_terminator(buf, 4), None);
        assert_eq!(find_terminator(b"ab", 10), None);
    }

    #[tokio::test]
    async fn test_read_frame_split_terminator() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for piece in [&b"body\n\t"[..], &b"\t\nignored"[..]] {
                tx.write_all(piece).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let body = read_frame(&mut rx, Duration::from_secs(1), 1024, "peer")
            .await
            .unwrap();
        assert_eq!(body, b"body");
    }

    #[tokio::test]
    async fn test_read_frame_eof() {
        let (tx, mut rx) = tokio::io::duplex(64);
        drop(tx);
        assert!(matches!(
            read_frame(&mut rx, Duration::from_secs(1), 1024, "peer").await,
            Err(ClusterError::ProtocolViolation(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_frame_deadline_covers_trickling_peer() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            // each byte arrives well inside the deadline, the frame never does
            for _ in 0..100 {
                if tx.write_all(b"x").await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(400)).await;
            }
        });

        let result = read_frame(&mut rx, Duration::from_secs(1), 1024, "peer").await;
        assert!(matches!(result, Err(ClusterError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_read_frame_size_cap() {
        let (mut tx, mut rx) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let _ = tx.write_all(&[b'x'; 2048]).await;
        });

        let err = read_frame(&mut rx, Duration::from_secs(1), 1024, "peer")
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::ProtocolViolation(ref m) if m.contains("exceeds")));
    }

    #[test]
    fn test_malformed_response_json() {
        let cipher = cipher();
        let body = cipher.encrypt(b"not json").unwrap();
        assert!(matches!(
            decode_response(&cipher, &body, "peer"),
            Err(ClusterError::ProtocolViolation(_))
        ));
    }
}

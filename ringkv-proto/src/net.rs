//! Fire-and-forget message delivery.
//!
//! A sender opens a short-lived connection, writes one frame, and closes.
//! There is no response channel: replies arrive as fresh inbound
//! connections on the receiver's own listener. A single overall deadline
//! keeps one unreachable peer from stalling the caller.

use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::message::{Envelope, ProtocolError, serialize};

/// Connect + write + close must finish within this window.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(3);

/// Inbound frames larger than this are truncated by the receiver and fail
/// codec validation. Control messages and short values fit comfortably.
pub const MAX_FRAME_BYTES: u64 = 4096;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("send to {addr} timed out")]
    Timeout { addr: String },

    #[error("send to {addr} failed: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Deliver one pre-encoded frame to `ip:port`.
pub async fn send_bytes(ip: &str, port: u16, bytes: &[u8]) -> Result<(), SendError> {
    let addr = format!("{ip}:{port}");
    let attempt = async {
        let mut stream = TcpStream::connect(&addr).await?;
        stream.write_all(bytes).await?;
        stream.shutdown().await?;
        Ok::<(), std::io::Error>(())
    };
    match tokio::time::timeout(SEND_TIMEOUT, attempt).await {
        Ok(Ok(())) => {
            tracing::debug!(%addr, bytes = bytes.len(), "frame sent");
            Ok(())
        }
        Ok(Err(source)) => Err(SendError::Io { addr, source }),
        Err(_) => Err(SendError::Timeout { addr }),
    }
}

/// Encode and deliver one envelope to `ip:port`.
pub async fn send_envelope(ip: &str, port: u16, envelope: &Envelope) -> Result<(), SendError> {
    let bytes = serialize(envelope)?;
    send_bytes(ip, port, &bytes).await
}

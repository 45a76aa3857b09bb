//! Framed connection I/O: 4-byte big-endian length prefix, 1 MiB cap, and a
//! bounded send timeout so a slow peer cannot stall the dispatch loop.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StrandError};

/// Frame size cap in both directions.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Upper bound on a single framed write.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Server-side connection state. Reads happen on the owning reader task;
/// writes are serialized through the write mutex (the reader and the
/// dispatch loop both send frames).
pub struct Connection {
    pub id: u64,
    pub peer: String,
    pub token: CancellationToken,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    active: AtomicBool,
    inflight: parking_lot::Mutex<HashSet<u64>>,
}

impl Connection {
    pub fn new(id: u64, peer: String, token: CancellationToken, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            peer,
            token,
            writer: tokio::sync::Mutex::new(writer),
            active: AtomicBool::new(true),
            inflight: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Mark the connection closed; returns false when it already was.
    pub fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    pub fn track_inflight(&self, txn_id: u64) {
        self.inflight.lock().insert(txn_id);
    }

    pub fn clear_inflight(&self, txn_id: u64) {
        self.inflight.lock().remove(&txn_id);
    }

    pub fn drain_inflight(&self) -> Vec<u64> {
        self.inflight.lock().drain().collect()
    }

    /// Write one frame under the send timeout. Oversized payloads and
    /// timeouts are errors; the caller closes the connection on any error.
    pub async fn write_frame(&self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() || payload.len() > MAX_FRAME_SIZE {
            return Err(StrandError::Protocol(format!(
                "outbound frame of {} bytes exceeds cap",
                payload.len()
            )));
        }

        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
            writer.write_all(payload).await?;
            writer.flush().await
        };

        match tokio::time::timeout(SEND_TIMEOUT, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StrandError::Network(format!("send: {}", e))),
            Err(_) => Err(StrandError::Network("send timed out".into())),
        }
    }

    pub async fn shutdown_writer(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Read one frame. `Ok(None)` is a clean EOF at a frame boundary; a zero or
/// oversized length, or EOF mid-frame, is an error.
pub async fn read_frame(reader: &mut OwnedReadHalf) -> Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(StrandError::Network(format!("recv: {}", e))),
    }

    let length = u32::from_be_bytes(prefix) as usize;
    if length == 0 || length > MAX_FRAME_SIZE {
        return Err(StrandError::Protocol(format!(
            "inbound frame length {} outside (0, {}]",
            length, MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; length];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| StrandError::Network(format!("recv payload: {}", e)))?;
    Ok(Some(payload))
}

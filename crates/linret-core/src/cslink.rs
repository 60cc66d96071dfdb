//! CSLink: the upstream control-server-facing TCP endpoint.
//!
//! A dedicated `tokio` runtime hosts one acceptor task; each accepted
//! connection gets its own reader task and writer task. The reader decodes
//! the 24-byte CS header plus its payload and forwards the typed request to
//! Coordinator; the writer drains a per-connection outbound queue with a
//! 100 ms timeout and serializes Coordinator's responses back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};

use crate::bus::Bus;
use crate::protocol::cs::header::{CsHeader, HEADER_SZ};
use crate::protocol::cs::request::{self, CsRequest};
use crate::types::Serial;

/// A decoded CS request, tagged with the connection it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct CsInboundFrame {
    pub conn_id: u64,
    pub header: CsHeader,
    pub request: CsRequest,
}

/// A response Coordinator hands back, addressed to a specific connection.
pub struct CsOutboundFrame {
    pub header: CsHeader,
    pub payload: Vec<u8>,
}

/// Frame- and connection-level counters the monitoring façade would read.
#[derive(Default)]
pub struct CsLinkStats {
    pub frame_errors: AtomicU64,
    pub connections_accepted: AtomicU64,
}

type OutboundTx = mpsc::UnboundedSender<CsOutboundFrame>;

struct ConnectionSlot {
    outbound: OutboundTx,
    /// The source serial of the first inbound frame on this connection,
    /// adopted as the CS's identity for the life of the connection.
    identity: Option<Serial>,
}

/// Registry of live per-connection outbound queues. Shared between the
/// acceptor (inserts/removes on connect/disconnect) and whatever bridges
/// Coordinator's responses back to the right writer task.
#[derive(Default, Clone)]
pub struct CsConnections {
    inner: Arc<Mutex<HashMap<u64, ConnectionSlot>>>,
}

impl CsConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `frame` to `conn_id`'s writer task. A vanished connection (no
    /// client) is simply dropped: the outbound queue is unbounded per
    /// connection but has nothing to retry against once the client is gone.
    pub async fn send(&self, conn_id: u64, frame: CsOutboundFrame) {
        let map = self.inner.lock().await;
        if let Some(slot) = map.get(&conn_id) {
            let _ = slot.outbound.send(frame);
        }
    }

    /// The serial this connection has adopted as its CS identity, if any
    /// frame has arrived yet.
    pub async fn identity(&self, conn_id: u64) -> Option<Serial> {
        self.inner.lock().await.get(&conn_id).and_then(|s| s.identity)
    }

    async fn register(&self, conn_id: u64, outbound: OutboundTx) {
        self.inner.lock().await.insert(conn_id, ConnectionSlot { outbound, identity: None });
    }

    async fn adopt_identity(&self, conn_id: u64, serial: Serial) {
        if let Some(slot) = self.inner.lock().await.get_mut(&conn_id) {
            if slot.identity.is_none() {
                slot.identity = Some(serial);
            }
        }
    }

    async fn remove(&self, conn_id: u64) {
        self.inner.lock().await.remove(&conn_id);
    }
}

/// Runs the acceptor loop: one reader + one writer task per accepted
/// connection. Runs until `listener` itself errors out; a per-connection
/// failure only ever ends that connection's two tasks.
pub async fn run_acceptor(
    listener: TcpListener,
    inbound_tx: Bus<CsInboundFrame>,
    connections: CsConnections,
    stats: Arc<CsLinkStats>,
) {
    let next_id = AtomicU64::new(1);
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("CSLink accept failed: {e}");
                continue;
            }
        };
        let conn_id = next_id.fetch_add(1, Ordering::Relaxed);
        stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
        log::info!("CSLink connection {conn_id} from {peer}");

        let (tx, rx) = mpsc::unbounded_channel();
        connections.register(conn_id, tx).await;

        let (read_half, write_half) = tokio::io::split(stream);
        let inbound_tx = inbound_tx.clone();
        let connections_reader = connections.clone();
        let stats_reader = Arc::clone(&stats);
        tokio::spawn(async move {
            run_reader(conn_id, read_half, inbound_tx, &connections_reader, &stats_reader).await;
            connections_reader.remove(conn_id).await;
        });
        tokio::spawn(run_writer(write_half, rx));
    }
}

/// Reads `(header, payload)` frames until the peer resets or a framing
/// fault makes the stream unrecoverable — on reset, both tasks exit cleanly.
/// A malformed header is counted and ends the connection; there is no
/// byte-resync strategy for a corrupted TCP stream.
async fn run_reader<R: AsyncRead + Unpin>(
    conn_id: u64,
    mut read_half: R,
    inbound_tx: Bus<CsInboundFrame>,
    connections: &CsConnections,
    stats: &CsLinkStats,
) {
    let mut header_buf = [0u8; HEADER_SZ];
    loop {
        if read_half.read_exact(&mut header_buf).await.is_err() {
            log::debug!("CSLink {conn_id} reader closing");
            return;
        }
        let header = match CsHeader::from_bytes(&header_buf) {
            Ok(h) => h,
            Err(e) => {
                stats.frame_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("CSLink {conn_id} bad header ({e}), dropping connection");
                return;
            }
        };
        connections.adopt_identity(conn_id, header.src_serial).await;

        let mut payload = vec![0u8; header.payload_length as usize];
        if !payload.is_empty() && read_half.read_exact(&mut payload).await.is_err() {
            log::debug!("CSLink {conn_id} reader closing mid-payload");
            return;
        }

        match request::decode(&header, &payload) {
            Ok(req) => {
                inbound_tx.push(CsInboundFrame { conn_id, header, request: req });
            }
            Err(e) => {
                stats.frame_errors.fetch_add(1, Ordering::Relaxed);
                log::debug!("CSLink {conn_id} undecodable request ({e}), ignored");
            }
        }
    }
}

/// Drains the outbound queue with a 100 ms timeout, so the task notices a
/// closed sender (connection torn down) promptly even with nothing queued.
async fn run_writer<W: AsyncWrite + Unpin>(mut write_half: W, mut rx: mpsc::UnboundedReceiver<CsOutboundFrame>) {
    loop {
        let frame = match tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(_) => continue,
        };
        let header_bytes = frame.header.to_bytes(frame.payload.len() as u32);
        if write_half.write_all(&header_bytes).await.is_err() {
            return;
        }
        if !frame.payload.is_empty() && write_half.write_all(&frame.payload).await.is_err() {
            return;
        }
        if write_half.flush().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cs::header::PacketType;

    fn lr_state_request(src: Serial) -> Vec<u8> {
        let header = CsHeader {
            cs_cmd_type: PacketType::LrStateRequest,
            session_id: 1,
            src_serial: src,
            dst_serial: Serial([0; 8]),
            payload_length: 0,
        };
        header.to_bytes(0).to_vec()
    }

    #[tokio::test]
    async fn well_formed_frame_is_forwarded_and_identity_adopted() {
        let (client, server) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(server);
        let (inbound_tx, inbound_rx) = Bus::new(8);
        let connections = CsConnections::new();
        connections.register(1, mpsc::unbounded_channel().0).await;
        let stats = CsLinkStats::default();

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(&lr_state_request(Serial([9; 8]))).await.unwrap();
        drop(client_write); // let the reader observe EOF after one frame

        run_reader(1, read_half, inbound_tx, &connections, &stats).await;
        drop(write_half);
        let _ = &mut client_read; // keep alive until after the reader runs

        let frame = inbound_rx.try_recv().unwrap();
        assert_eq!(frame.conn_id, 1);
        assert_eq!(frame.request, CsRequest::LrState);
        assert_eq!(connections.identity(1).await, Some(Serial([9; 8])));
        assert_eq!(stats.frame_errors.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn bad_magic_is_counted_and_ends_the_connection() {
        let (client, server) = tokio::io::duplex(4096);
        let (read_half, _write_half) = tokio::io::split(server);
        let (inbound_tx, inbound_rx) = Bus::new(8);
        let connections = CsConnections::new();
        connections.register(2, mpsc::unbounded_channel().0).await;
        let stats = CsLinkStats::default();

        let (_client_read, mut client_write) = tokio::io::split(client);
        let mut bad = [0u8; HEADER_SZ];
        bad[0] = 0x00; // wrong magic
        client_write.write_all(&bad).await.unwrap();
        drop(client_write);

        run_reader(2, read_half, inbound_tx, &connections, &stats).await;
        assert!(inbound_rx.try_recv().is_err());
        assert_eq!(stats.frame_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn writer_serializes_queued_response() {
        let (client, server) = tokio::io::duplex(4096);
        let (_read_half, write_half) = tokio::io::split(server);
        let (tx, rx) = mpsc::unbounded_channel();

        let header = CsHeader {
            cs_cmd_type: PacketType::AckNakResponse,
            session_id: 1,
            src_serial: Serial([0; 8]),
            dst_serial: Serial([1; 8]),
            payload_length: 1,
        };
        tx.send(CsOutboundFrame { header, payload: vec![1] }).unwrap();
        drop(tx); // writer exits once the queue is drained and closed

        let writer = tokio::spawn(run_writer(write_half, rx));
        let (mut client_read, _client_write) = tokio::io::split(client);
        let mut buf = vec![0u8; HEADER_SZ + 1];
        client_read.read_exact(&mut buf).await.unwrap();
        writer.await.unwrap();

        let decoded = CsHeader::from_bytes(&buf[..HEADER_SZ]).unwrap();
        assert_eq!(decoded.cs_cmd_type, PacketType::AckNakResponse);
        assert_eq!(buf[HEADER_SZ], 1);
    }
}

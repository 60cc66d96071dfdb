//! Web-based diagnostic monitor for a linret gateway.
//!
//! The gateway process runs entirely on blocking OS threads and a dedicated
//! tokio runtime, and hands diagnostic snapshots to this crate over a plain
//! `crossbeam-channel`. A `spawn_blocking` task bridges that channel into a
//! `tokio::sync::broadcast` channel the web server fans out to clients.

pub mod model;
mod server;

use log::{error, info};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[cfg(feature = "in-process")]
use crate::model::DiagnosticSnapshot;
#[cfg(feature = "in-process")]
use crossbeam_channel::Receiver;
#[cfg(feature = "in-process")]
use tokio::sync::broadcast;

const BROADCAST_CHANNEL_CAPACITY: usize = 32;

/// Starts the monitor's web server on `port`, bridging `receiver` (fed by
/// the gateway's own threads, at least once a second) into WebSocket
/// broadcasts. Intended to run in its own tokio task alongside the gateway's
/// other component threads, never blocking them.
#[cfg(feature = "in-process")]
pub async fn start_in_process_monitor(port: u16, receiver: Receiver<DiagnosticSnapshot>) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);

    let (snapshot_tx, _) = broadcast::channel::<DiagnosticSnapshot>(BROADCAST_CHANNEL_CAPACITY);

    let bridge_tx = snapshot_tx.clone();
    tokio::task::spawn_blocking(move || {
        info!("starting gateway-to-monitor channel bridge");
        while let Ok(snapshot) = receiver.recv() {
            if let Err(e) = bridge_tx.send(snapshot) {
                error!("no monitor clients subscribed, dropping snapshot: {e}");
            }
        }
        info!("gateway-to-monitor channel bridge shut down");
    });

    server::start_web_server(addr, snapshot_tx).await;
    Ok(())
}

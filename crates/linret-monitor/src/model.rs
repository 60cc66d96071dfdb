//! Defines the core data structures for diagnostic monitoring.
//!
//! These DTOs mirror `linret_core::coordinator::CoreStats` and
//! `linret_core::device::DeviceHealth` to provide a stable serialization API
//! that doesn't force the core crate itself to depend on `serde::Serialize`
//! for types it only ever builds, never parses.

use serde::Serialize;

/// A serializable snapshot of a single chassis device's health, as seen by
/// Coordinator.
#[derive(Serialize, Clone, Debug)]
pub struct DeviceSnapshot {
    pub full_addr: u16,
    pub if_type: String,
    pub addr: u8,
    pub batt_color: String,
    pub gps_color: String,
    pub synced: bool,
    pub loss_rate: f64,
    pub mean_latency_ms: Option<f64>,
}

/// Coordinator- and StreamEngine-level counters, mirroring `CoreStats` plus
/// the stream job queue's drop counter.
#[derive(Serialize, Clone, Debug, Default)]
pub struct LinkCounters {
    pub queue_full_drops: u64,
    pub invalid_packets_dropped: u64,
    pub rx_packets_dropped: u64,
    pub cs_rx_packet_errors: u64,
    pub stream_queue_full_drops: u64,
    pub cslink_frame_errors: u64,
    pub chassis_header_errors: u64,
    pub chassis_extra_bytes: u64,
    pub chassis_sequence_errors: u64,
    pub chassis_connected: bool,
}

/// The main data packet sent from the gateway process to the monitor.
#[derive(Serialize, Clone, Debug)]
pub struct DiagnosticSnapshot {
    pub acq_mode: String,
    pub n_devices: usize,
    pub devices: Vec<DeviceSnapshot>,
    pub counters: LinkCounters,
}

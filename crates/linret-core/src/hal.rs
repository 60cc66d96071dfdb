//! Platform abstraction traits.
//!
//! These are the only seams through which the coordination fabric touches
//! the outside world. Every component (`ChassisLink`, `TimeBase`,
//! `StreamEngine`) is generic over one of these, so the platform-specific
//! crate only needs to provide an implementation, never change the core.

use std::time::Duration;

use crate::error::LinretError;
use crate::types::Serial;

/// Raw L2 Ethernet send/receive, used by `ChassisLink`.
///
/// Mirrors a portable `NetworkInterface`: the core protocol logic never
/// touches a socket directly, only this trait.
pub trait L2Endpoint {
    /// Sends a raw Ethernet frame, including the Ethernet header.
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), LinretError>;

    /// Blocks up to `timeout` for a single frame, writing it into `buffer`.
    /// Returns the number of bytes read, or `Ok(0)` on timeout.
    fn receive_frame(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, LinretError>;

    /// The local MAC address of the interface this endpoint is bound to.
    fn local_mac_address(&self) -> [u8; 6];
}

/// A source of GPS NMEA sentence lines, used by `TimeBase`.
///
/// The serial port and line-buffering live on the platform side; the core
/// only ever asks for the next line.
pub trait GpsLineSource {
    /// Blocks up to `timeout` for the next NMEA sentence. `None` on timeout.
    fn read_line(&mut self, timeout: Duration) -> Option<String>;

    /// Closes and reopens the underlying port, e.g. after repeated garbage.
    fn reopen(&mut self) -> Result<(), LinretError>;
}

/// One completed node's worth of reassembled acquisition data, as handed to
/// `Sink::insert_many` on a sub-job's `FINISHED` transition. Field set
/// matches the persisted-document shape (`serial`, `time_start` in ns,
/// `samples_count`, `frequency` code, `channels`/`gain` bitmasks, `data`).
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRecord {
    pub serial: Serial,
    pub time_start_ns: i64,
    pub samples_count: u32,
    pub frequency_code: u8,
    pub channels_bitmask: u8,
    pub gain_bitmask: u16,
    pub data: Vec<u8>,
}

/// The persistence boundary streamed waveform data is written through.
///
/// `StreamEngine` never knows whether packets land in a file, a database, or
/// a test-only in-memory buffer.
pub trait Sink {
    /// Inserts a batch of completed per-node records in a single bulk call.
    fn insert_many(&mut self, records: &[PersistedRecord]) -> Result<(), LinretError>;

    /// Per-serial max-merge on `time_start_ns`: advances that serial's
    /// latest-known collection instant, never moving it backwards.
    fn upsert_max(&mut self, serial: Serial, time_start_ns: i64) -> Result<(), LinretError>;
}

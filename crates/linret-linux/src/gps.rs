//! A serial-port-backed `GpsLineSource`.
//!
//! Reads a 9600-baud NMEA stream line by line with a fixed read timeout.
//! `TimeBase` runs on its own blocking OS thread rather than inside the
//! tokio runtime, so this uses the synchronous `serialport` crate instead of
//! its async counterpart.

use std::io::{BufRead, BufReader};
use std::time::Duration;

use linret_core::error::LinretError;
use linret_core::hal::GpsLineSource;

pub struct SerialGpsSource {
    port_path: String,
    baud_rate: u32,
    reader: Option<BufReader<Box<dyn serialport::SerialPort>>>,
}

impl SerialGpsSource {
    pub fn new(port_path: impl Into<String>, baud_rate: u32) -> Self {
        SerialGpsSource {
            port_path: port_path.into(),
            baud_rate,
            reader: None,
        }
    }

    fn open(&mut self, timeout: Duration) -> Result<(), LinretError> {
        let port = serialport::new(&self.port_path, self.baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| {
                log::error!("failed to open GPS port {}: {e}", self.port_path);
                LinretError::InternalError("failed to open GPS serial port")
            })?;
        self.reader = Some(BufReader::new(port));
        Ok(())
    }
}

impl GpsLineSource for SerialGpsSource {
    fn read_line(&mut self, timeout: Duration) -> Option<String> {
        if self.reader.is_none() && self.open(timeout).is_err() {
            return None;
        }
        let reader = self.reader.as_mut()?;
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => None, // EOF: port went away
            Ok(_) => Some(line.trim_end().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => None,
            Err(e) => {
                log::warn!("GPS read error on {}: {e}", self.port_path);
                None
            }
        }
    }

    fn reopen(&mut self) -> Result<(), LinretError> {
        self.reader = None;
        self.open(Duration::from_millis(500))
    }
}

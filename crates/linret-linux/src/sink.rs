//! A file-backed `Sink`.
//!
//! `linret_core::config::DbConfig` still carries a MongoDB-shaped connection
//! (url/db_name/collections) since that's the documented config surface, but
//! this concrete `Sink` persists to one append-only file per serial under a
//! local data directory instead of a database: one log of records plus a
//! max-`time_start` file, mirroring `data_collection`/`timecache_collection`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use linret_core::error::LinretError;
use linret_core::hal::{PersistedRecord, Sink};
use linret_core::types::Serial;

pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileSink { root: root.into() }
    }

    fn serial_dir(&self, serial: Serial) -> PathBuf {
        self.root.join(format!("serial-{}", serial.hex()))
    }
}

impl Sink for FileSink {
    fn insert_many(&mut self, records: &[PersistedRecord]) -> Result<(), LinretError> {
        for record in records {
            let dir = self.serial_dir(record.serial);
            fs::create_dir_all(&dir).map_err(|e| LinretError::SinkError(e.to_string()))?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("records.log"))
                .map_err(|e| LinretError::SinkError(e.to_string()))?;
            let hex: String = record.data.iter().map(|b| format!("{b:02x}")).collect();
            writeln!(
                file,
                "{} {} {} {} {} {hex}",
                record.time_start_ns, record.samples_count, record.frequency_code, record.channels_bitmask, record.gain_bitmask,
            )
            .map_err(|e| LinretError::SinkError(e.to_string()))?;
        }
        Ok(())
    }

    fn upsert_max(&mut self, serial: Serial, time_start_ns: i64) -> Result<(), LinretError> {
        let dir = self.serial_dir(serial);
        fs::create_dir_all(&dir).map_err(|e| LinretError::SinkError(e.to_string()))?;
        let path = dir.join("max_time_start");
        let current = fs::read_to_string(&path).ok().and_then(|s| s.trim().parse::<i64>().ok());
        if current.map(|c| time_start_ns > c).unwrap_or(true) {
            fs::write(&path, time_start_ns.to_string()).map_err(|e| LinretError::SinkError(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(serial: Serial, time_start_ns: i64, data: &[u8]) -> PersistedRecord {
        PersistedRecord {
            serial,
            time_start_ns,
            samples_count: data.len() as u32,
            frequency_code: 6,
            channels_bitmask: 0b0001,
            gain_bitmask: 0,
            data: data.to_vec(),
        }
    }

    #[test]
    fn insert_many_appends_and_upsert_max_only_advances() {
        let dir = std::env::temp_dir().join(format!("linret-sink-test-{}", std::process::id()));
        let mut sink = FileSink::new(&dir);
        let serial = Serial([1; 8]);

        sink.insert_many(&[record(serial, 1_000, &[0xAA]), record(serial, 2_000, &[0xBB])]).unwrap();
        sink.upsert_max(serial, 1_000).unwrap();
        sink.upsert_max(serial, 5_000).unwrap();
        sink.upsert_max(serial, 2_000).unwrap(); // must not regress

        let log = fs::read_to_string(dir.join(format!("serial-{}", serial.hex())).join("records.log")).unwrap();
        assert_eq!(log, "1000 1 6 1 0 aa\n2000 1 6 1 0 bb\n");
        let max = fs::read_to_string(dir.join(format!("serial-{}", serial.hex())).join("max_time_start")).unwrap();
        assert_eq!(max, "5000");

        fs::remove_dir_all(&dir).ok();
    }
}

//! Command-line entry point: config path and log verbosity.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "linret", about = "Seismic-acquisition chassis gateway and coordinator")]
pub struct Cli {
    /// Path to the persisted JSON configuration file.
    #[arg(long)]
    pub config: std::path::PathBuf,

    /// Log verbosity, 1 (errors only) through 5 (trace).
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=5))]
    pub loglevel: u8,

    /// GPS NMEA serial port device.
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub gps_port: String,

    /// Path to the process-singleton PID/lock file.
    #[arg(long, default_value = "/run/lock/linret.pid")]
    pub pid_file: std::path::PathBuf,

    /// Root directory for the on-disk stream data sink.
    #[arg(long, default_value = "/var/lib/linret/data")]
    pub data_dir: std::path::PathBuf,
}

pub fn loglevel_filter(level: u8) -> log::LevelFilter {
    match level {
        1 => log::LevelFilter::Error,
        2 => log::LevelFilter::Warn,
        3 => log::LevelFilter::Info,
        4 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

//! Unified error type for the linret coordination fabric.
//!
//! Mirrors the shape of a typical portable HAL error enum: every fallible
//! decode/encode path returns `Result<_, LinretError>`, but the five
//! components never let one escape upward — each catches and counts at its
//! own boundary rather than propagating a failure.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinretError {
    /// The provided buffer is too small for the operation.
    BufferTooShort,
    /// A received frame's header failed basic structural validation.
    InvalidHeader,
    /// A value in a frame is not a valid enum variant.
    InvalidEnumValue,
    /// A received chassis frame's `payload_len` is shorter than `chunk_sz`.
    PayloadLengthMismatch,
    /// A two-chunk reassembly saw a chunk out of sequence.
    ChunkSequenceError,
    /// The CS frame header's magic byte or protocol version did not match.
    BadCsMagicOrVersion,
    /// The requested device/serial is not present in the registry.
    UnknownDevice,
    /// The external sink rejected a write. Logged, never retried.
    SinkError(String),
    /// The JSON configuration file could not be parsed.
    ConfigError(String),
    /// A GPS NMEA sentence failed to parse.
    NmeaParseError,
    /// Internal logic error.
    InternalError(&'static str),
}

impl fmt::Display for LinretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooShort => write!(f, "buffer too short"),
            Self::InvalidHeader => write!(f, "invalid frame header"),
            Self::InvalidEnumValue => write!(f, "invalid enum value in frame"),
            Self::PayloadLengthMismatch => write!(f, "payload shorter than chunk_sz"),
            Self::ChunkSequenceError => write!(f, "chunk reassembly sequence error"),
            Self::BadCsMagicOrVersion => write!(f, "bad CS frame magic or version"),
            Self::UnknownDevice => write!(f, "unknown device"),
            Self::SinkError(s) => write!(f, "sink error: {s}"),
            Self::ConfigError(s) => write!(f, "config error: {s}"),
            Self::NmeaParseError => write!(f, "NMEA parse error"),
            Self::InternalError(s) => write!(f, "internal error: {s}"),
        }
    }
}

impl std::error::Error for LinretError {}

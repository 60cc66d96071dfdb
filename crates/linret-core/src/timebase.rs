//! GPS-anchored wall clock: pairs NMEA RMC/GGA sentences into a committed
//! `(unix_time, monotonic_anchor)` fix and exposes `now_true()`.

use std::time::{Duration, Instant};

use crate::error::LinretError;
use crate::hal::GpsLineSource;

/// UTC-to-GPS-time fixed offset applied to every RMC-derived timestamp
/// (`NMEA_OFFSET`).
pub const NMEA_OFFSET_SECS: f64 = 0.14;

/// A fix is considered usable for at most this long past its anchor.
pub const STALE_AFTER: Duration = Duration::from_secs(60);

const GGA_PAIRING_WINDOW: Duration = Duration::from_secs(1);
const MIN_GGA_QUALITY: u8 = 1;
const MIN_GGA_SATS: u8 = 2;

/// A parsed, not-yet-validated RMC sentence.
#[derive(Debug, Clone, Copy)]
struct PendingRmc {
    /// Combined UTC seconds (date + time-of-day) plus `NMEA_OFFSET_SECS`.
    unix_time: f64,
    /// Fractional-second timestamp as printed in the sentence, used only to
    /// match against the paired GGA's own timestamp field.
    sentence_time: f64,
    anchored_at: Instant,
    received_at: Instant,
}

struct CommittedFix {
    unix_time: f64,
    anchored_at: Instant,
}

/// Owns the GPS read loop's pairing state. The serial read itself is
/// injected via [`GpsLineSource`] so this logic is exercised without a real
/// TTY.
pub struct TimeBase {
    use_system_time: bool,
    pending: Option<PendingRmc>,
    committed: Option<CommittedFix>,
}

impl TimeBase {
    pub fn new(use_system_time: bool) -> Self {
        TimeBase {
            use_system_time,
            pending: None,
            committed: None,
        }
    }

    /// Runs one read/pair iteration against `source`. `now` is the caller's
    /// monotonic clock sample, taken once per iteration for testability.
    pub fn poll_once(&mut self, source: &mut dyn GpsLineSource, now: Instant, read_timeout: Duration) {
        let Some(line) = source.read_line(read_timeout) else {
            return;
        };
        match parse_sentence(&line) {
            Some(ParsedSentence::Rmc { unix_time, sentence_time }) => {
                self.pending = Some(PendingRmc {
                    unix_time,
                    sentence_time,
                    anchored_at: now,
                    received_at: now,
                });
            }
            Some(ParsedSentence::Gga { sentence_time, quality, num_sats }) => {
                self.try_commit(sentence_time, quality, num_sats, now);
            }
            None => {}
        }
    }

    fn try_commit(&mut self, gga_time: f64, quality: u8, num_sats: u8, now: Instant) {
        let Some(pending) = self.pending else { return };
        if (gga_time - pending.sentence_time).abs() > f64::EPSILON {
            return;
        }
        if now.saturating_duration_since(pending.received_at) > GGA_PAIRING_WINDOW {
            return;
        }
        if quality < MIN_GGA_QUALITY || num_sats < MIN_GGA_SATS {
            return;
        }
        self.committed = Some(CommittedFix {
            unix_time: pending.unix_time,
            anchored_at: pending.anchored_at,
        });
        self.pending = None;
    }

    /// Called on a serial read error: discards all pairing state so the
    /// first second after reopening is discarded, matching the reference.
    pub fn on_reopen(&mut self) {
        self.pending = None;
    }

    /// Returns the current true-time estimate, or `None` if the last
    /// committed fix is stale (or none exists) and system-time mode is off.
    pub fn now_true(&self, now: Instant, wall_clock_unix: f64) -> Option<f64> {
        if self.use_system_time {
            return Some(wall_clock_unix);
        }
        let fix = self.committed.as_ref()?;
        let age = now.saturating_duration_since(fix.anchored_at);
        if age > STALE_AFTER {
            return None;
        }
        Some(fix.unix_time + age.as_secs_f64())
    }
}

enum ParsedSentence {
    Rmc { unix_time: f64, sentence_time: f64 },
    Gga { sentence_time: f64, quality: u8, num_sats: u8 },
}

/// Parses the fields this component needs out of `$..RMC`/`$..GGA`
/// sentences. Checksum verification and every other NMEA sentence type are
/// out of scope — this is not a general NMEA parser.
fn parse_sentence(line: &str) -> Option<ParsedSentence> {
    let line = line.trim().trim_start_matches('$');
    let fields: Vec<&str> = line.split(',').collect();
    let kind = fields.first()?;
    if kind.ends_with("RMC") {
        let time_str = fields.get(1)?;
        let date_str = fields.get(9)?;
        let sentence_time: f64 = time_str.parse().ok()?;
        let hh: u32 = time_str.get(0..2)?.parse().ok()?;
        let mm: u32 = time_str.get(2..4)?.parse().ok()?;
        let ss: f64 = time_str.get(4..)?.parse().ok()?;
        let dd: u32 = date_str.get(0..2)?.parse().ok()?;
        let mon: u32 = date_str.get(2..4)?.parse().ok()?;
        let yy: u32 = date_str.get(4..6)?.parse().ok()?;
        let days_since_epoch = days_from_civil(2000 + yy as i64, mon, dd);
        let unix_time = days_since_epoch as f64 * 86400.0 + hh as f64 * 3600.0 + mm as f64 * 60.0 + ss + NMEA_OFFSET_SECS;
        Some(ParsedSentence::Rmc { unix_time, sentence_time })
    } else if kind.ends_with("GGA") {
        let time_str = fields.get(1)?;
        let sentence_time: f64 = time_str.parse().ok()?;
        let quality: u8 = fields.get(6)?.parse().ok()?;
        let num_sats: u8 = fields.get(7)?.parse().ok()?;
        Some(ParsedSentence::Gga { sentence_time, quality, num_sats })
    } else {
        None
    }
}

/// Howard Hinnant's days-from-civil, used to turn a UTC calendar date into a
/// day count since the Unix epoch without pulling in a chrono dependency
/// for this single conversion.
fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = (m as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

//! Orderly shutdown on SIGINT/SIGUSR1/SIGUSR2.
//!
//! Every component thread suspends only on a bounded queue or socket
//! timeout, so a plain shared flag checked
//! after each wakeup is enough to propagate shutdown promptly without a
//! dedicated signal-handling thread per component.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGUSR1, SIGUSR2};
use signal_hook::flag;

/// Registers SIGINT/SIGUSR1/SIGUSR2 to set `flag`. Returns an error if the
/// registration itself fails (e.g. the signal is already hooked).
pub fn register_shutdown_flag() -> Result<Arc<AtomicBool>, std::io::Error> {
    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGINT, Arc::clone(&shutdown))?;
    flag::register(SIGUSR1, Arc::clone(&shutdown))?;
    flag::register(SIGUSR2, Arc::clone(&shutdown))?;
    Ok(shutdown)
}

//! Process singleton enforcement via an exclusively-locked PID file.
//!
//! Opens with `write(true).create(true).truncate(false)` so an
//! already-running instance's PID is never clobbered before the lock is
//! held, takes an advisory exclusive lock via `fs2`, and only then
//! truncates and writes our own PID.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use fs2::FileExt;

pub struct PidFile {
    #[allow(dead_code)]
    file: File,
}

impl PidFile {
    /// Acquires the singleton lock at `path`. Held for the process lifetime;
    /// the OS releases it automatically if the process dies uncleanly.
    pub fn acquire(path: &Path) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("creating {}: {e}", parent.display()))?;
        }

        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| format!("opening pid file {}: {e}", path.display()))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|e| format!("another linret instance already holds {}: {e}", path.display()))?;

        let mut lock_file = lock_file;
        lock_file.set_len(0).map_err(|e| e.to_string())?;
        writeln!(lock_file, "{}", std::process::id()).map_err(|e| e.to_string())?;

        Ok(PidFile { file: lock_file })
    }
}

//! Wire-level traffic logging.
//!
//! Setting `PELICAN_IMAP_LOGFILE` enables a per-session file sink that
//! records every byte sent and every response received. The session only
//! feeds it once the greeting has been processed, so the pre-greeting
//! handshake never lands in a log file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Environment variable naming the log file path prefix.
pub const LOGFILE_ENV: &str = "PELICAN_IMAP_LOGFILE";

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Per-session wire log sink.
#[derive(Debug)]
pub struct WireLogger {
    file: File,
}

impl WireLogger {
    /// Opens the sink if `PELICAN_IMAP_LOGFILE` is set. Each session gets
    /// its own numbered file next to the configured path.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let prefix = std::env::var_os(LOGFILE_ENV)?;
        let id = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = prefix.into_string().ok()?;
        path.push_str(&format!(".{id}"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|error| {
                tracing::warn!(%error, path, "could not open wire log");
                error
            })
            .ok()?;
        Some(Self { file })
    }

    /// Records bytes written to the server.
    pub fn data_sent(&mut self, data: &[u8]) {
        let _ = self.file.write_all(b"C: ");
        let _ = self.file.write_all(data);
        let _ = self.file.write_all(b"\n");
    }

    /// Records a response received from the server.
    pub fn data_received(&mut self, data: &[u8]) {
        let _ = self.file.write_all(b"S: ");
        let _ = self.file.write_all(data);
        let _ = self.file.write_all(b"\n");
    }

    /// Records that the connection went away.
    pub fn disconnection(&mut self) {
        let _ = self.file.write_all(b"X\n");
    }
}

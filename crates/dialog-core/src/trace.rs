//! SIP message trace
//!
//! When enabled, every message sent or received by the stack is appended to
//! a trace file. The previous trace file is removed when the stack starts.

use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rcs_sip_core::Message;
use tracing::{debug, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

/// Direction marker written before each traced message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    fn marker(&self) -> &'static str {
        match self {
            Direction::Sent => ">>>",
            Direction::Received => "<<<",
        }
    }
}

/// Appends SIP messages to a trace file
pub struct SipTrace {
    path: PathBuf,
    writer: Mutex<NonBlocking>,
    // Flushes pending lines when the trace is dropped
    _guard: WorkerGuard,
}

impl SipTrace {
    /// Starts a fresh trace at `path`, removing any previous file
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed previous SIP trace {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let file_name = path.file_name().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("trace path {} has no file name", path.display()),
            )
        })?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        Ok(Self {
            path,
            writer: Mutex::new(writer),
            _guard: guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sent(&self, message: &Message) {
        self.record(Direction::Sent, message);
    }

    pub fn received(&self, message: &Message) {
        self.record(Direction::Received, message);
    }

    fn record(&self, direction: Direction, message: &Message) {
        let mut entry = String::new();
        let _ = writeln!(entry, "{}", direction.marker());
        let _ = write!(entry, "{}", message);
        entry.push_str("\r\n");
        if let Err(e) = self.writer.lock().write_all(entry.as_bytes()) {
            warn!("Can't write SIP trace: {}", e);
        }
    }
}

impl std::fmt::Debug for SipTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SipTrace").field("path", &self.path).finish()
    }
}

//! Telemetry sinks.
//!
//! A `TelemetrySink` receives one fully encoded line per proxied call. Proxies
//! hold an `Arc<dyn TelemetrySink>` and write to it inline, after the backend
//! call returns. Implementations:
//!
//! - `TracingSink`: emits through `tracing` on the telemetry target.
//! - `FileSink`: appends to a file with a timestamp prefix.
//! - `InMemorySink`: keeps lines in memory for tests and inspection.
//! - `NoopSink`: discards lines, counting them.

use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;

pub use iotrace_logging::TELEMETRY_TARGET;

/// Destination for encoded telemetry lines.
pub trait TelemetrySink: Send + Sync {
    /// Append one line. Must not fail the caller; problems are logged.
    fn append_line(&self, line: &str);

    /// Total number of lines accepted since creation.
    fn total_appended(&self) -> u64;
}

/// Emits each line as an `INFO` event on [`TELEMETRY_TARGET`].
pub struct TracingSink {
    count: AtomicU64,
}

impl TracingSink {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
        }
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySink for TracingSink {
    fn append_line(&self, line: &str) {
        self.count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(target: TELEMETRY_TARGET, "{}", line);
    }

    fn total_appended(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Appends lines to a file, prefixed with an RFC 3339 timestamp and level the
/// way a log framework would.
///
/// The writer is line-buffered, so every record reaches the OS before the
/// proxied call returns. A write failure disables the sink.
pub struct FileSink {
    path: PathBuf,
    writer: Mutex<LineWriter<File>>,
    enabled: AtomicBool,
    count: AtomicU64,
}

impl FileSink {
    /// Open `path` for appending, creating it and its parent directory.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::info!(path = %path.display(), "Opened telemetry file");
        Ok(Self {
            path,
            writer: Mutex::new(LineWriter::new(file)),
            enabled: AtomicBool::new(true),
            count: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn flush(&self) {
        flush_or_warn(&mut *self.writer.lock(), &self.path);
    }
}

/// Flush `writer`, logging a failure instead of returning it.
fn flush_or_warn<W: Write>(writer: &mut W, path: &Path) -> bool {
    match writer.flush() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "Failed to flush telemetry file");
            false
        }
    }
}

impl TelemetrySink for FileSink {
    fn append_line(&self, line: &str) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{} INFO {}", timestamp, line) {
            tracing::error!(
                error = %e,
                path = %self.path.display(),
                "Failed to write telemetry line, disabling file sink"
            );
            self.enabled.store(false, Ordering::Relaxed);
            return;
        }
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn total_appended(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        flush_or_warn(self.writer.get_mut(), &self.path);
    }
}

/// Stores lines in memory. Primarily intended for testing.
#[derive(Default)]
pub struct InMemorySink {
    lines: Mutex<Vec<String>>,
    total: AtomicU64,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the buffered lines.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Take all buffered lines, leaving the buffer empty.
    pub fn take_lines(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }

    pub fn buffered_count(&self) -> usize {
        self.lines.lock().len()
    }

    /// Buffered lines joined into one newline-terminated text, as a log file
    /// would hold them.
    pub fn to_log_text(&self) -> String {
        let lines = self.lines.lock();
        let mut text = String::new();
        for line in lines.iter() {
            text.push_str(line);
            text.push('\n');
        }
        text
    }
}

impl TelemetrySink for InMemorySink {
    fn append_line(&self, line: &str) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.lines.lock().push(line.to_string());
    }

    fn total_appended(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Discards lines. Useful when telemetry is switched off but a proxy still
/// needs a sink.
#[derive(Default)]
pub struct NoopSink {
    count: AtomicU64,
}

impl NoopSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TelemetrySink for NoopSink {
    fn append_line(&self, _line: &str) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn total_appended(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

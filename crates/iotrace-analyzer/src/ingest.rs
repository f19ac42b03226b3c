//! Log ingestion.
//!
//! Scans arbitrary log text for telemetry records. Lines without the record
//! marker are noise and are dropped silently; lines with the marker that cannot
//! be classified or decoded are counted and skipped. Nothing in the content of
//! a log can make a scan fail.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Serialize;

use iotrace_types::{decode, locate, Located, TelemetryRecord};

use crate::error::{AnalyzerError, Result};

/// Line counts from one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub lines: u64,
    /// Lines containing the record marker.
    pub candidates: u64,
    pub decoded: u64,
    /// Candidates that were not turned into records.
    pub skipped: u64,
}

/// Records extracted from one log.
#[derive(Debug, Clone, Default)]
pub struct Ingested {
    pub records: Vec<TelemetryRecord>,
    /// Every operation name seen, sorted.
    pub operations: BTreeSet<String>,
    pub stats: ScanStats,
}

impl Ingested {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn push(&mut self, record: TelemetryRecord) {
        if !self.operations.contains(&record.operation) {
            self.operations.insert(record.operation.clone());
        }
        self.records.push(record);
    }
}

/// Scan a single line into `out`.
fn scan_line(line: &str, out: &mut Ingested) {
    out.stats.lines += 1;
    match locate(line) {
        Located::NotCandidate => {}
        Located::Unclassified => {
            out.stats.candidates += 1;
            out.stats.skipped += 1;
            tracing::debug!(line = out.stats.lines, "Skipping record without kind tag");
        }
        Located::Record(kind, body) => {
            out.stats.candidates += 1;
            match decode(kind, body) {
                Ok(record) => {
                    out.stats.decoded += 1;
                    out.push(record);
                }
                Err(e) => {
                    out.stats.skipped += 1;
                    tracing::debug!(line = out.stats.lines, error = %e, "Skipping undecodable record");
                }
            }
        }
    }
}

/// Scan every line of `reader`. Bytes that are not valid UTF-8 are replaced,
/// so binary garbage in a log only affects the lines it sits on.
pub fn ingest_reader<R: BufRead>(mut reader: R) -> io::Result<Ingested> {
    let mut out = Ingested::default();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        scan_line(line.trim_end_matches(['\n', '\r']), &mut out);
    }
    Ok(out)
}

/// Scan the log file at `path`.
pub fn ingest_file(path: impl AsRef<Path>) -> Result<Ingested> {
    let path = path.as_ref();
    let io_err = |source: io::Error| AnalyzerError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let ingested = ingest_reader(BufReader::new(file)).map_err(io_err)?;
    tracing::info!(
        path = %path.display(),
        lines = ingested.stats.lines,
        records = ingested.stats.decoded,
        skipped = ingested.stats.skipped,
        "Ingested log"
    );
    Ok(ingested)
}

/// Files in `dir` whose names contain `contains` and end with `suffix`, both
/// compared case-insensitively. Sorted by name.
pub fn matching_logs(dir: impl AsRef<Path>, contains: &str, suffix: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let list_err = |source: io::Error| AnalyzerError::ListDir {
        path: dir.to_path_buf(),
        source,
    };
    let contains = contains.to_lowercase();
    let suffix = suffix.to_lowercase();

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(list_err)? {
        let entry = entry.map_err(list_err)?;
        if !entry.file_type().map_err(list_err)?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if name.contains(&contains) && name.ends_with(&suffix) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

//! Offline analysis of iotrace telemetry logs.
//!
//! [`ingest`] pulls records out of arbitrary log text, [`aggregate`] computes
//! per-node totals over them, and [`report`] renders the results.

pub mod aggregate;
pub mod error;
pub mod ingest;
pub mod report;

pub use aggregate::{bytes_per_node, elapsed_per_node, files_per_node, FilesPerNode, NodeTotals};
pub use error::{AnalyzerError, Result};
pub use ingest::{ingest_file, ingest_reader, matching_logs, Ingested, ScanStats};
pub use report::{
    summary_row, OperationTotals, OutputFormat, Printer, Report, DEFAULT_OPERATIONS,
};

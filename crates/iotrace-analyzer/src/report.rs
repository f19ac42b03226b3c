//! Reports over one ingested log, and their output.
//!
//! `Printer` renders a [`Report`] either as column-aligned tables or as JSON.
//! `summary_row` produces the one-line CSV form used to compare many runs.

use std::fmt;
use std::io::Write;

use serde::Serialize;

use iotrace_types::op;

use crate::aggregate::{bytes_per_node, elapsed_per_node, files_per_node, FilesPerNode, NodeTotals};
use crate::ingest::{Ingested, ScanStats};

/// Operations broken out by default.
pub const DEFAULT_OPERATIONS: [&str; 4] = [op::READ, op::READ_FULLY, op::CLOSE, op::OPEN];

/// Label for the unfiltered elapsed-time group in CSV rows.
pub const ALL_OPERATIONS: &str = "all";

/// Elapsed time for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationTotals {
    pub operation: String,
    pub elapsed: NodeTotals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub stats: ScanStats,
    pub bytes: NodeTotals,
    pub elapsed: NodeTotals,
    pub operations: Vec<OperationTotals>,
    pub files: FilesPerNode,
}

impl Report {
    /// Aggregate `ingested`, breaking elapsed time out for each of `operations`
    /// in the order given.
    pub fn build<S: AsRef<str>>(ingested: &Ingested, operations: &[S]) -> Self {
        let records = &ingested.records;
        Self {
            stats: ingested.stats,
            bytes: bytes_per_node(records),
            elapsed: elapsed_per_node(records, None),
            operations: operations
                .iter()
                .map(|op| OperationTotals {
                    operation: op.as_ref().to_string(),
                    elapsed: elapsed_per_node(records, Some(op.as_ref())),
                })
                .collect(),
            files: files_per_node(records),
        }
    }

    /// Report with the default operation breakdown.
    pub fn build_default(ingested: &Ingested) -> Self {
        Self::build(ingested, &DEFAULT_OPERATIONS)
    }

    /// Rows of the totals table: one row per metric and node, then a row for
    /// the metric as a whole.
    pub fn totals_table(&self) -> OutputTable {
        let mut table = table_with_header(&["Metric", "Node", "Total", "Count", "Mean"]);
        push_totals(&mut table, "bytes", &self.bytes);
        push_totals(&mut table, "elapsed_ns", &self.elapsed);
        for op in &self.operations {
            push_totals(&mut table, &format!("elapsed_ns[{}]", op.operation), &op.elapsed);
        }
        table
    }

    pub fn files_table(&self) -> OutputTable {
        let mut table = table_with_header(&["Node", "Subject"]);
        for (node, subjects) in &self.files.per_node {
            for subject in subjects {
                table.push(vec![node.clone(), subject.clone()]);
            }
        }
        table
    }
}

fn push_totals(table: &mut OutputTable, metric: &str, totals: &NodeTotals) {
    for (node, sum) in &totals.per_node {
        table.push(vec![
            metric.to_string(),
            node.clone(),
            sum.to_string(),
            "-".to_string(),
            "-".to_string(),
        ]);
    }
    table.push(vec![
        metric.to_string(),
        "*".to_string(),
        totals.total().to_string(),
        totals.count.to_string(),
        totals.mean().to_string(),
    ]);
}

fn csv_group(out: &mut String, label: &str, totals: &NodeTotals) {
    out.push_str(&format!(
        ",{},{},{},{}",
        totals.count,
        label,
        totals.total(),
        totals.mean()
    ));
}

/// One CSV row summarising a log:
/// `run,file,bytesCount,bytesTotal,bytesMean` followed by
/// `,count,operation,total,mean` for elapsed time over all operations
/// (labelled `all`) and then for each observed operation in sorted order.
pub fn summary_row(run: &str, file: &str, ingested: &Ingested) -> String {
    let records = &ingested.records;
    let bytes = bytes_per_node(records);
    let mut row = format!(
        "{},{},{},{},{}",
        run,
        file,
        bytes.count,
        bytes.total(),
        bytes.mean()
    );
    csv_group(&mut row, ALL_OPERATIONS, &elapsed_per_node(records, None));
    for operation in &ingested.operations {
        csv_group(&mut row, operation, &elapsed_per_node(records, Some(operation)));
    }
    row
}

/// A single row in a table output.
pub type OutputRow = Vec<String>;

/// Rows of a table, the first being the header.
pub type OutputTable = Vec<OutputRow>;

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable column-aligned tables.
    #[default]
    Table,
    /// Machine-readable JSON.
    Json,
}

/// Writes reports and tables in the selected format.
pub struct Printer<W: Write = Box<dyn Write>> {
    out: W,
    format: OutputFormat,
}

impl Printer<Box<dyn Write>> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self {
            out: Box::new(std::io::stdout()),
            format,
        }
    }
}

impl<W: Write> Printer<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self {
            out: writer,
            format,
        }
    }

    /// Print a whole report. Files per node are only included when asked
    /// for, since they grow with the log.
    pub fn print_report(&mut self, report: &Report, include_files: bool) -> std::io::Result<()> {
        match self.format {
            OutputFormat::Table => {
                let s = &report.stats;
                writeln!(
                    self.out,
                    "Scanned {} lines: {} candidates, {} records, {} skipped",
                    s.lines, s.candidates, s.decoded, s.skipped
                )?;
                writeln!(self.out)?;
                self.print_table(&report.totals_table())?;
                if include_files {
                    writeln!(self.out)?;
                    writeln!(self.out, "Files per node: {}", report.files.count())?;
                    self.print_table(&report.files_table())?;
                }
                Ok(())
            }
            OutputFormat::Json => {
                let mut value = serde_json::to_value(report).map_err(std::io::Error::other)?;
                if !include_files {
                    if let Some(obj) = value.as_object_mut() {
                        obj.remove("files");
                    }
                }
                let json = serde_json::to_string_pretty(&value).map_err(std::io::Error::other)?;
                writeln!(self.out, "{}", json)
            }
        }
    }

    pub fn print_table(&mut self, table: &OutputTable) -> std::io::Result<()> {
        if table.is_empty() {
            return Ok(());
        }
        match self.format {
            OutputFormat::Table => self.print_table_aligned(table),
            OutputFormat::Json => self.print_table_json(table),
        }
    }

    /// Print a plain line, unchanged in either format.
    pub fn print_line(&mut self, line: &str) -> std::io::Result<()> {
        writeln!(self.out, "{}", line)
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn print_table_aligned(&mut self, table: &OutputTable) -> std::io::Result<()> {
        const SEPARATOR: &str = "  ";

        let mut widths: Vec<usize> = Vec::new();
        for row in table {
            if widths.len() < row.len() {
                widths.resize(row.len(), 0);
            }
            for (col, cell) in row.iter().enumerate() {
                widths[col] = widths[col].max(cell.len() + SEPARATOR.len());
            }
        }

        for row in table {
            let mut line = String::new();
            for (col, cell) in row.iter().enumerate() {
                line.push_str(cell);
                if col + 1 < row.len() {
                    let padding = widths[col].saturating_sub(cell.len());
                    line.extend(std::iter::repeat(' ').take(padding));
                }
            }
            writeln!(self.out, "{}", line)?;
        }
        Ok(())
    }

    /// First row as keys, one object per remaining row.
    fn print_table_json(&mut self, table: &OutputTable) -> std::io::Result<()> {
        let headers = &table[0];
        let rows: Vec<serde_json::Map<String, serde_json::Value>> = table[1..]
            .iter()
            .map(|row| {
                let mut map = serde_json::Map::new();
                for (i, cell) in row.iter().enumerate() {
                    let key = headers.get(i).cloned().unwrap_or_else(|| format!("col_{}", i));
                    map.insert(key, serde_json::Value::String(cell.clone()));
                }
                map
            })
            .collect();
        let json = serde_json::to_string_pretty(&rows).map_err(std::io::Error::other)?;
        writeln!(self.out, "{}", json)
    }
}

impl<W: Write> fmt::Debug for Printer<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Printer").field("format", &self.format).finish()
    }
}

pub fn table_with_header(headers: &[&str]) -> OutputTable {
    vec![headers.iter().map(|h| h.to_string()).collect()]
}

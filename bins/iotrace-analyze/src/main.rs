use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use iotrace_analyzer::{
    ingest_file, matching_logs, summary_row, OutputFormat, Printer, Report, DEFAULT_OPERATIONS,
};
use iotrace_logging::{init_logging, LogConfig};

/// iotrace log analyzer
///
/// Extracts telemetry records written by the iotrace proxies from log files
/// and aggregates them per node and per operation.
#[derive(Parser, Debug)]
#[command(name = "iotrace-analyze", version, about)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Aggregate one log and print the report.
    Report {
        /// Log file to read.
        log: PathBuf,

        /// Operation to break elapsed time out for. Repeatable; defaults to
        /// read, readFully, close and open.
        #[arg(long = "op")]
        ops: Vec<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Also list the subjects seen per node.
        #[arg(long, default_value_t = false)]
        files: bool,
    },

    /// Print one CSV summary row per matching log in a directory.
    Summarize {
        /// Run name written in the first column.
        #[arg(long)]
        run: String,

        /// Directory holding the logs.
        #[arg(long)]
        dir: PathBuf,

        /// Only files whose name contains this (case-insensitive).
        #[arg(long, default_value = "")]
        contains: String,

        /// Only files whose name ends with this (case-insensitive).
        #[arg(long, default_value = "")]
        suffix: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig {
        level: if cli.verbose { "debug" } else { "warn" }.to_string(),
        ..Default::default()
    };
    let _guards = init_logging(&log_config).context("failed to initialize logging")?;

    match cli.command {
        Command::Report {
            log,
            ops,
            format,
            files,
        } => {
            let ingested = ingest_file(&log)?;
            let report = if ops.is_empty() {
                Report::build(&ingested, &DEFAULT_OPERATIONS[..])
            } else {
                Report::build(&ingested, ops.as_slice())
            };
            Printer::stdout(format).print_report(&report, files)?;
        }
        Command::Summarize {
            run,
            dir,
            contains,
            suffix,
        } => {
            let logs = matching_logs(&dir, &contains, &suffix)?;
            if logs.is_empty() {
                tracing::warn!(dir = %dir.display(), contains = %contains, suffix = %suffix, "No matching logs");
            }
            let mut printer = Printer::stdout(OutputFormat::Table);
            for path in logs {
                let ingested = ingest_file(&path)?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                printer.print_line(&summary_row(&run, &name, &ingested))?;
            }
        }
    }

    Ok(())
}

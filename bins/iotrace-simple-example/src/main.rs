use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;

use iotrace_analyzer::{ingest_file, OutputFormat, Printer, Report};
use iotrace_logging::{init_logging, LogConfig};
use iotrace_proxy::{
    CreateOptions, FileSystemProxy, LocalFileSystem, Permission, ProxyConfig, SinkKind,
};

/// iotrace simple example
///
/// Runs a small read workload through the instrumented proxy over a local
/// directory, writing telemetry to a file, then ingests that file and prints
/// the per-node report.
#[derive(Parser, Debug)]
#[command(name = "iotrace-simple-example", version, about)]
struct Args {
    /// Proxy configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory the local backend is rooted at. Created if missing.
    #[arg(long, default_value = "iotrace-demo")]
    root: PathBuf,

    /// Telemetry file to write and then analyze.
    #[arg(long, default_value = "iotrace-telemetry.log")]
    telemetry: PathBuf,

    /// Number of files in the workload.
    #[arg(long, default_value_t = 4)]
    files: usize,
}

const FILE_SIZE: usize = 64 * 1024;
const READ_SIZE: usize = 8192;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guards = init_logging(&LogConfig::default()).context("failed to initialize logging")?;

    let mut config = match args.config {
        Some(ref path) => ProxyConfig::load(path)?,
        None => ProxyConfig::default(),
    };
    config.sink = SinkKind::File;
    config.telemetry_path = Some(args.telemetry.clone());

    std::fs::create_dir_all(&args.root)
        .with_context(|| format!("cannot create {}", args.root.display()))?;
    let root = args.root.canonicalize()?;
    tracing::info!(root = %root.display(), telemetry = %args.telemetry.display(), "Starting workload");

    {
        let mut proxy = FileSystemProxy::from_config(LocalFileSystem::new(&root), &config)?;
        proxy.initialize(&format!("file://{}", root.display()), &config.to_properties())?;
        run_workload(&proxy, args.files)?;
        proxy.close()?;
    }

    let ingested = ingest_file(&args.telemetry)?;
    let report = Report::build_default(&ingested);
    Printer::stdout(OutputFormat::Table).print_report(&report, false)?;
    Ok(())
}

fn run_workload(proxy: &FileSystemProxy<LocalFileSystem>, files: usize) -> anyhow::Result<()> {
    let dir = Path::new("/data");
    proxy.mkdirs(dir, Permission::DIR_DEFAULT)?;

    for i in 0..files {
        let path = dir.join(format!("part-{:05}", i));
        let mut out = proxy.create(&path, &CreateOptions::default())?;
        let content: Vec<u8> = (0..FILE_SIZE).map(|b| (b % 251) as u8).collect();
        out.write_all(&content)?;
    }

    let located = proxy.list_located_status(dir)?;
    tracing::debug!(
        blocks = located.iter().map(|l| l.locations.len()).sum::<usize>(),
        "Located input files"
    );

    for status in proxy.list_status(dir)? {
        let mut stream = proxy.open(&status.path, READ_SIZE)?;

        // Footer first, the way columnar readers do.
        let mut footer = [0u8; 16];
        let footer_at = status.length.saturating_sub(footer.len() as u64);
        stream.read_fully_at(footer_at, &mut footer)?;

        let mut buf = vec![0u8; READ_SIZE];
        let mut total = 0usize;
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        stream.seek(0)?;
        stream.read_byte()?;
        stream.pos()?;
        stream.close()?;
        tracing::debug!(path = %status.path.display(), bytes = total, "Read file");
    }

    let first = dir.join("part-00000");
    if proxy.file_status(&first).is_ok() {
        proxy.rename(&first, &dir.join("renamed"))?;
    }
    proxy.delete(dir, true)?;
    Ok(())
}

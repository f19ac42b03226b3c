use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::rolling;
use tracing_subscriber::{filter, fmt, prelude::*, EnvFilter, Layer};

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Target on which telemetry lines are emitted by the tracing sink.
pub const TELEMETRY_TARGET: &str = "iotrace::telemetry";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error).
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for log files. If None, no file logging.
    pub log_dir: Option<PathBuf>,

    /// Prefix for log file names.
    #[serde(default = "default_prefix")]
    pub file_prefix: String,

    /// Log rotation: "hourly", "daily", "never".
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// Whether to output JSON format. Telemetry files are always plain text.
    #[serde(default)]
    pub json_format: bool,

    /// Whether to also output to console (stderr).
    #[serde(default = "default_true")]
    pub console_output: bool,

    /// Dedicated file receiving only telemetry lines, never rotated.
    #[serde(default)]
    pub telemetry_file: Option<PathBuf>,
}

fn default_level() -> String {
    "info".into()
}

fn default_prefix() -> String {
    "iotrace".into()
}

fn default_rotation() -> String {
    "hourly".into()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_level(),
            log_dir: None,
            file_prefix: default_prefix(),
            rotation: default_rotation(),
            json_format: false,
            console_output: true,
            telemetry_file: None,
        }
    }
}

impl LogConfig {
    fn rotation(&self) -> rolling::Rotation {
        match self.rotation.as_str() {
            "daily" => rolling::Rotation::DAILY,
            "never" => rolling::Rotation::NEVER,
            // default to hourly
            _ => rolling::Rotation::HOURLY,
        }
    }
}

/// Guards for the non-blocking writers. Must be held alive for the duration
/// of the program, or buffered lines are lost on exit.
#[derive(Default)]
pub struct LogGuards {
    guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

impl LogGuards {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Initialize the logging system. Should be called once at program startup.
pub fn init_logging(config: &LogConfig) -> Result<LogGuards, rolling::InitError> {
    let registry = tracing_subscriber::registry();
    let mut guards = LogGuards::default();

    // Build console layer (boxed to unify types).
    let console_layer: Option<BoxedLayer<_>> = if config.console_output {
        if config.json_format {
            Some(Box::new(fmt::layer().json().with_writer(std::io::stderr)))
        } else {
            Some(Box::new(fmt::layer().with_writer(std::io::stderr)))
        }
    } else {
        None
    };

    let file_layer: Option<BoxedLayer<_>> = if let Some(ref log_dir) = config.log_dir {
        let file_appender = rolling::RollingFileAppender::builder()
            .rotation(config.rotation())
            .filename_prefix(&config.file_prefix)
            .filename_suffix("log")
            .build(log_dir)?;

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        guards.guards.push(guard);

        if config.json_format {
            Some(Box::new(fmt::layer().json().with_writer(non_blocking)))
        } else {
            Some(Box::new(fmt::layer().with_ansi(false).with_writer(non_blocking)))
        }
    } else {
        None
    };

    // The telemetry layer is plain text so the analyzer can read it back.
    let telemetry_layer: Option<BoxedLayer<_>> = if let Some(ref path) = config.telemetry_file {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.telemetry.log", config.file_prefix));

        let appender = rolling::RollingFileAppender::builder()
            .rotation(rolling::Rotation::NEVER)
            .filename_prefix(name)
            .build(dir)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        guards.guards.push(guard);

        Some(Box::new(
            fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking)
                .with_filter(filter::filter_fn(|meta| meta.target() == TELEMETRY_TARGET)),
        ))
    } else {
        None
    };

    registry
        .with(telemetry_layer)
        .with(console_layer.with_filter(env_filter(config)))
        .with(file_layer.with_filter(env_filter(config)))
        .init();

    Ok(guards)
}

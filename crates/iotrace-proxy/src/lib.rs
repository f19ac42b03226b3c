//! Instrumented storage proxy.
//!
//! `FileSystemProxy` and `StreamProxy` wrap any backend implementing the
//! [`backend`] traits, forward every call unchanged and write one telemetry
//! record per successful call to an injected [`sink::TelemetrySink`]. Records
//! use the single-line format from `iotrace_types::codec`, so the logs they
//! end up in can be re-read by `iotrace-analyzer`.

pub mod backend;
pub mod config;
pub mod diagnostic;
pub mod filesystem;
pub mod local;
pub mod memory;
pub mod node;
pub mod sink;
pub mod stream;

pub use backend::{
    BackendStream, BlockLocation, Capabilities, CreateOptions, FileStatus, FileSystemBackend,
    LocatedFileStatus, Permission,
};
pub use config::{ConfigError, Properties, ProxyConfig, SinkKind, DIAGNOSTICS_KEY, NODE_ADDRESS_KEY};
pub use filesystem::FileSystemProxy;
pub use local::LocalFileSystem;
pub use memory::MemFileSystem;
pub use sink::{FileSink, InMemorySink, NoopSink, TelemetrySink, TracingSink, TELEMETRY_TARGET};
pub use stream::{StreamProxy, END_OF_STREAM};

use std::io;
use std::time::Instant;

/// Run a backend call, returning its result with the elapsed wall-clock time
/// in nanoseconds. Errors are returned as-is.
pub(crate) fn timed<T>(f: impl FnOnce() -> io::Result<T>) -> io::Result<(T, u64)> {
    let start = Instant::now();
    let value = f()?;
    let elapsed = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
    Ok((value, elapsed))
}

/// Record fields are `i64`; lengths beyond that saturate.
pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_passes_error_through() {
        let err = timed(|| -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "slow backend"))
        })
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(err.to_string(), "slow backend");
    }

    #[test]
    fn test_timed_value() {
        let (v, _elapsed) = timed(|| Ok(42)).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn test_to_i64_saturates() {
        assert_eq!(to_i64(5), 5);
        assert_eq!(to_i64(u64::MAX), i64::MAX);
    }
}

//! Capability contract a storage backend must satisfy to be proxied.
//!
//! Every operation returns `std::io::Result`; the proxies hand errors back to
//! their callers untouched, so whatever kind and payload a backend chooses is
//! what the application sees.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Properties;

/// Provider-specific quirks, expressed as flags instead of per-provider types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// The backend stream honours readahead hints. Without it the proxy drops
    /// hints instead of forwarding them.
    pub readahead: bool,
}

/// POSIX-style permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission(pub u32);

impl Permission {
    pub const DIR_DEFAULT: Permission = Permission(0o755);
    pub const FILE_DEFAULT: Permission = Permission(0o644);
}

impl Default for Permission {
    fn default() -> Self {
        Self::FILE_DEFAULT
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

/// Metadata for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: PathBuf,
    pub length: u64,
    pub is_dir: bool,
    /// Milliseconds since the Unix epoch, 0 if unknown.
    pub modification_time: i64,
}

impl FileStatus {
    pub fn file(path: impl Into<PathBuf>, length: u64) -> Self {
        Self {
            path: path.into(),
            length,
            is_dir: false,
            modification_time: 0,
        }
    }

    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            length: 0,
            is_dir: true,
            modification_time: 0,
        }
    }
}

/// Where one byte range of a file is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLocation {
    pub hosts: Vec<String>,
    pub offset: u64,
    pub length: u64,
}

/// A `FileStatus` together with the block locations of the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedFileStatus {
    pub status: FileStatus,
    /// Empty for directories and empty files.
    pub locations: Vec<BlockLocation>,
}

impl LocatedFileStatus {
    /// Locate `status` as a single block held by `host`.
    pub fn single_block(status: FileStatus, host: &str) -> Self {
        let locations = if status.is_dir || status.length == 0 {
            Vec::new()
        } else {
            vec![BlockLocation {
                hosts: vec![host.to_string()],
                offset: 0,
                length: status.length,
            }]
        };
        Self { status, locations }
    }
}

/// Arguments to `create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    pub permission: Permission,
    pub overwrite: bool,
    pub buffer_size: usize,
    pub replication: u16,
    pub block_size: u64,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            permission: Permission::FILE_DEFAULT,
            overwrite: true,
            buffer_size: 4096,
            replication: 1,
            block_size: 128 * 1024 * 1024,
        }
    }
}

/// An open, readable backend stream.
///
/// Streams are used from one thread at a time; concurrency comes from opening
/// several of them.
pub trait BackendStream: Send {
    /// Read one byte. `Ok(None)` signals end of stream.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;

    /// Read into `buf` at the current position, advancing it. `Ok(0)` for a
    /// non-empty buffer signals end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Read at an explicit position without moving the cursor.
    fn read_at(&mut self, position: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Fill `buf` entirely from `position` without moving the cursor, failing
    /// with `UnexpectedEof` if the file is too short.
    fn read_fully_at(&mut self, position: u64, buf: &mut [u8]) -> io::Result<()>;

    fn seek(&mut self, pos: u64) -> io::Result<()>;

    /// Current cursor position. Fails once the stream is closed.
    fn pos(&mut self) -> io::Result<u64>;

    /// Try another replica for the data at `target`. Returns whether a new
    /// source was found.
    fn seek_to_new_source(&mut self, target: u64) -> io::Result<bool>;

    fn set_readahead(&mut self, readahead: Option<u64>) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()>;

    /// Human-readable snapshot of the stream state, logged on close.
    fn describe(&self) -> String;
}

/// Filesystem-level handle of a storage backend.
///
/// Methods take `&self` so one handle can serve many worker threads; any
/// required synchronisation is the backend's business.
pub trait FileSystemBackend: Send + Sync {
    type Stream: BackendStream;
    type Output: io::Write + Send;

    fn initialize(&mut self, uri: &str, properties: &Properties) -> io::Result<()>;

    fn uri(&self) -> String;

    fn working_directory(&self) -> PathBuf;

    fn set_working_directory(&self, dir: &Path);

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn open(&self, path: &Path, buffer_size: usize) -> io::Result<Self::Stream>;

    fn create(&self, path: &Path, options: &CreateOptions) -> io::Result<Self::Output>;

    fn append(&self, path: &Path, buffer_size: usize) -> io::Result<Self::Output>;

    fn rename(&self, src: &Path, dst: &Path) -> io::Result<bool>;

    fn delete(&self, path: &Path, recursive: bool) -> io::Result<bool>;

    fn list_status(&self, path: &Path) -> io::Result<Vec<FileStatus>>;

    /// Like `list_status`, with block locations. Backends without placement
    /// information report each file as one block on `localhost`.
    fn list_located_status(&self, path: &Path) -> io::Result<Vec<LocatedFileStatus>> {
        Ok(self
            .list_status(path)?
            .into_iter()
            .map(|status| LocatedFileStatus::single_block(status, "localhost"))
            .collect())
    }

    fn mkdirs(&self, path: &Path, permission: Permission) -> io::Result<bool>;

    fn file_status(&self, path: &Path) -> io::Result<FileStatus>;

    /// Human-readable statistics, if the backend keeps any.
    fn statistics(&self) -> io::Result<Option<String>> {
        Ok(None)
    }

    fn close(&self) -> io::Result<()>;
}

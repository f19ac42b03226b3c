//! `std::fs`-backed backend rooted at a local directory.
//!
//! Backend paths are absolute within the root (`/a/b` maps to `<root>/a/b`);
//! relative paths resolve against the working directory. `..` is rejected so a
//! caller cannot escape the root.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use parking_lot::Mutex;

use crate::backend::{BackendStream, CreateOptions, FileStatus, FileSystemBackend, Permission};
use crate::config::Properties;

pub const FILE_SCHEME: &str = "file://";

pub struct LocalFileSystem {
    root: PathBuf,
    working_dir: Mutex<PathBuf>,
}

impl LocalFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            working_dir: Mutex::new(PathBuf::from("/")),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalised backend path for `path`.
    fn logical(&self, path: &Path) -> io::Result<PathBuf> {
        let joined = if path.has_root() {
            path.to_path_buf()
        } else {
            self.working_dir.lock().join(path)
        };
        let mut out = PathBuf::from("/");
        for component in joined.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => out.push(part),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("path escapes root: {}", path.display()),
                    ))
                }
            }
        }
        Ok(out)
    }

    /// Host path for a backend path.
    fn host(&self, path: &Path) -> io::Result<PathBuf> {
        let logical = self.logical(path)?;
        let relative = logical.strip_prefix("/").unwrap_or(&logical);
        Ok(self.root.join(relative))
    }

    fn status(&self, logical: PathBuf, meta: &fs::Metadata) -> FileStatus {
        let modification_time = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        FileStatus {
            path: logical,
            length: if meta.is_dir() { 0 } else { meta.len() },
            is_dir: meta.is_dir(),
            modification_time,
        }
    }
}

#[cfg(unix)]
fn apply_permission(path: &Path, permission: Permission) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(permission.0))
}

#[cfg(not(unix))]
fn apply_permission(_path: &Path, _permission: Permission) -> io::Result<()> {
    Ok(())
}

impl FileSystemBackend for LocalFileSystem {
    type Stream = LocalStream;
    type Output = File;

    /// `file://` URIs with a path re-root the filesystem at that directory.
    fn initialize(&mut self, uri: &str, _properties: &Properties) -> io::Result<()> {
        let rest = uri.strip_prefix(FILE_SCHEME).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported uri for local filesystem: {}", uri),
            )
        })?;
        if !rest.is_empty() && rest != "/" {
            let root = PathBuf::from(rest);
            if !root.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("root directory {} does not exist", root.display()),
                ));
            }
            self.root = root;
        }
        tracing::debug!(root = %self.root.display(), "Local filesystem initialized");
        Ok(())
    }

    fn uri(&self) -> String {
        format!("{}{}", FILE_SCHEME, self.root.display())
    }

    fn working_directory(&self) -> PathBuf {
        self.working_dir.lock().clone()
    }

    fn set_working_directory(&self, dir: &Path) {
        match self.logical(dir) {
            Ok(dir) => *self.working_dir.lock() = dir,
            Err(e) => tracing::warn!(error = %e, "Ignoring working directory"),
        }
    }

    fn open(&self, path: &Path, _buffer_size: usize) -> io::Result<LocalStream> {
        let host = self.host(path)?;
        let file = File::open(&host)?;
        Ok(LocalStream {
            path: host,
            file: Some(file),
        })
    }

    fn create(&self, path: &Path, options: &CreateOptions) -> io::Result<File> {
        let host = self.host(path)?;
        if let Some(parent) = host.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut opts = OpenOptions::new();
        opts.write(true);
        if options.overwrite {
            opts.create(true).truncate(true);
        } else {
            opts.create_new(true);
        }
        let file = opts.open(&host)?;
        apply_permission(&host, options.permission)?;
        Ok(file)
    }

    fn append(&self, path: &Path, _buffer_size: usize) -> io::Result<File> {
        let host = self.host(path)?;
        OpenOptions::new().append(true).open(host)
    }

    fn rename(&self, src: &Path, dst: &Path) -> io::Result<bool> {
        let src = self.host(src)?;
        let dst = self.host(dst)?;
        if !src.exists() || dst.exists() {
            return Ok(false);
        }
        fs::rename(src, dst)?;
        Ok(true)
    }

    fn delete(&self, path: &Path, recursive: bool) -> io::Result<bool> {
        let host = self.host(path)?;
        if host == self.root {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "refusing to delete root",
            ));
        }
        let meta = match fs::symlink_metadata(&host) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&host)?;
            } else {
                fs::remove_dir(&host)?;
            }
        } else {
            fs::remove_file(&host)?;
        }
        Ok(true)
    }

    fn list_status(&self, path: &Path) -> io::Result<Vec<FileStatus>> {
        let logical = self.logical(path)?;
        let host = self.host(path)?;
        let meta = fs::metadata(&host)?;
        if !meta.is_dir() {
            return Ok(vec![self.status(logical, &meta)]);
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&host)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            entries.push(self.status(logical.join(entry.file_name()), &meta));
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn mkdirs(&self, path: &Path, permission: Permission) -> io::Result<bool> {
        let host = self.host(path)?;
        fs::create_dir_all(&host)?;
        apply_permission(&host, permission)?;
        Ok(true)
    }

    fn file_status(&self, path: &Path) -> io::Result<FileStatus> {
        let logical = self.logical(path)?;
        let meta = fs::metadata(self.host(path)?)?;
        Ok(self.status(logical, &meta))
    }

    fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Read stream over a local file. `None` once closed.
pub struct LocalStream {
    path: PathBuf,
    file: Option<File>,
}

impl LocalStream {
    fn file(&mut self) -> io::Result<&mut File> {
        let path = &self.path;
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other(format!("stream for {} is closed", path.display())))
    }

    /// Run `f` at `position`, restoring the cursor afterwards.
    fn at<T>(
        &mut self,
        position: u64,
        f: impl FnOnce(&mut File) -> io::Result<T>,
    ) -> io::Result<T> {
        let file = self.file()?;
        let saved = file.stream_position()?;
        file.seek(SeekFrom::Start(position))?;
        let result = f(file);
        file.seek(SeekFrom::Start(saved))?;
        result
    }
}

impl BackendStream for LocalStream {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut one = [0u8; 1];
        match self.file()?.read(&mut one)? {
            0 => Ok(None),
            _ => Ok(Some(one[0])),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file()?.read(buf)
    }

    fn read_at(&mut self, position: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.at(position, |file| file.read(buf))
    }

    fn read_fully_at(&mut self, position: u64, buf: &mut [u8]) -> io::Result<()> {
        self.at(position, |file| file.read_exact(buf))
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.file()?.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    fn pos(&mut self) -> io::Result<u64> {
        self.file()?.stream_position()
    }

    fn seek_to_new_source(&mut self, _target: u64) -> io::Result<bool> {
        self.file()?;
        Ok(false)
    }

    fn set_readahead(&mut self, _readahead: Option<u64>) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "local filesystem does not support readahead",
        ))
    }

    fn close(&mut self) -> io::Result<()> {
        self.file.take();
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "LocalStream{{path={}, open={}}}",
            self.path.display(),
            self.file.is_some()
        )
    }
}

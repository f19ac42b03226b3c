//! In-memory backend.
//!
//! `MemFileSystem` keeps a map of absolute paths to files and directories.
//! Handles are cheap clones sharing the same tree, so a test can keep one copy
//! to inspect state while a proxy owns another.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::backend::{
    BackendStream, Capabilities, CreateOptions, FileStatus, FileSystemBackend, Permission,
};
use crate::config::Properties;

pub const MEM_SCHEME: &str = "mem://";

type FileData = Arc<RwLock<Vec<u8>>>;

#[derive(Clone)]
enum Node {
    File(FileData),
    Dir,
}

#[derive(Default)]
struct Counters {
    opens: AtomicU64,
    creates: AtomicU64,
    deletes: AtomicU64,
}

struct Inner {
    uri: Mutex<String>,
    working_dir: Mutex<PathBuf>,
    tree: RwLock<BTreeMap<PathBuf, Node>>,
    capabilities: Capabilities,
    fail_statistics: bool,
    counters: Counters,
    closed: Mutex<bool>,
}

#[derive(Clone)]
pub struct MemFileSystem {
    inner: Arc<Inner>,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::default())
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self::build(capabilities, false)
    }

    /// A filesystem whose `statistics` call always fails.
    pub fn with_failing_statistics() -> Self {
        Self::build(Capabilities::default(), true)
    }

    fn build(capabilities: Capabilities, fail_statistics: bool) -> Self {
        let mut tree = BTreeMap::new();
        tree.insert(PathBuf::from("/"), Node::Dir);
        Self {
            inner: Arc::new(Inner {
                uri: Mutex::new(format!("{}/", MEM_SCHEME)),
                working_dir: Mutex::new(PathBuf::from("/")),
                tree: RwLock::new(tree),
                capabilities,
                fail_statistics,
                counters: Counters::default(),
                closed: Mutex::new(false),
            }),
        }
    }

    /// Create or replace a file with `data`, creating parent directories.
    pub fn put(&self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) -> io::Result<()> {
        let path = self.resolve(path.as_ref())?;
        let mut tree = self.inner.tree.write();
        insert_parents(&mut tree, &path)?;
        tree.insert(path, Node::File(Arc::new(RwLock::new(data.into()))));
        Ok(())
    }

    /// Contents of a file, if it exists.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let path = self.resolve(path.as_ref()).ok()?;
        match self.inner.tree.read().get(&path) {
            Some(Node::File(data)) => Some(data.read().clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path.as_ref())
            .map(|p| self.inner.tree.read().contains_key(&p))
            .unwrap_or(false)
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.lock()
    }

    pub fn open_count(&self) -> u64 {
        self.inner.counters.opens.load(Ordering::Relaxed)
    }

    /// Absolute, normalised form of `path`, relative paths resolved against
    /// the working directory.
    fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.inner.working_dir.lock().join(path)
        };
        let mut out = PathBuf::from("/");
        for component in joined.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => out.push(part),
                Component::ParentDir => {
                    if !out.pop() {
                        return Err(invalid_path(path));
                    }
                }
                Component::Prefix(_) => return Err(invalid_path(path)),
            }
        }
        Ok(out)
    }

    fn file_data(&self, path: &Path) -> io::Result<FileData> {
        match self.inner.tree.read().get(path) {
            Some(Node::File(data)) => Ok(data.clone()),
            Some(Node::Dir) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", path.display()),
            )),
            None => Err(not_found(path)),
        }
    }
}

impl Default for MemFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file or directory", path.display()),
    )
}

fn invalid_path(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("invalid path: {}", path.display()),
    )
}

fn insert_parents(tree: &mut BTreeMap<PathBuf, Node>, path: &Path) -> io::Result<()> {
    for ancestor in path.ancestors().skip(1) {
        match tree.get(ancestor) {
            Some(Node::Dir) => break,
            Some(Node::File(_)) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} is a file", ancestor.display()),
                ))
            }
            None => {
                tree.insert(ancestor.to_path_buf(), Node::Dir);
            }
        }
    }
    Ok(())
}

/// Direct children of `dir` in the tree.
fn children<'a>(
    tree: &'a BTreeMap<PathBuf, Node>,
    dir: &'a Path,
) -> impl Iterator<Item = (&'a PathBuf, &'a Node)> + 'a {
    tree.range(dir.to_path_buf()..)
        .skip_while(move |(p, _)| p.as_path() == dir)
        .take_while(move |(p, _)| p.starts_with(dir))
        .filter(move |(p, _)| p.parent() == Some(dir))
}

fn status_of(path: &Path, node: &Node) -> FileStatus {
    match node {
        Node::File(data) => FileStatus::file(path, data.read().len() as u64),
        Node::Dir => FileStatus::dir(path),
    }
}

impl FileSystemBackend for MemFileSystem {
    type Stream = MemStream;
    type Output = MemOutput;

    fn initialize(&mut self, uri: &str, _properties: &Properties) -> io::Result<()> {
        if !uri.starts_with(MEM_SCHEME) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported uri for memory filesystem: {}", uri),
            ));
        }
        *self.inner.uri.lock() = uri.to_string();
        Ok(())
    }

    fn uri(&self) -> String {
        self.inner.uri.lock().clone()
    }

    fn working_directory(&self) -> PathBuf {
        self.inner.working_dir.lock().clone()
    }

    fn set_working_directory(&self, dir: &Path) {
        if let Ok(dir) = self.resolve(dir) {
            *self.inner.working_dir.lock() = dir;
        }
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities
    }

    fn open(&self, path: &Path, _buffer_size: usize) -> io::Result<MemStream> {
        let path = self.resolve(path)?;
        let data = self.file_data(&path)?;
        self.inner.counters.opens.fetch_add(1, Ordering::Relaxed);
        Ok(MemStream {
            path,
            data,
            pos: 0,
            closed: false,
            readahead: None,
        })
    }

    fn create(&self, path: &Path, options: &CreateOptions) -> io::Result<MemOutput> {
        let path = self.resolve(path)?;
        let mut tree = self.inner.tree.write();
        match tree.get(&path) {
            Some(Node::Dir) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} is a directory", path.display()),
                ))
            }
            Some(Node::File(_)) if !options.overwrite => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} already exists", path.display()),
                ))
            }
            _ => {}
        }
        insert_parents(&mut tree, &path)?;
        let data: FileData = Arc::default();
        tree.insert(path, Node::File(data.clone()));
        self.inner.counters.creates.fetch_add(1, Ordering::Relaxed);
        Ok(MemOutput { data })
    }

    fn append(&self, path: &Path, _buffer_size: usize) -> io::Result<MemOutput> {
        let path = self.resolve(path)?;
        Ok(MemOutput {
            data: self.file_data(&path)?,
        })
    }

    fn rename(&self, src: &Path, dst: &Path) -> io::Result<bool> {
        let src = self.resolve(src)?;
        let dst = self.resolve(dst)?;
        let mut tree = self.inner.tree.write();
        if !tree.contains_key(&src) || tree.contains_key(&dst) || dst.starts_with(&src) {
            return Ok(false);
        }
        insert_parents(&mut tree, &dst)?;
        let moved: Vec<PathBuf> = tree
            .range(src.clone()..)
            .take_while(|(p, _)| p.starts_with(&src))
            .map(|(p, _)| p.clone())
            .collect();
        for old in moved {
            if let Some(node) = tree.remove(&old) {
                let suffix = old.strip_prefix(&src).map_err(|_| invalid_path(&old))?;
                let new = if suffix.as_os_str().is_empty() {
                    dst.clone()
                } else {
                    dst.join(suffix)
                };
                tree.insert(new, node);
            }
        }
        Ok(true)
    }

    fn delete(&self, path: &Path, recursive: bool) -> io::Result<bool> {
        let path = self.resolve(path)?;
        if path == Path::new("/") {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "refusing to delete root",
            ));
        }
        let mut tree = self.inner.tree.write();
        match tree.get(&path) {
            None => return Ok(false),
            Some(Node::Dir) => {
                let has_children = children(&tree, &path).next().is_some();
                if has_children && !recursive {
                    return Err(io::Error::other(format!(
                        "directory {} is not empty",
                        path.display()
                    )));
                }
            }
            Some(Node::File(_)) => {}
        }
        let doomed: Vec<PathBuf> = tree
            .range(path.clone()..)
            .take_while(|(p, _)| p.starts_with(&path))
            .map(|(p, _)| p.clone())
            .collect();
        for p in doomed {
            tree.remove(&p);
        }
        self.inner.counters.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn list_status(&self, path: &Path) -> io::Result<Vec<FileStatus>> {
        let path = self.resolve(path)?;
        let tree = self.inner.tree.read();
        match tree.get(&path) {
            None => Err(not_found(&path)),
            Some(Node::Dir) => Ok(children(&tree, &path)
                .map(|(p, node)| status_of(p, node))
                .collect()),
            Some(file) => Ok(vec![status_of(&path, file)]),
        }
    }

    fn mkdirs(&self, path: &Path, _permission: Permission) -> io::Result<bool> {
        let path = self.resolve(path)?;
        let mut tree = self.inner.tree.write();
        match tree.get(&path) {
            Some(Node::Dir) => return Ok(true),
            Some(Node::File(_)) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} is a file", path.display()),
                ))
            }
            None => {}
        }
        insert_parents(&mut tree, &path)?;
        tree.insert(path, Node::Dir);
        Ok(true)
    }

    fn file_status(&self, path: &Path) -> io::Result<FileStatus> {
        let path = self.resolve(path)?;
        let tree = self.inner.tree.read();
        tree.get(&path)
            .map(|node| status_of(&path, node))
            .ok_or_else(|| not_found(&path))
    }

    fn statistics(&self) -> io::Result<Option<String>> {
        if self.inner.fail_statistics {
            return Err(io::Error::other("statistics unavailable"));
        }
        let c = &self.inner.counters;
        Ok(Some(format!(
            "opens={} creates={} deletes={} entries={}",
            c.opens.load(Ordering::Relaxed),
            c.creates.load(Ordering::Relaxed),
            c.deletes.load(Ordering::Relaxed),
            self.inner.tree.read().len(),
        )))
    }

    fn close(&self) -> io::Result<()> {
        *self.inner.closed.lock() = true;
        Ok(())
    }
}

/// Read stream over an in-memory file. Sees writes made after it was opened.
#[derive(Debug)]
pub struct MemStream {
    path: PathBuf,
    data: FileData,
    pos: u64,
    closed: bool,
    readahead: Option<u64>,
}

impl MemStream {
    pub fn readahead(&self) -> Option<u64> {
        self.readahead
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::other(format!(
                "stream for {} is closed",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn copy_at(&self, position: u64, buf: &mut [u8]) -> usize {
        let data = self.data.read();
        let start = usize::try_from(position).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        n
    }
}

impl BackendStream for MemStream {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut one = [0u8; 1];
        match self.read(&mut one)? {
            0 => Ok(None),
            _ => Ok(Some(one[0])),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_open()?;
        let n = self.copy_at(self.pos, buf);
        self.pos += n as u64;
        Ok(n)
    }

    fn read_at(&mut self, position: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.check_open()?;
        Ok(self.copy_at(position, buf))
    }

    fn read_fully_at(&mut self, position: u64, buf: &mut [u8]) -> io::Result<()> {
        self.check_open()?;
        if self.copy_at(position, buf) < buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "reached end of {} before reading {} bytes at {}",
                    self.path.display(),
                    buf.len(),
                    position
                ),
            ));
        }
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.check_open()?;
        let len = self.data.read().len() as u64;
        if pos > len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to {} past end of {} ({} bytes)", pos, self.path.display(), len),
            ));
        }
        self.pos = pos;
        Ok(())
    }

    fn pos(&mut self) -> io::Result<u64> {
        self.check_open()?;
        Ok(self.pos)
    }

    fn seek_to_new_source(&mut self, _target: u64) -> io::Result<bool> {
        self.check_open()?;
        Ok(false)
    }

    fn set_readahead(&mut self, readahead: Option<u64>) -> io::Result<()> {
        self.readahead = readahead;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "MemStream{{path={}, pos={}, closed={}}}",
            self.path.display(),
            self.pos,
            self.closed
        )
    }
}

/// Writer appending to an in-memory file.
#[derive(Debug)]
pub struct MemOutput {
    data: FileData,
}

impl Write for MemOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.write().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_read() {
        let fs = MemFileSystem::new();
        fs.put("/a/b/c.txt", "hello").unwrap();
        assert!(fs.exists("/a/b"));
        assert!(fs.file_status(Path::new("/a")).unwrap().is_dir);

        let mut s = fs.open(Path::new("/a/b/c.txt"), 4096).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(s.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(s.read(&mut buf).unwrap(), 0);
        assert_eq!(s.read_byte().unwrap(), None);
        assert_eq!(fs.open_count(), 1);
    }

    #[test]
    fn test_open_missing() {
        let fs = MemFileSystem::new();
        let err = fs.open(Path::new("/nope"), 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_create_and_append() {
        let fs = MemFileSystem::new();
        let mut out = fs.create(Path::new("/x/y"), &CreateOptions::default()).unwrap();
        out.write_all(b"abc").unwrap();
        let mut out = fs.append(Path::new("/x/y"), 16).unwrap();
        out.write_all(b"def").unwrap();
        assert_eq!(fs.contents("/x/y").unwrap(), b"abcdef");

        let opts = CreateOptions {
            overwrite: false,
            ..Default::default()
        };
        let err = fs.create(Path::new("/x/y"), &opts).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_rename_moves_subtree() {
        let fs = MemFileSystem::new();
        fs.put("/src/one", "1").unwrap();
        fs.put("/src/sub/two", "2").unwrap();

        assert!(fs.rename(Path::new("/src"), Path::new("/dst")).unwrap());
        assert!(!fs.exists("/src"));
        assert_eq!(fs.contents("/dst/one").unwrap(), b"1");
        assert_eq!(fs.contents("/dst/sub/two").unwrap(), b"2");

        assert!(!fs.rename(Path::new("/missing"), Path::new("/other")).unwrap());
    }

    #[test]
    fn test_delete() {
        let fs = MemFileSystem::new();
        fs.put("/d/f", "x").unwrap();

        let err = fs.delete(Path::new("/d"), false).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(fs.delete(Path::new("/d"), true).unwrap());
        assert!(!fs.exists("/d/f"));
        assert!(!fs.delete(Path::new("/d"), true).unwrap());
    }

    #[test]
    fn test_list_status_direct_children_only() {
        let fs = MemFileSystem::new();
        fs.put("/dir/a", "1").unwrap();
        fs.put("/dir/b", "22").unwrap();
        fs.put("/dir/sub/c", "333").unwrap();
        fs.put("/dirx", "sibling").unwrap();

        let listing = fs.list_status(Path::new("/dir")).unwrap();
        let names: Vec<_> = listing.iter().map(|s| s.path.clone()).collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("/dir/a"),
                PathBuf::from("/dir/b"),
                PathBuf::from("/dir/sub")
            ]
        );
        assert_eq!(listing[1].length, 2);
        assert!(listing[2].is_dir);
    }

    #[test]
    fn test_relative_paths_use_working_directory() {
        let fs = MemFileSystem::new();
        fs.mkdirs(Path::new("/work"), Permission::DIR_DEFAULT).unwrap();
        fs.set_working_directory(Path::new("/work"));
        fs.put("data.bin", "zz").unwrap();
        assert!(fs.exists("/work/data.bin"));
        assert_eq!(fs.working_directory(), PathBuf::from("/work"));
    }

    #[test]
    fn test_stream_seek_and_close() {
        let fs = MemFileSystem::new();
        fs.put("/f", "0123456789").unwrap();
        let mut s = fs.open(Path::new("/f"), 1).unwrap();

        s.seek(8).unwrap();
        assert_eq!(s.pos().unwrap(), 8);
        assert_eq!(s.seek(11).unwrap_err().kind(), io::ErrorKind::InvalidInput);

        let mut buf = [0u8; 4];
        assert_eq!(
            s.read_fully_at(8, &mut buf).unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );

        s.close().unwrap();
        assert!(s.pos().is_err());
        assert!(s.describe().contains("closed=true"));
    }

    #[test]
    fn test_initialize_requires_mem_scheme() {
        let mut fs = MemFileSystem::new();
        assert!(fs.initialize("file:///tmp", &Properties::new()).is_err());
        fs.initialize("mem://bucket", &Properties::new()).unwrap();
        assert_eq!(fs.uri(), "mem://bucket");
    }

    #[test]
    fn test_statistics() {
        let fs = MemFileSystem::new();
        fs.put("/f", "x").unwrap();
        fs.open(Path::new("/f"), 1).unwrap();
        assert!(fs.statistics().unwrap().unwrap().contains("opens=1"));

        let failing = MemFileSystem::with_failing_statistics();
        assert!(failing.statistics().is_err());
    }

    #[test]
    fn test_parent_escape_rejected() {
        let fs = MemFileSystem::new();
        assert_eq!(
            fs.file_status(Path::new("/../etc")).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }
}

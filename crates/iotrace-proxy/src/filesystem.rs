//! Instrumented filesystem handle.
//!
//! `FileSystemProxy` forwards every call to its backend and, when the call
//! succeeds, writes one filesystem-level record to the sink. Failed calls
//! return the backend's error untouched and leave no record.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use iotrace_types::{encode_line, op, InstanceId, TelemetryRecord, NOT_APPLICABLE};

use crate::backend::{
    Capabilities, CreateOptions, FileStatus, FileSystemBackend, LocatedFileStatus, Permission,
};
use crate::config::{ConfigError, Properties, ProxyConfig, DIAGNOSTICS_KEY, NODE_ADDRESS_KEY};
use crate::diagnostic;
use crate::node;
use crate::sink::TelemetrySink;
use crate::stream::StreamProxy;
use crate::{timed, to_i64};

/// Separator between source and destination in a rename record's subject.
pub const RENAME_SEPARATOR: &str = "___";

pub struct FileSystemProxy<B: FileSystemBackend> {
    backend: B,
    instance_id: InstanceId,
    node: Option<String>,
    diagnostics: bool,
    sink: Arc<dyn TelemetrySink>,
}

impl<B: FileSystemBackend> FileSystemProxy<B> {
    /// Wrap `backend`, recording the local host address as the node.
    pub fn new(backend: B, sink: Arc<dyn TelemetrySink>) -> Self {
        Self::with_node(backend, sink, node::local_address())
    }

    /// Wrap `backend` with an explicit node address.
    pub fn with_node(backend: B, sink: Arc<dyn TelemetrySink>, node: Option<String>) -> Self {
        let instance_id = InstanceId::next();
        tracing::debug!(instance = %instance_id, node = ?node, "Created filesystem proxy");
        Self {
            backend,
            instance_id,
            node,
            diagnostics: false,
            sink,
        }
    }

    /// Build a proxy and its sink from `config`. The node override, if any,
    /// takes precedence over the resolved local address.
    pub fn from_config(backend: B, config: &ProxyConfig) -> Result<Self, ConfigError> {
        let sink = config.build_sink()?;
        let node = match config.node_address {
            Some(ref addr) => Some(addr.clone()),
            None => node::local_address(),
        };
        let mut proxy = Self::with_node(backend, sink, node);
        proxy.diagnostics = config.diagnostics;
        Ok(proxy)
    }

    /// Read proxy settings from `properties`, then initialize the backend.
    ///
    /// The backend always sees the full property set, proxy keys included.
    pub fn initialize(&mut self, uri: &str, properties: &Properties) -> io::Result<()> {
        self.diagnostics = properties.get_bool(DIAGNOSTICS_KEY, false);
        if let Some(addr) = properties.get_str(NODE_ADDRESS_KEY) {
            self.node = Some(addr.to_string());
        }
        if self.diagnostics {
            diagnostic::log_call_context(op::INITIALIZE, uri);
        }

        let backend = &mut self.backend;
        let ((), elapsed) = timed(|| backend.initialize(uri, properties))?;
        tracing::info!(
            instance = %self.instance_id,
            uri,
            diagnostics = self.diagnostics,
            "Initialized filesystem proxy"
        );
        self.emit(uri, op::INITIALIZE, NOT_APPLICABLE, elapsed);
        Ok(())
    }

    /// Open `path` for reading. The file's length is looked up first, so a
    /// missing file fails before the backend's `open` is called.
    pub fn open(&self, path: &Path, buffer_size: usize) -> io::Result<StreamProxy<B::Stream>> {
        let status = self.backend.file_status(path)?;
        let content_length = to_i64(status.length);

        let (stream, elapsed) = timed(|| self.backend.open(path, buffer_size))?;
        let subject = path.to_string_lossy();
        self.emit(&subject, op::OPEN, content_length, elapsed);

        Ok(StreamProxy::new(stream, subject.into_owned(), content_length, self.sink.clone())
            .with_node(self.node.clone())
            .with_capabilities(self.backend.capabilities())
            .with_diagnostics(self.diagnostics))
    }

    pub fn create(&self, path: &Path, options: &CreateOptions) -> io::Result<B::Output> {
        let (output, elapsed) = timed(|| self.backend.create(path, options))?;
        self.emit(&path.to_string_lossy(), op::CREATE, 0, elapsed);
        Ok(output)
    }

    pub fn append(&self, path: &Path, buffer_size: usize) -> io::Result<B::Output> {
        let (output, elapsed) = timed(|| self.backend.append(path, buffer_size))?;
        self.emit(&path.to_string_lossy(), op::APPEND, NOT_APPLICABLE, elapsed);
        Ok(output)
    }

    /// Rename `src` to `dst`. The record's subject is `src___dst`.
    pub fn rename(&self, src: &Path, dst: &Path) -> io::Result<bool> {
        tracing::info!(src = %src.display(), dst = %dst.display(), "Rename");
        let (renamed, elapsed) = timed(|| self.backend.rename(src, dst))?;
        let subject = format!(
            "{}{}{}",
            src.to_string_lossy(),
            RENAME_SEPARATOR,
            dst.to_string_lossy()
        );
        self.emit(&subject, op::RENAME, NOT_APPLICABLE, elapsed);
        Ok(renamed)
    }

    pub fn delete(&self, path: &Path, recursive: bool) -> io::Result<bool> {
        tracing::info!(path = %path.display(), recursive, "Delete");
        let (deleted, elapsed) = timed(|| self.backend.delete(path, recursive))?;
        let operation = if recursive {
            op::DELETE_RECURSIVE
        } else {
            op::DELETE_NONRECURSIVE
        };
        self.emit(&path.to_string_lossy(), operation, NOT_APPLICABLE, elapsed);
        Ok(deleted)
    }

    /// List `path`. The record's content length is the number of entries.
    pub fn list_status(&self, path: &Path) -> io::Result<Vec<FileStatus>> {
        let subject = path.to_string_lossy();
        if self.diagnostics {
            diagnostic::log_call_context(op::LIST_STATUS, &subject);
        }
        let (entries, elapsed) = timed(|| self.backend.list_status(path))?;
        self.emit(&subject, op::LIST_STATUS, to_i64(entries.len() as u64), elapsed);
        Ok(entries)
    }

    /// List `path` with block locations. The record's content length is n/a.
    pub fn list_located_status(&self, path: &Path) -> io::Result<Vec<LocatedFileStatus>> {
        let subject = path.to_string_lossy();
        tracing::info!(path = %subject, "Issued listLocatedStatus");
        let (entries, elapsed) = timed(|| self.backend.list_located_status(path))?;
        self.emit(&subject, op::LIST_LOCATED_STATUS, NOT_APPLICABLE, elapsed);
        Ok(entries)
    }

    pub fn mkdirs(&self, path: &Path, permission: Permission) -> io::Result<bool> {
        let subject = path.to_string_lossy();
        if self.diagnostics {
            diagnostic::log_call_context(op::MKDIRS, &subject);
        }
        let (created, elapsed) = timed(|| self.backend.mkdirs(path, permission))?;
        self.emit(&subject, op::MKDIRS, NOT_APPLICABLE, elapsed);
        Ok(created)
    }

    pub fn file_status(&self, path: &Path) -> io::Result<FileStatus> {
        let subject = path.to_string_lossy();
        if self.diagnostics {
            diagnostic::log_call_context(op::GET_FILE_STATUS, &subject);
        }
        let (status, elapsed) = timed(|| self.backend.file_status(path))?;
        self.emit(&subject, op::GET_FILE_STATUS, to_i64(status.length), elapsed);
        Ok(status)
    }

    /// Close the backend. Its statistics are logged first when available; a
    /// failure to fetch them is logged and otherwise ignored.
    pub fn close(&self) -> io::Result<()> {
        match self.backend.statistics() {
            Ok(Some(stats)) => {
                tracing::info!(instance = %self.instance_id, statistics = %stats, "Backend statistics")
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(instance = %self.instance_id, error = %e, "Cannot fetch backend statistics")
            }
        }
        let ((), elapsed) = timed(|| self.backend.close())?;
        let uri = self.backend.uri();
        self.emit(&uri, op::CLOSE, NOT_APPLICABLE, elapsed);
        Ok(())
    }

    pub fn uri(&self) -> String {
        self.backend.uri()
    }

    pub fn working_directory(&self) -> PathBuf {
        self.backend.working_directory()
    }

    pub fn set_working_directory(&self, dir: &Path) {
        self.backend.set_working_directory(dir)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn diagnostics_enabled(&self) -> bool {
        self.diagnostics
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn emit(&self, subject: &str, operation: &str, content_length: i64, elapsed_nanos: u64) {
        let record = TelemetryRecord::file_system(
            self.instance_id,
            self.node.clone(),
            subject,
            operation,
            content_length,
            elapsed_nanos,
        );
        self.sink.append_line(&encode_line(&record));
    }
}

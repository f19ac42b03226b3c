//! Telemetry record model.
//!
//! A `TelemetryRecord` is an immutable snapshot of one proxied call. The same
//! struct describes both filesystem-level and stream-level calls; `kind`
//! decides which fields are meaningful and which line shape the codec uses.

use serde::{Deserialize, Serialize};

use crate::ids::InstanceId;

/// Value stored in a numeric field that does not apply to the call.
pub const NOT_APPLICABLE: i64 = -1;

/// Position recorded when the backend stream could not report one, typically
/// because it has already been closed.
pub const CLOSED_POSITION: i64 = -100_000;

/// Node label used when the emitting process had no resolvable address.
pub const UNKNOWN_NODE: &str = "null";

/// Which proxy emitted a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Emitted by a stream proxy (read/seek/close on an open file).
    Stream,
    /// Emitted by a filesystem proxy (open/create/rename/...).
    FileSystem,
}

/// Operation names used in records.
pub mod op {
    pub const INITIALIZE: &str = "initialize";
    pub const OPEN: &str = "open";
    pub const CREATE: &str = "create";
    pub const APPEND: &str = "append";
    pub const RENAME: &str = "rename";
    pub const DELETE_RECURSIVE: &str = "delete_recursive";
    pub const DELETE_NONRECURSIVE: &str = "delete_nonrecursive";
    pub const LIST_STATUS: &str = "listStatus";
    pub const MKDIRS: &str = "mkdirs";
    pub const GET_FILE_STATUS: &str = "getFileStatus";
    pub const LIST_LOCATED_STATUS: &str = "listLocatedStatus";
    pub const CLOSE: &str = "close";

    pub const READ: &str = "read";
    pub const READ_FULLY: &str = "readFully";
    pub const SEEK: &str = "seek";
    pub const GET_POS: &str = "getPos";
    pub const SEEK_TO_NEW_SOURCE: &str = "seekToNewSource";
}

/// One observed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub kind: RecordKind,
    pub instance_id: InstanceId,
    /// Local address of the emitting process, if it could be resolved.
    pub node: Option<String>,
    /// Path for filesystem calls, owning file path for stream calls.
    pub subject: String,
    pub operation: String,
    pub content_length: i64,
    pub old_position: i64,
    pub real_position: i64,
    pub positional_arg: i64,
    pub bytes_transferred: i64,
    pub elapsed_nanos: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl TelemetryRecord {
    /// A filesystem-level record. Positional fields are n/a; no bytes move
    /// through a filesystem call, so `bytes_transferred` is 0.
    pub fn file_system(
        instance_id: InstanceId,
        node: Option<String>,
        subject: impl Into<String>,
        operation: impl Into<String>,
        content_length: i64,
        elapsed_nanos: u64,
    ) -> Self {
        Self {
            kind: RecordKind::FileSystem,
            instance_id,
            node,
            subject: subject.into(),
            operation: operation.into(),
            content_length,
            old_position: NOT_APPLICABLE,
            real_position: NOT_APPLICABLE,
            positional_arg: NOT_APPLICABLE,
            bytes_transferred: 0,
            elapsed_nanos,
            diagnostic: None,
        }
    }

    /// A stream-level record with every positional field n/a; fill in the
    /// rest with the `with_*` builders.
    pub fn stream(
        instance_id: InstanceId,
        node: Option<String>,
        subject: impl Into<String>,
        operation: impl Into<String>,
        content_length: i64,
        elapsed_nanos: u64,
    ) -> Self {
        Self {
            kind: RecordKind::Stream,
            bytes_transferred: NOT_APPLICABLE,
            ..Self::file_system(instance_id, node, subject, operation, content_length, elapsed_nanos)
        }
    }

    pub fn with_positions(mut self, old_position: i64, real_position: i64) -> Self {
        self.old_position = old_position;
        self.real_position = real_position;
        self
    }

    pub fn with_positional_arg(mut self, positional_arg: i64) -> Self {
        self.positional_arg = positional_arg;
        self
    }

    pub fn with_bytes(mut self, bytes_transferred: i64) -> Self {
        self.bytes_transferred = bytes_transferred;
        self
    }

    /// Attach a diagnostic. Empty strings are treated as absent.
    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        self.diagnostic = if diagnostic.is_empty() {
            None
        } else {
            Some(diagnostic)
        };
        self
    }

    /// Aggregation key for this record's node.
    pub fn node_label(&self) -> &str {
        self.node.as_deref().unwrap_or(UNKNOWN_NODE)
    }

    pub fn is_stream(&self) -> bool {
        self.kind == RecordKind::Stream
    }

    /// Whether a read with this result is a boundary case worth capturing
    /// call context for.
    pub fn is_boundary_transfer(bytes_transferred: i64) -> bool {
        bytes_transferred == 0 || bytes_transferred == 1
    }
}

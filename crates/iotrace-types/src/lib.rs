//! Shared types for iotrace: the telemetry record emitted by the proxies and
//! the single-line codec used to write and re-read it.

pub mod codec;
pub mod ids;
pub mod record;

// Re-export commonly used items at the crate root.
pub use codec::{
    classify, decode, encode, encode_line, escape_subject, locate, parse_lenient,
    unescape_subject, DecodeError, Located,
    FILE_SYSTEM_TAG, RECORD_MARKER, STREAM_TAG,
};
pub use ids::InstanceId;
pub use record::{op, RecordKind, TelemetryRecord, CLOSED_POSITION, NOT_APPLICABLE, UNKNOWN_NODE};

//! Single-line text encoding of telemetry records.
//!
//! Filesystem-level shape:
//!
//! ```text
//! iotrace_<id>,<node>,<subject>,<op>,<contentLen>,<elapsedNanos>
//! ```
//!
//! Stream-level shape:
//!
//! ```text
//! iotrace_<id>,<node>,<subject>,<op>,<contentLen>,<oldPos>,<realPos>,<positionalArg>,<bytesTransferred>,<elapsedNanos>[,<diagnostic>]
//! ```
//!
//! The subject is escaped with [`escape_subject`], so paths containing the
//! delimiter, `%` or line breaks still occupy exactly one field.
//!
//! The shape of a line cannot be inferred from its field count alone, since
//! the diagnostic is optional. Sinks therefore receive lines prefixed with a
//! kind tag (`StreamProxy` / `FileSystemProxy`), playing the role a logger
//! name plays in an ordinary log file, and the decoder is told which shape
//! to parse.

use std::borrow::Cow;

use crate::ids::InstanceId;
use crate::record::{RecordKind, TelemetryRecord, UNKNOWN_NODE};

/// Token that starts every encoded record.
pub const RECORD_MARKER: &str = "iotrace_";

/// Kind tag preceding stream-level records.
pub const STREAM_TAG: &str = "StreamProxy";

/// Kind tag preceding filesystem-level records.
pub const FILE_SYSTEM_TAG: &str = "FileSystemProxy";

const DELIMITER: char = ',';
const FILE_SYSTEM_FIELDS: usize = 6;
const STREAM_FIELDS: usize = 10;

/// Errors produced while decoding a record body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("line does not start with the record marker")]
    MissingMarker,

    #[error("{kind:?} record needs {expected} fields, found {found}")]
    TooFewFields {
        kind: RecordKind,
        expected: usize,
        found: usize,
    },
}

impl RecordKind {
    pub fn tag(&self) -> &'static str {
        match self {
            RecordKind::Stream => STREAM_TAG,
            RecordKind::FileSystem => FILE_SYSTEM_TAG,
        }
    }
}

/// Encode a record body (starting at the marker).
pub fn encode(record: &TelemetryRecord) -> String {
    let node = record.node.as_deref().unwrap_or(UNKNOWN_NODE);
    let mut line = format!(
        "{}{},{},{},{},{}",
        RECORD_MARKER,
        record.instance_id,
        node,
        escape_subject(&record.subject),
        record.operation,
        record.content_length
    );

    match record.kind {
        RecordKind::FileSystem => {
            line.push_str(&format!(",{}", record.elapsed_nanos));
        }
        RecordKind::Stream => {
            line.push_str(&format!(
                ",{},{},{},{},{}",
                record.old_position,
                record.real_position,
                record.positional_arg,
                record.bytes_transferred,
                record.elapsed_nanos
            ));
            if let Some(diagnostic) = record.diagnostic.as_deref().filter(|d| !d.is_empty()) {
                line.push(DELIMITER);
                line.push_str(&flatten_diagnostic(diagnostic));
            }
        }
    }
    line
}

/// Encode a record as the full line handed to a sink: kind tag, a space, then
/// the record body.
pub fn encode_line(record: &TelemetryRecord) -> String {
    format!("{} {}", record.kind.tag(), encode(record))
}

/// Percent-escape the characters that would break a subject out of its field:
/// `%`, the delimiter, `\n` and `\r`.
pub fn escape_subject(subject: &str) -> Cow<'_, str> {
    if !subject.contains(['%', DELIMITER, '\n', '\r']) {
        return Cow::Borrowed(subject);
    }
    let mut out = String::with_capacity(subject.len() + 8);
    for c in subject.chars() {
        match c {
            '%' => out.push_str("%25"),
            DELIMITER => out.push_str("%2C"),
            '\n' => out.push_str("%0A"),
            '\r' => out.push_str("%0D"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Inverse of [`escape_subject`]. A `%` not followed by one of the escape
/// codes is kept as it is.
pub fn unescape_subject(field: &str) -> Cow<'_, str> {
    if !field.contains('%') {
        return Cow::Borrowed(field);
    }
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        let decoded = match tail.get(1..3) {
            Some("25") => Some('%'),
            Some("2C") | Some("2c") => Some(DELIMITER),
            Some("0A") | Some("0a") => Some('\n'),
            Some("0D") | Some("0d") => Some('\r'),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[3..];
            }
            None => {
                out.push('%');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Collapse a multi-line diagnostic into a single delimiter-free field.
pub fn flatten_diagnostic(diagnostic: &str) -> String {
    diagnostic
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
        .replace(DELIMITER, ";")
}

/// Parse an integer field, yielding 0 for anything that is not one.
///
/// Hand-filtered production logs routinely contain truncated lines, so a bad
/// field is not worth rejecting the whole record over.
pub fn parse_lenient(field: &str) -> i64 {
    field.trim().parse::<i64>().unwrap_or(0)
}

fn parse_lenient_unsigned(field: &str) -> u64 {
    field.trim().parse::<u64>().unwrap_or(0)
}

fn decode_node(field: &str) -> Option<String> {
    let field = field.trim();
    if field.is_empty() || field == UNKNOWN_NODE {
        None
    } else {
        Some(field.to_string())
    }
}

/// Decode a record body of the given kind.
///
/// `body` must start at the record marker. Numeric fields never fail; only a
/// missing marker or too few fields is an error. For stream records, anything
/// after the tenth field is the diagnostic.
pub fn decode(kind: RecordKind, body: &str) -> Result<TelemetryRecord, DecodeError> {
    let body = body.trim();
    if !body.starts_with(RECORD_MARKER) {
        return Err(DecodeError::MissingMarker);
    }

    let fields: Vec<&str> = body.split(DELIMITER).collect();
    let expected = match kind {
        RecordKind::FileSystem => FILE_SYSTEM_FIELDS,
        RecordKind::Stream => STREAM_FIELDS,
    };
    if fields.len() < expected {
        return Err(DecodeError::TooFewFields {
            kind,
            expected,
            found: fields.len(),
        });
    }

    let instance_id = InstanceId(parse_lenient_unsigned(&fields[0][RECORD_MARKER.len()..]));
    let node = decode_node(fields[1]);
    let subject = unescape_subject(fields[2]);
    let operation = fields[3];
    let content_length = parse_lenient(fields[4]);

    let record = match kind {
        RecordKind::FileSystem => TelemetryRecord::file_system(
            instance_id,
            node,
            subject,
            operation,
            content_length,
            parse_lenient_unsigned(fields[5]),
        ),
        RecordKind::Stream => {
            let record = TelemetryRecord::stream(
                instance_id,
                node,
                subject,
                operation,
                content_length,
                parse_lenient_unsigned(fields[9]),
            )
            .with_positions(parse_lenient(fields[5]), parse_lenient(fields[6]))
            .with_positional_arg(parse_lenient(fields[7]))
            .with_bytes(parse_lenient(fields[8]));

            if fields.len() > STREAM_FIELDS {
                record.with_diagnostic(fields[STREAM_FIELDS..].join(","))
            } else {
                record
            }
        }
    };
    Ok(record)
}

/// Classify the text preceding a record marker by its kind tag.
pub fn classify(prefix: &str) -> Option<RecordKind> {
    if prefix.contains(STREAM_TAG) {
        Some(RecordKind::Stream)
    } else if prefix.contains(FILE_SYSTEM_TAG) {
        Some(RecordKind::FileSystem)
    } else {
        None
    }
}

/// Where a raw log line stands with respect to telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Located<'a> {
    /// No record marker: ordinary log noise.
    NotCandidate,
    /// Marker present, but no kind tag precedes it.
    Unclassified,
    /// A record of the given kind; the body starts at the marker.
    Record(RecordKind, &'a str),
}

/// Find the record inside a raw log line, discarding any log-framework
/// prefix (timestamps, levels, logger names).
pub fn locate(line: &str) -> Located<'_> {
    let Some(start) = line.find(RECORD_MARKER) else {
        return Located::NotCandidate;
    };
    match classify(&line[..start]) {
        Some(kind) => Located::Record(kind, line[start..].trim()),
        None => Located::Unclassified,
    }
}

//! Instrumented read stream.
//!
//! `StreamProxy` wraps one open backend stream. Every call is forwarded
//! unchanged and, once the backend returns successfully, one stream-level
//! record is written to the sink. Reads dominate I/O time in the workloads
//! this is used for, so each read captures the cursor before and after the
//! call as well as the byte count.

use std::io;
use std::sync::Arc;

use iotrace_types::{
    encode_line, op, InstanceId, TelemetryRecord, CLOSED_POSITION, NOT_APPLICABLE,
};

use crate::backend::{BackendStream, Capabilities};
use crate::diagnostic;
use crate::sink::TelemetrySink;
use crate::{timed, to_i64};

/// Byte count recorded when a read hit end of stream.
pub const END_OF_STREAM: i64 = -1;

pub struct StreamProxy<S: BackendStream> {
    inner: S,
    instance_id: InstanceId,
    node: Option<String>,
    path: String,
    content_length: i64,
    diagnostics: bool,
    capabilities: Capabilities,
    sink: Arc<dyn TelemetrySink>,
}

impl<S: BackendStream> StreamProxy<S> {
    /// Wrap `inner`, the open stream for `path`. Diagnostics are off and the
    /// node is unknown until set with the builder methods.
    pub fn new(
        inner: S,
        path: impl Into<String>,
        content_length: i64,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            inner,
            instance_id: InstanceId::next(),
            node: None,
            path: path.into(),
            content_length,
            diagnostics: false,
            capabilities: Capabilities::default(),
            sink,
        }
    }

    pub fn with_node(mut self, node: Option<String>) -> Self {
        self.node = node;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: bool) -> Self {
        self.diagnostics = diagnostics;
        if diagnostics {
            diagnostic::log_call_context("newStream", &self.path);
        }
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Move the cursor to `pos`.
    pub fn seek(&mut self, pos: u64) -> io::Result<()> {
        if self.diagnostics {
            diagnostic::log_call_context(op::SEEK, &self.path);
        }
        let ((), elapsed) = timed(|| self.inner.seek(pos))?;
        self.emit(op::SEEK, NOT_APPLICABLE, to_i64(pos), NOT_APPLICABLE, elapsed);
        Ok(())
    }

    /// Current cursor position.
    pub fn pos(&mut self) -> io::Result<u64> {
        let (pos, elapsed) = timed(|| self.inner.pos())?;
        self.emit(op::GET_POS, NOT_APPLICABLE, NOT_APPLICABLE, NOT_APPLICABLE, elapsed);
        Ok(pos)
    }

    pub fn seek_to_new_source(&mut self, target: u64) -> io::Result<bool> {
        let (found, elapsed) = timed(|| self.inner.seek_to_new_source(target))?;
        self.emit(
            op::SEEK_TO_NEW_SOURCE,
            NOT_APPLICABLE,
            to_i64(target),
            NOT_APPLICABLE,
            elapsed,
        );
        Ok(found)
    }

    /// Read a single byte; `None` at end of stream.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let old_position = self.position_or_sentinel();
        let (byte, elapsed) = timed(|| self.inner.read_byte())?;
        let transferred = if byte.is_some() { 1 } else { END_OF_STREAM };
        self.emit(op::READ, old_position, NOT_APPLICABLE, transferred, elapsed);
        Ok(byte)
    }

    /// Sequential read into `buf`. Callers wanting an offset/length window
    /// pass the corresponding sub-slice.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let old_position = self.position_or_sentinel();
        let (n, elapsed) = timed(|| self.inner.read(buf))?;
        let transferred = transferred(n, buf.len());
        self.emit(op::READ, old_position, NOT_APPLICABLE, transferred, elapsed);
        Ok(n)
    }

    /// Positional read; the cursor does not move.
    pub fn read_at(&mut self, position: u64, buf: &mut [u8]) -> io::Result<usize> {
        let old_position = self.position_or_sentinel();
        let (n, elapsed) = timed(|| self.inner.read_at(position, buf))?;
        let transferred = transferred(n, buf.len());
        self.emit(op::READ, old_position, to_i64(position), transferred, elapsed);
        Ok(n)
    }

    /// Fill `buf` from `position`. The backend either transfers everything or
    /// fails, so the recorded byte count is the requested length.
    pub fn read_fully_at(&mut self, position: u64, buf: &mut [u8]) -> io::Result<()> {
        if self.diagnostics {
            diagnostic::log_call_context(op::READ_FULLY, &self.path);
        }
        let old_position = self.position_or_sentinel();
        let ((), elapsed) = timed(|| self.inner.read_fully_at(position, buf))?;
        self.emit(
            op::READ_FULLY,
            old_position,
            to_i64(position),
            to_i64(buf.len() as u64),
            elapsed,
        );
        Ok(())
    }

    /// Forward a readahead hint if the backend honours them, otherwise drop
    /// it. Never recorded.
    pub fn set_readahead(&mut self, readahead: Option<u64>) -> io::Result<()> {
        if self.capabilities.readahead {
            self.inner.set_readahead(readahead)
        } else {
            tracing::debug!(path = %self.path, ?readahead, "Readahead hint ignored");
            Ok(())
        }
    }

    /// Close the backend stream. The post-close position is recorded as
    /// `CLOSED_POSITION` when the backend can no longer report one.
    pub fn close(&mut self) -> io::Result<()> {
        tracing::info!(
            instance = %self.instance_id,
            path = %self.path,
            stream = %self.inner.describe(),
            "Closing stream"
        );
        let old_position = self.position_or_sentinel();
        let ((), elapsed) = timed(|| self.inner.close())?;
        self.emit(op::CLOSE, old_position, NOT_APPLICABLE, NOT_APPLICABLE, elapsed);
        Ok(())
    }

    /// Best-effort position for telemetry; never fails the caller.
    fn position_or_sentinel(&mut self) -> i64 {
        self.inner.pos().map(to_i64).unwrap_or(CLOSED_POSITION)
    }

    fn emit(
        &mut self,
        operation: &str,
        old_position: i64,
        positional_arg: i64,
        bytes_transferred: i64,
        elapsed_nanos: u64,
    ) {
        let real_position = self.position_or_sentinel();
        let mut record = TelemetryRecord::stream(
            self.instance_id,
            self.node.clone(),
            self.path.as_str(),
            operation,
            self.content_length,
            elapsed_nanos,
        )
        .with_positions(old_position, real_position)
        .with_positional_arg(positional_arg)
        .with_bytes(bytes_transferred);

        if self.diagnostics && TelemetryRecord::is_boundary_transfer(bytes_transferred) {
            record = record.with_diagnostic(diagnostic::capture());
        }
        self.sink.append_line(&encode_line(&record));
    }
}

/// Byte count for the record: `END_OF_STREAM` when a non-empty read returned
/// nothing.
fn transferred(n: usize, requested: usize) -> i64 {
    if n == 0 && requested > 0 {
        END_OF_STREAM
    } else {
        to_i64(n as u64)
    }
}

impl<S: BackendStream> io::Read for StreamProxy<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        StreamProxy::read(self, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InMemorySink;
    use iotrace_types::{decode, locate, Located, RecordKind};

    /// Stream over a fixed buffer, with switchable failures.
    struct ScriptedStream {
        data: Vec<u8>,
        pos: u64,
        closed: bool,
        fail_reads: bool,
        readahead: Option<u64>,
    }

    impl ScriptedStream {
        fn new(data: &[u8]) -> Self {
            Self {
                data: data.to_vec(),
                pos: 0,
                closed: false,
                fail_reads: false,
                readahead: None,
            }
        }

        fn check_open(&self) -> io::Result<()> {
            if self.closed {
                Err(io::Error::other("stream is closed"))
            } else {
                Ok(())
            }
        }
    }

    impl BackendStream for ScriptedStream {
        fn read_byte(&mut self) -> io::Result<Option<u8>> {
            self.check_open()?;
            let b = self.data.get(self.pos as usize).copied();
            if b.is_some() {
                self.pos += 1;
            }
            Ok(b)
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.check_open()?;
            if self.fail_reads {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"));
            }
            let n = self.read_at(self.pos, buf)?;
            self.pos += n as u64;
            Ok(n)
        }

        fn read_at(&mut self, position: u64, buf: &mut [u8]) -> io::Result<usize> {
            self.check_open()?;
            let start = (position as usize).min(self.data.len());
            let n = buf.len().min(self.data.len() - start);
            buf[..n].copy_from_slice(&self.data[start..start + n]);
            Ok(n)
        }

        fn read_fully_at(&mut self, position: u64, buf: &mut [u8]) -> io::Result<()> {
            if self.read_at(position, buf)? < buf.len() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short file"));
            }
            Ok(())
        }

        fn seek(&mut self, pos: u64) -> io::Result<()> {
            self.check_open()?;
            self.pos = pos;
            Ok(())
        }

        fn pos(&mut self) -> io::Result<u64> {
            self.check_open()?;
            Ok(self.pos)
        }

        fn seek_to_new_source(&mut self, _target: u64) -> io::Result<bool> {
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
            format!("ScriptedStream(pos={}, closed={})", self.pos, self.closed)
        }
    }

    fn proxy(data: &[u8]) -> (StreamProxy<ScriptedStream>, Arc<InMemorySink>) {
        let sink = Arc::new(InMemorySink::new());
        let proxy = StreamProxy::new(ScriptedStream::new(data), "/t/file", data.len() as i64, sink.clone())
            .with_node(Some("10.0.0.1".into()));
        (proxy, sink)
    }

    fn records(sink: &InMemorySink) -> Vec<TelemetryRecord> {
        sink.lines()
            .iter()
            .map(|line| match locate(line) {
                Located::Record(kind, body) => decode(kind, body).unwrap(),
                other => panic!("not a record line: {:?} ({})", other, line),
            })
            .collect()
    }

    #[test]
    fn test_read_records_positions_and_bytes() {
        let (mut p, sink) = proxy(b"hello world");
        let mut buf = [0u8; 5];
        assert_eq!(p.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");

        let recs = records(&sink);
        assert_eq!(recs.len(), 1);
        let r = &recs[0];
        assert_eq!(r.kind, RecordKind::Stream);
        assert_eq!(r.operation, op::READ);
        assert_eq!(r.old_position, 0);
        assert_eq!(r.real_position, 5);
        assert_eq!(r.positional_arg, NOT_APPLICABLE);
        assert_eq!(r.bytes_transferred, 5);
        assert_eq!(r.content_length, 11);
        assert_eq!(r.subject, "/t/file");
        assert_eq!(r.node.as_deref(), Some("10.0.0.1"));
        assert_eq!(r.instance_id, p.instance_id());
        assert!(r.diagnostic.is_none());
    }

    #[test]
    fn test_read_end_of_stream_is_minus_one() {
        let (mut p, sink) = proxy(b"ab");
        p.seek(2).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(p.read(&mut buf).unwrap(), 0);
        assert_eq!(p.read_byte().unwrap(), None);

        let recs = records(&sink);
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[1].bytes_transferred, END_OF_STREAM);
        assert_eq!(recs[2].bytes_transferred, END_OF_STREAM);
    }

    #[test]
    fn test_read_byte() {
        let (mut p, sink) = proxy(b"xy");
        assert_eq!(p.read_byte().unwrap(), Some(b'x'));
        let r = &records(&sink)[0];
        assert_eq!(r.bytes_transferred, 1);
        assert_eq!(r.old_position, 0);
        assert_eq!(r.real_position, 1);
    }

    #[test]
    fn test_seek_and_get_pos() {
        let (mut p, sink) = proxy(b"0123456789");
        p.seek(7).unwrap();
        assert_eq!(p.pos().unwrap(), 7);

        let recs = records(&sink);
        assert_eq!(recs[0].operation, op::SEEK);
        assert_eq!(recs[0].old_position, NOT_APPLICABLE);
        assert_eq!(recs[0].positional_arg, 7);
        assert_eq!(recs[0].real_position, 7);
        assert_eq!(recs[1].operation, op::GET_POS);
        assert_eq!(recs[1].positional_arg, NOT_APPLICABLE);
    }

    #[test]
    fn test_positional_read_keeps_cursor() {
        let (mut p, sink) = proxy(b"0123456789");
        p.seek(1).unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(p.read_at(6, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"678");

        let r = &records(&sink)[1];
        assert_eq!(r.operation, op::READ);
        assert_eq!(r.positional_arg, 6);
        assert_eq!(r.old_position, 1);
        assert_eq!(r.real_position, 1);
        assert_eq!(r.bytes_transferred, 3);
    }

    #[test]
    fn test_read_fully_records_requested_length() {
        let (mut p, sink) = proxy(b"0123456789");
        let mut buf = [0u8; 4];
        p.read_fully_at(2, &mut buf).unwrap();
        assert_eq!(&buf, b"2345");

        let r = &records(&sink)[0];
        assert_eq!(r.operation, op::READ_FULLY);
        assert_eq!(r.positional_arg, 2);
        assert_eq!(r.bytes_transferred, 4);
    }

    #[test]
    fn test_failed_call_propagates_and_emits_nothing() {
        let (mut p, sink) = proxy(b"0123456789");
        let mut buf = [0u8; 8];
        let err = p.read_fully_at(5, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        p.inner.fail_reads = true;
        let err = p.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(err.to_string(), "peer reset");

        assert_eq!(sink.total_appended(), 0);
    }

    #[test]
    fn test_close_records_sentinel_after_close() {
        let (mut p, sink) = proxy(b"0123456789");
        p.seek(4).unwrap();
        p.close().unwrap();

        let r = &records(&sink)[1];
        assert_eq!(r.operation, op::CLOSE);
        assert_eq!(r.old_position, 4);
        assert_eq!(r.real_position, CLOSED_POSITION);

        // Reads after close fail with the backend's error, no telemetry.
        let mut buf = [0u8; 1];
        assert!(p.read(&mut buf).is_err());
        assert_eq!(sink.total_appended(), 2);
    }

    #[test]
    fn test_diagnostic_on_boundary_reads_only() {
        let sink = Arc::new(InMemorySink::new());
        let mut p = StreamProxy::new(ScriptedStream::new(b"abc"), "/d", 3, sink.clone())
            .with_diagnostics(true);

        let mut one = [0u8; 1];
        p.read(&mut one).unwrap();
        let mut two = [0u8; 2];
        p.read(&mut two).unwrap();
        let mut empty = [0u8; 0];
        p.read(&mut empty).unwrap();

        let recs = records(&sink);
        assert_eq!(recs[0].bytes_transferred, 1);
        assert!(recs[0].diagnostic.is_some());
        assert_eq!(recs[1].bytes_transferred, 2);
        assert!(recs[1].diagnostic.is_none());
        assert_eq!(recs[2].bytes_transferred, 0);
        assert!(recs[2].diagnostic.is_some());
    }

    #[test]
    fn test_seek_and_read_fully_log_call_context() {
        let sink = Arc::new(InMemorySink::new());
        let mut p = StreamProxy::new(ScriptedStream::new(b"0123456789"), "/d/seek", 10, sink.clone())
            .with_diagnostics(true);
        let logs = crate::testing::capture_logs(|| {
            p.seek(3).unwrap();
            let mut buf = [0u8; 4];
            p.read_fully_at(5, &mut buf).unwrap();
        });
        let contexts: Vec<_> = logs.lines().filter(|l| l.contains("Call context")).collect();
        assert_eq!(contexts.len(), 2, "{}", logs);
        assert!(contexts[0].contains("seek") && contexts[0].contains("/d/seek"));
        assert!(contexts[1].contains("readFully"));

        let recs = records(&sink);
        assert_eq!(recs[0].operation, op::SEEK);
        assert_eq!(recs[0].positional_arg, 3);
        assert_eq!(recs[1].operation, op::READ_FULLY);
        assert_eq!(recs[1].bytes_transferred, 4);

        let (mut quiet, _sink) = proxy(b"0123456789");
        let logs = crate::testing::capture_logs(|| {
            quiet.seek(3).unwrap();
            let mut buf = [0u8; 4];
            quiet.read_fully_at(5, &mut buf).unwrap();
        });
        assert!(!logs.contains("Call context"), "{}", logs);
    }

    #[test]
    fn test_no_diagnostic_when_disabled() {
        let (mut p, sink) = proxy(b"a");
        p.read_byte().unwrap();
        assert!(records(&sink)[0].diagnostic.is_none());
    }

    #[test]
    fn test_readahead_gated_by_capability() {
        let (mut p, sink) = proxy(b"a");
        p.set_readahead(Some(4096)).unwrap();
        assert_eq!(p.get_ref().readahead, None);

        let mut p = p.with_capabilities(Capabilities { readahead: true });
        p.set_readahead(Some(4096)).unwrap();
        assert_eq!(p.get_ref().readahead, Some(4096));
        assert_eq!(sink.total_appended(), 0);
    }

    #[test]
    fn test_io_read_impl() {
        use std::io::Read;

        let (mut p, sink) = proxy(b"stream contents");
        let mut out = String::new();
        p.read_to_string(&mut out).unwrap();
        assert_eq!(out, "stream contents");
        // The final zero-length read is recorded as end of stream.
        let recs = records(&sink);
        assert_eq!(recs.last().unwrap().bytes_transferred, END_OF_STREAM);
    }

    #[test]
    fn test_seek_to_new_source() {
        let (mut p, sink) = proxy(b"abc");
        assert!(!p.seek_to_new_source(2).unwrap());
        let r = &records(&sink)[0];
        assert_eq!(r.operation, op::SEEK_TO_NEW_SOURCE);
        assert_eq!(r.positional_arg, 2);
    }
}

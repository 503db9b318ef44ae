//! Result sinks: where downloaded bytes go.
//!
//! By default the engine collects a response into a buffer it owns. A caller can
//! instead install a [`SinkHandle`] wrapping any async stream; the engine then
//! writes into it and reads it back for materialization, but never closes it.

use std::fmt;
use std::io::{self, SeekFrom};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};

fn unsupported(operation: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("result sink does not support {operation}"),
    )
}

/// Destination for response bytes supplied by the caller.
///
/// Capabilities are fixed for the lifetime of the sink. Reading and seeking are
/// optional; a sink that cannot read can still receive a download but cannot be
/// materialized through the engine.
#[async_trait]
pub trait ResultSink: Send {
    /// Whether the sink accepts writes.
    fn can_write(&self) -> bool;

    /// Whether the sink can be read back.
    fn can_read(&self) -> bool;

    /// Whether the sink can report and change its position.
    fn can_seek(&self) -> bool;

    /// Appends a chunk at the current position.
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Flushes buffered writes.
    async fn flush(&mut self) -> io::Result<()>;

    /// Current position.
    async fn position(&mut self) -> io::Result<u64> {
        Err(unsupported("seeking"))
    }

    /// Moves to an absolute position.
    async fn seek_to(&mut self, _position: u64) -> io::Result<()> {
        Err(unsupported("seeking"))
    }

    /// Reads from the current position to the end into `buf`.
    async fn read_to_end(&mut self, _buf: &mut Vec<u8>) -> io::Result<usize> {
        Err(unsupported("reading"))
    }
}

/// Sink over a readable, writable and seekable stream such as a
/// [`tokio::fs::File`] or an in-memory cursor.
pub struct StreamSink<S> {
    stream: S,
    writable: bool,
}

impl<S> StreamSink<S>
where
    S: AsyncRead + AsyncWrite + AsyncSeek + Unpin + Send,
{
    /// Wraps a read/write stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            writable: true,
        }
    }

    /// Wraps a stream that must not be written to.
    pub fn read_only(stream: S) -> Self {
        Self {
            stream,
            writable: false,
        }
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> fmt::Debug for StreamSink<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSink")
            .field("writable", &self.writable)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S> ResultSink for StreamSink<S>
where
    S: AsyncRead + AsyncWrite + AsyncSeek + Unpin + Send,
{
    fn can_write(&self) -> bool {
        self.writable
    }

    fn can_read(&self) -> bool {
        true
    }

    fn can_seek(&self) -> bool {
        true
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        if !self.writable {
            return Err(unsupported("writing"));
        }
        self.stream.write_all(chunk).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().await
    }

    async fn position(&mut self) -> io::Result<u64> {
        self.stream.stream_position().await
    }

    async fn seek_to(&mut self, position: u64) -> io::Result<()> {
        self.stream.seek(SeekFrom::Start(position)).await.map(|_| ())
    }

    async fn read_to_end(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        AsyncReadExt::read_to_end(&mut self.stream, buf).await
    }
}

/// Write-only sink, e.g. stdout or a socket.
pub struct WriteSink<W> {
    writer: W,
}

impl<W> WriteSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W> fmt::Debug for WriteSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl<W> ResultSink for WriteSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn can_write(&self) -> bool {
        true
    }

    fn can_read(&self) -> bool {
        false
    }

    fn can_seek(&self) -> bool {
        false
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }
}

/// Shared handle to a caller-owned sink.
///
/// The caller keeps a clone and can keep using the sink after the request is
/// finished or disposed.
#[derive(Clone)]
pub struct SinkHandle {
    sink: Arc<Mutex<Box<dyn ResultSink>>>,
    writable: bool,
    readable: bool,
    seekable: bool,
}

impl SinkHandle {
    /// Wraps a sink for installation with
    /// [`HttpRequest::set_result_sink`](super::HttpRequest::set_result_sink).
    pub fn new(sink: impl ResultSink + 'static) -> Self {
        let writable = sink.can_write();
        let readable = sink.can_read();
        let seekable = sink.can_seek();
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
            writable,
            readable,
            seekable,
        }
    }

    /// Locks the sink for direct use.
    pub async fn lock(&self) -> MutexGuard<'_, Box<dyn ResultSink>> {
        self.sink.lock().await
    }

    /// Whether the sink accepts writes.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Whether the sink can be read back.
    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.readable
    }

    /// Whether the sink can seek.
    #[must_use]
    pub fn is_seekable(&self) -> bool {
        self.seekable
    }
}

impl fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkHandle")
            .field("writable", &self.writable)
            .field("readable", &self.readable)
            .field("seekable", &self.seekable)
            .finish_non_exhaustive()
    }
}

/// Where the result of the current attempt-sequence lives.
#[derive(Debug)]
pub(crate) enum ResultSlot {
    /// Engine-owned buffer; dropped on rebuild, disposal and materialization.
    Owned(Vec<u8>),
    /// Caller-owned sink; never closed by the engine.
    External(SinkHandle),
}

impl Default for ResultSlot {
    fn default() -> Self {
        Self::Owned(Vec::new())
    }
}

impl ResultSlot {
    /// Drops the owned buffer. External sinks are left untouched.
    pub(crate) fn release(&mut self) {
        if let Self::Owned(buffer) = self {
            *buffer = Vec::new();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[tokio::test]
    async fn test_stream_sink_write_seek_read() {
        let mut sink = StreamSink::new(Cursor::new(Vec::new()));
        sink.write_chunk(b"hello ").await.unwrap();
        sink.write_chunk(b"world").await.unwrap();
        assert_eq!(sink.position().await.unwrap(), 11);

        sink.seek_to(0).await.unwrap();
        let mut out = Vec::new();
        ResultSink::read_to_end(&mut sink, &mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn test_read_only_stream_sink_rejects_writes() {
        let mut sink = StreamSink::read_only(Cursor::new(b"fixed".to_vec()));
        assert!(!sink.can_write());
        assert!(sink.write_chunk(b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_write_sink_is_not_readable() {
        let mut sink = WriteSink::new(Vec::new());
        assert!(sink.can_write());
        assert!(!sink.can_read());
        let mut out = Vec::new();
        let err = ResultSink::read_to_end(&mut sink, &mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn test_handle_caches_capabilities() {
        let handle = SinkHandle::new(WriteSink::new(Vec::new()));
        assert!(handle.is_writable());
        assert!(!handle.is_readable());
        assert!(!handle.is_seekable());
    }

    #[test]
    fn test_release_drops_owned_buffer_only() {
        let mut owned = ResultSlot::Owned(vec![1, 2, 3]);
        owned.release();
        assert!(matches!(owned, ResultSlot::Owned(ref b) if b.is_empty()));

        let handle = SinkHandle::new(StreamSink::new(Cursor::new(Vec::new())));
        let mut external = ResultSlot::External(handle);
        external.release();
        assert!(matches!(external, ResultSlot::External(_)));
    }
}

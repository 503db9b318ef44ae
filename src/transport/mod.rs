//! Transport seam between the request engine and an HTTP client.
//!
//! The engine never speaks HTTP itself. It asks a [`Transport`] for one
//! [`Connection`] per attempt, streams an optional body through a
//! [`RequestStream`], and reads the reply through a [`ResponseStream`].
//! [`HttpTransport`] is the production implementation over `reqwest`; tests plug
//! in scripted transports through the same traits.

use std::fmt;

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use crate::request::{RequestSpec, TransportError};

mod http;

pub use http::{HttpTransport, TransportConfig};

/// Factory for per-attempt connections.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Builds a connection for `spec` without performing any I/O.
    ///
    /// The engine calls this once per attempt, including every rebuild, and
    /// treats a failure here as a fault rather than a retryable transfer error.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the description cannot be turned into
    /// a connection (for example an unusable proxy).
    fn connect(&self, spec: &RequestSpec) -> Result<Box<dyn Connection>, TransportError>;
}

/// One attempt's connection.
///
/// Dropping a connection aborts whatever it still has in flight.
#[async_trait]
pub trait Connection: Send {
    /// Opens the outbound body stream announcing `content_length` bytes.
    async fn open_request_stream(
        &mut self,
        content_length: u64,
    ) -> Result<Box<dyn RequestStream>, TransportError>;

    /// Sends the request if not already sent and waits for the response head.
    ///
    /// Error statuses are reported as [`TransportError::HttpStatus`].
    async fn response(&mut self) -> Result<Response, TransportError>;
}

/// Writable request body.
#[async_trait]
pub trait RequestStream: Send {
    /// Writes one chunk.
    async fn write(&mut self, chunk: &[u8]) -> Result<(), TransportError>;

    /// Signals the end of the body.
    async fn finish(&mut self) -> Result<(), TransportError>;
}

/// Readable response body.
#[async_trait]
pub trait ResponseStream: Send {
    /// Reads up to `buf.len()` bytes; 0 means end of body.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Response head plus body stream.
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Announced body length, if any.
    pub content_length: Option<u64>,
    /// Response headers.
    pub headers: HeaderMap,
    /// Body stream.
    pub body: Box<dyn ResponseStream>,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

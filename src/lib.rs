//! Transfer Core Library
//!
//! A fluent, stateful HTTP request engine. One [`HttpRequest`] drives an
//! asynchronous upload and/or download, reports progress per chunk, rebuilds
//! and retries its connection after transport failures, supports cooperative
//! cancellation, and exposes the result from an internal buffer or a
//! caller-supplied sink.
//!
//! # Architecture
//!
//! - [`request`] - Request engine, state machine, statistics, retry policy
//! - [`transport`] - Connection seam and the `reqwest`-backed transport

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod request;
pub mod transport;

mod user_agent;

pub use reqwest::header;

// Re-export commonly used types
pub use request::{
    CancelPolicy, HttpMethod, HttpRequest, ImageData, ImageFormat, ProgressEvent, RequestBody,
    RequestError, RequestSpec, RequestState, RetryPolicy, SinkHandle, StreamSink, TextEncoding,
    TransferDirection, TransferStats, TransportError, WriteSink,
};
pub use transport::{HttpTransport, Transport, TransportConfig};

//! Fluent HTTP request engine.
//!
//! This module provides [`HttpRequest`] and the types around it:
//!
//! - [`RequestState`] and [`ProgressEvent`] for observing a transfer
//! - [`TransferStats`], an immutable per-tick snapshot of one leg
//! - [`RequestBody`] for uploads and [`SinkHandle`] for caller-owned results
//! - [`RetryPolicy`] and [`CancelPolicy`] for what happens after a failure
//! - [`RequestError`] and [`TransportError`]
//!
//! Process-wide defaults live in [`constants`].

mod abort;
mod body;
pub mod constants;
mod engine;
mod error;
mod result;
mod retry;
mod sink;
mod spec;
mod state;
mod stats;

pub use body::RequestBody;
pub use engine::HttpRequest;
pub use error::{RequestError, TransportError};
pub use result::{ImageData, ImageFormat, TextEncoding};
pub use retry::{CancelPolicy, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use sink::{ResultSink, SinkHandle, StreamSink, WriteSink};
pub use spec::{Credentials, HttpMethod, RequestSpec};
pub use state::{ProgressEvent, RequestState};
pub use stats::{TransferDirection, TransferStats};

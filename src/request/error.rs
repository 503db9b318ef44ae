//! Error types for the request engine.
//!
//! Transport failures are the only errors the engine retries. Everything else is
//! raised synchronously from the operation that detected it, or recorded as the
//! terminal error of a transfer that could not continue.

use thiserror::Error;

use super::state::RequestState;

/// Failures raised by the underlying transport while connecting, uploading or
/// downloading.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL being requested.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The connection broke for a reason the transport describes in text.
    #[error("connection to {url} failed: {message}")]
    Connection {
        /// The URL being requested.
        url: String,
        /// Transport-provided description.
        message: String,
    },

    /// The in-flight connection was aborted by `cancel()` or `dispose()`.
    #[error("request to {url} was aborted")]
    Aborted {
        /// The URL being requested.
        url: String,
    },

    /// The HTTP client could not be built from its configuration.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl TransportError {
    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a connection error with a free-form message.
    pub fn connection(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an aborted error.
    pub fn aborted(url: impl Into<String>) -> Self {
        Self::Aborted { url: url.into() }
    }

    /// Returns true when the failure was caused by an abort rather than the network.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Errors surfaced by [`HttpRequest`](super::HttpRequest) operations.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The operation is not valid in the request's current state.
    #[error("cannot {operation}: {reason}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// Why the state forbids it.
        reason: String,
    },

    /// A supplied resource fails a precondition.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Description of the failed precondition.
        reason: String,
    },

    /// The transport failed during connect, upload or download.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An invariant the engine is responsible for was violated.
    #[error("internal fault: {reason}")]
    InternalFault {
        /// Description of the fault.
        reason: String,
    },

    /// Local I/O on the upload source or a caller-supplied sink failed.
    #[error("IO error on {target}: {source}")]
    Io {
        /// The resource being read or written.
        target: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl RequestError {
    /// Creates an invalid-state error naming the current state.
    pub fn invalid_state(operation: &'static str, state: RequestState) -> Self {
        Self::InvalidState {
            operation,
            reason: format!("request is {state}"),
        }
    }

    /// Creates an invalid-state error for a request whose transfer is still running.
    pub fn in_progress(operation: &'static str) -> Self {
        Self::InvalidState {
            operation,
            reason: "a transfer is in progress".to_string(),
        }
    }

    /// Creates an invalid-state error for a request that has been disposed.
    pub fn disposed(operation: &'static str) -> Self {
        Self::InvalidState {
            operation,
            reason: "request has been disposed".to_string(),
        }
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Creates an internal fault.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::InternalFault {
            reason: reason.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(target: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            target: target.into(),
            source,
        }
    }

    /// Returns true for transport failures, the only retryable kind.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true when the error is a transport abort.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Transport(error) if error.is_aborted())
    }
}

//! Request lifecycle states and the events pushed to progress observers.

use std::fmt;

use serde::Serialize;

use super::stats::TransferStats;

/// Lifecycle state of an [`HttpRequest`](super::HttpRequest).
///
/// A request starts `Idle`, moves through `Connecting` and `Progressing` while a
/// transfer runs, and ends in one of the terminal states. A rebuild (explicit or
/// during a retry) returns it to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    /// Constructed or rebuilt; configuration is allowed.
    #[default]
    Idle,
    /// Connecting to the server; no payload has moved yet.
    Connecting,
    /// Payload bytes are moving in one direction or the other.
    Progressing,
    /// The transfer finished and the result can be materialized.
    Completed,
    /// The transfer failed and retries are exhausted.
    Failed,
    /// The transfer was cancelled by the caller.
    Cancelled,
}

impl RequestState {
    /// Returns the stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Progressing => "progressing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true for states an attempt-sequence can end in.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true while an attempt is actively connecting or moving bytes.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Progressing)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification delivered to the progress observer.
///
/// `stats` is `None` only for the cancellation notice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// State at the time of the tick.
    pub state: RequestState,
    /// Snapshot of the current leg, if any.
    pub stats: Option<TransferStats>,
    /// Attempt number within the attempt-sequence (1 for the first try).
    pub attempt: u32,
}

impl ProgressEvent {
    pub(crate) fn tick(state: RequestState, stats: TransferStats, attempt: u32) -> Self {
        Self {
            state,
            stats: Some(stats),
            attempt,
        }
    }

    pub(crate) fn cancelled(attempt: u32) -> Self {
        Self {
            state: RequestState::Cancelled,
            stats: None,
            attempt,
        }
    }
}

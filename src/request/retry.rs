//! Retry policy for failed attempts.
//!
//! Only transport failures are retried. A failure caused by `cancel()` is
//! classified separately so the caller can choose whether cancellation ends the
//! attempt-sequence or merely consumes a retry like any other transport failure.
//!
//! # Example
//!
//! ```
//! use transfer_core::request::{FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! match policy.should_retry(FailureType::Transient, 0, 3) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert!(delay.is_zero());
//!         assert_eq!(attempt, 2);
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("{reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, instrument};

use super::error::RequestError;

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each retry).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to non-zero delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// What `cancel()` does to the rest of the attempt-sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Cancellation ends the attempt-sequence in `Cancelled`.
    #[default]
    Abandon,
    /// The aborted attempt counts as a transport failure and consumes a retry.
    ConsumeRetry,
}

impl std::str::FromStr for CancelPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abandon" => Ok(Self::Abandon),
            "consume_retry" | "consume-retry" => Ok(Self::ConsumeRetry),
            other => Err(format!(
                "unknown cancel policy '{other}' (expected abandon or consume_retry)"
            )),
        }
    }
}

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Transport failure that may succeed on a fresh connection.
    Transient,
    /// The attempt was aborted by `cancel()`.
    Cancelled,
    /// Anything else; never retried.
    Fatal,
}

/// Decision on whether to rebuild and retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Rebuild and retry after the specified delay.
    Retry {
        /// How long to wait before the next attempt.
        delay: Duration,
        /// Which attempt number this will be (the first retry is attempt 2).
        attempt: u32,
    },

    /// End the attempt-sequence.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Backoff and cancellation behaviour between attempts.
///
/// The retry count itself is passed to the verb (`get_with_retries` and
/// friends), so one policy can serve requests with different bounds.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(retry - 1), max_delay) + jitter
/// ```
///
/// The default base delay is zero, so retries follow immediately and no jitter
/// is applied.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    cancel_policy: CancelPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            cancel_policy: CancelPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with exponential backoff.
    #[must_use]
    pub fn with_backoff(base_delay: Duration, max_delay: Duration, backoff_multiplier: f32) -> Self {
        Self {
            base_delay,
            max_delay,
            backoff_multiplier,
            ..Self::default()
        }
    }

    /// Replaces the cancellation policy.
    #[must_use]
    pub fn cancel_policy(mut self, cancel_policy: CancelPolicy) -> Self {
        self.cancel_policy = cancel_policy;
        self
    }

    /// Returns the configured cancellation policy.
    #[must_use]
    pub fn on_cancel(&self) -> CancelPolicy {
        self.cancel_policy
    }

    /// Determines whether to retry after a failed attempt.
    ///
    /// `retries_performed` counts rebuilds already done in this
    /// attempt-sequence; `retry_limit` is the bound given to the verb.
    #[instrument(level = "debug", skip(self))]
    pub fn should_retry(
        &self,
        failure_type: FailureType,
        retries_performed: u32,
        retry_limit: u32,
    ) -> RetryDecision {
        match failure_type {
            FailureType::Fatal => {
                return RetryDecision::DoNotRetry {
                    reason: "not a transport failure".to_string(),
                };
            }
            FailureType::Cancelled if self.cancel_policy == CancelPolicy::Abandon => {
                return RetryDecision::DoNotRetry {
                    reason: "cancelled by caller".to_string(),
                };
            }
            FailureType::Transient | FailureType::Cancelled => {}
        }

        if retries_performed >= retry_limit {
            debug!(retries_performed, retry_limit, "retries exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("retries ({retry_limit}) exhausted"),
            };
        }

        let retry = retries_performed + 1;
        let delay = self.calculate_delay(retry);
        debug!(retry, delay_ms = delay.as_millis(), "will retry");

        RetryDecision::Retry {
            delay,
            attempt: retry + 1,
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn calculate_delay(&self, retry: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);
        let exponent = f64::from(retry.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + Self::calculate_jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter() -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies the error that ended an attempt.
#[must_use]
pub fn classify_error(error: &RequestError) -> FailureType {
    if error.is_aborted() {
        FailureType::Cancelled
    } else if error.is_transport() {
        FailureType::Transient
    } else {
        FailureType::Fatal
    }
}

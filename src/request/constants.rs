//! Process-wide tunables and fixed constants for the request engine.
//!
//! The chunk size and retry count are read when a transfer starts, so changing
//! them affects transfers started afterwards and never one already in flight.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Default transfer chunk size (32 KiB). Each chunk is one progress tick.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Default number of retries after the initial attempt.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Multiple of the chunk size used as the provisional total when the server
/// does not announce a content length.
pub const PROVISIONAL_SIZE_FACTOR: u64 = 10;

/// Largest internal buffer reservation made up front from an announced length.
pub const MAX_INITIAL_BUFFER: usize = 64 * 1024 * 1024;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large bodies).
pub const READ_TIMEOUT_SECS: u64 = 300;

static CHUNK_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_CHUNK_SIZE);
static RETRY_COUNT: AtomicU32 = AtomicU32::new(DEFAULT_RETRY_COUNT);

/// Returns the chunk size used by requests that do not override it.
#[must_use]
pub fn transfer_chunk_size() -> usize {
    CHUNK_SIZE.load(Ordering::Relaxed)
}

/// Sets the process-wide chunk size. Zero is raised to one byte.
pub fn set_transfer_chunk_size(bytes: usize) {
    CHUNK_SIZE.store(bytes.max(1), Ordering::Relaxed);
}

/// Returns the retry count used by verbs called without an explicit count.
#[must_use]
pub fn default_retry_count() -> u32 {
    RETRY_COUNT.load(Ordering::Relaxed)
}

/// Sets the process-wide default retry count. Zero disables retry.
pub fn set_default_retry_count(retries: u32) {
    RETRY_COUNT.store(retries, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_CHUNK_SIZE, 32 * 1024);
        assert_eq!(DEFAULT_RETRY_COUNT, 3);
        assert_eq!(PROVISIONAL_SIZE_FACTOR, 10);
    }

    #[test]
    fn test_retry_count_tunable_round_trips() {
        let previous = default_retry_count();
        set_default_retry_count(7);
        assert_eq!(default_retry_count(), 7);
        set_default_retry_count(previous);
    }
}

//! Transfer statistics.
//!
//! [`TransferStats`] is an immutable snapshot handed to observers by value. The
//! mutable bookkeeping lives in [`TransferMeter`], which the transfer loop owns
//! and creates fresh for every attempt and every leg.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Direction of the leg a snapshot describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// No payload has moved yet.
    #[default]
    Unknown,
    /// Request body going to the server.
    Upload,
    /// Response body coming from the server.
    Download,
}

/// Snapshot of one leg's progress.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TransferStats {
    /// Bytes moved so far in this leg.
    pub transferred_bytes: u64,
    /// Bytes expected in this leg; 0 while unknown.
    pub total_bytes: u64,
    /// Bytes per second over the last tick; `None` when no time elapsed.
    pub speed: Option<f64>,
    /// Time since the previous tick.
    pub elapsed_since_last_tick: Duration,
    /// Time since the leg's meter was created.
    pub total_elapsed: Duration,
    /// Leg direction.
    pub direction: TransferDirection,
}

impl TransferStats {
    /// Fraction of the leg completed, capped at 1.0.
    ///
    /// `None` means indeterminate: the total is not known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_fraction(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        Some((self.transferred_bytes as f64 / self.total_bytes as f64).min(1.0))
    }
}

/// Mutable meter behind the snapshots of a single leg.
#[derive(Debug)]
pub(crate) struct TransferMeter {
    created: Instant,
    stats: TransferStats,
}

impl Default for TransferMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferMeter {
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            stats: TransferStats::default(),
        }
    }

    pub(crate) fn set_direction(&mut self, direction: TransferDirection) {
        self.stats.direction = direction;
    }

    pub(crate) fn set_total(&mut self, total_bytes: u64) {
        self.stats.total_bytes = total_bytes;
    }

    /// Recomputes elapsed times and returns a snapshot.
    pub(crate) fn update(&mut self) -> TransferStats {
        let total_elapsed = self.created.elapsed();
        self.stats.elapsed_since_last_tick = total_elapsed.saturating_sub(self.stats.total_elapsed);
        self.stats.total_elapsed = total_elapsed;
        self.stats
    }

    /// Records `bytes` moved since the previous tick and returns a snapshot.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn update_bytes(&mut self, bytes: usize) -> TransferStats {
        self.update();
        self.stats.transferred_bytes = self.stats.transferred_bytes.saturating_add(bytes as u64);
        let elapsed = self.stats.elapsed_since_last_tick;
        self.stats.speed = if elapsed.is_zero() {
            None
        } else {
            Some(bytes as f64 / elapsed.as_secs_f64())
        };
        self.stats
    }

    #[must_use]
    pub(crate) fn snapshot(&self) -> TransferStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fraction_indeterminate_when_total_unknown() {
        let stats = TransferStats {
            transferred_bytes: 42,
            ..TransferStats::default()
        };
        assert_eq!(stats.progress_fraction(), None);
    }

    #[test]
    fn test_progress_fraction_ratio() {
        let stats = TransferStats {
            transferred_bytes: 25,
            total_bytes: 100,
            ..TransferStats::default()
        };
        assert_eq!(stats.progress_fraction(), Some(0.25));
    }

    #[test]
    fn test_progress_fraction_capped_when_estimate_exceeded() {
        let stats = TransferStats {
            transferred_bytes: 500,
            total_bytes: 320,
            ..TransferStats::default()
        };
        assert_eq!(stats.progress_fraction(), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_meter_speed_indeterminate_without_elapsed_time() {
        let mut meter = TransferMeter::new();
        let stats = meter.update_bytes(4096);
        assert_eq!(stats.transferred_bytes, 4096);
        assert_eq!(stats.speed, None);
        assert!(stats.elapsed_since_last_tick.is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_meter_speed_from_bytes_since_last_tick() {
        let mut meter = TransferMeter::new();
        meter.set_direction(TransferDirection::Download);
        meter.set_total(3000);

        tokio::time::advance(Duration::from_millis(500)).await;
        let first = meter.update_bytes(1000);
        assert_eq!(first.speed, Some(2000.0));
        assert_eq!(first.elapsed_since_last_tick, Duration::from_millis(500));

        tokio::time::advance(Duration::from_millis(250)).await;
        let second = meter.update_bytes(1000);
        assert_eq!(second.transferred_bytes, 2000);
        assert_eq!(second.speed, Some(4000.0));
        assert_eq!(second.elapsed_since_last_tick, Duration::from_millis(250));
        assert_eq!(second.total_elapsed, Duration::from_millis(750));
        assert_eq!(second.direction, TransferDirection::Download);
    }

    #[tokio::test(start_paused = true)]
    async fn test_meter_update_without_bytes_keeps_count() {
        let mut meter = TransferMeter::new();
        meter.update_bytes(10);
        tokio::time::advance(Duration::from_millis(100)).await;
        let stats = meter.update();
        assert_eq!(stats.transferred_bytes, 10);
        assert_eq!(stats.total_elapsed, Duration::from_millis(100));
        assert_eq!(meter.snapshot(), stats);
    }
}

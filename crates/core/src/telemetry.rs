//! Telemetry samples and the per-device ring-buffered history window.
//!
//! [`HistoryWindow`] keeps samples ordered by timestamp and evicts on every
//! push, both by age against the wall clock (retention) and by count
//! (capacity). It has no locking of its own; the owning store decides how it
//! is shared.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default retention: 30 days.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);

/// Default maximum number of samples kept per device.
pub const DEFAULT_CAPACITY: usize = 50_000;

/// Window used for baseline throughput computation.
pub const BASELINE_WINDOW: Duration = Duration::from_secs(7 * 24 * 3600);

/// How far ahead of the local clock a sample timestamp may be.
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

// ---------------------------------------------------------------------------
// TelemetrySample
// ---------------------------------------------------------------------------

/// One telemetry reading for a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: Timestamp,
    /// Degrees Celsius.
    pub temperature: f64,
    /// Device-specific work units per second.
    pub throughput: f64,
    /// Watts.
    pub power: f64,
}

impl TelemetrySample {
    pub fn new(timestamp: Timestamp, temperature: f64, throughput: f64, power: f64) -> Self {
        Self {
            timestamp,
            temperature,
            throughput,
            power,
        }
    }

    /// Reject samples stamped more than [`MAX_CLOCK_SKEW_SECS`] after `now`.
    pub fn check_clock(&self, now: Timestamp) -> Result<(), CoreError> {
        let limit = now.checked_add_signed(chrono::Duration::seconds(MAX_CLOCK_SKEW_SECS));
        match limit {
            Some(limit) if self.timestamp > limit => Err(CoreError::Validation(format!(
                "sample timestamp {} is ahead of the local clock ({now})",
                self.timestamp
            ))),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// HistoryWindow
// ---------------------------------------------------------------------------

/// Ordered, bounded history of samples for a single device.
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    samples: VecDeque<TelemetrySample>,
    capacity: usize,
    retention: chrono::Duration,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_RETENTION)
    }
}

impl HistoryWindow {
    /// Create an empty window. A zero capacity is treated as one.
    pub fn new(capacity: usize, retention: Duration) -> Self {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        Self {
            samples: VecDeque::new(),
            capacity: capacity.max(1),
            retention,
        }
    }

    /// Insert a sample in timestamp order, then evict anything older than the
    /// retention window or beyond capacity.
    ///
    /// Returns the number of samples evicted.
    pub fn push(&mut self, sample: TelemetrySample) -> usize {
        self.push_at(sample, Utc::now())
    }

    /// [`push`](Self::push) with retention measured back from `now`.
    pub fn push_at(&mut self, sample: TelemetrySample, now: Timestamp) -> usize {
        let pos = self
            .samples
            .partition_point(|s| s.timestamp <= sample.timestamp);
        self.samples.insert(pos, sample);
        self.expire(now)
    }

    /// Evict samples older than `now - retention` and anything beyond
    /// capacity. Returns the number of samples evicted.
    pub fn expire(&mut self, now: Timestamp) -> usize {
        let mut evicted = 0;
        if let Some(cutoff) = now.checked_sub_signed(self.retention) {
            while self
                .samples
                .front()
                .is_some_and(|oldest| oldest.timestamp < cutoff)
            {
                self.samples.pop_front();
                evicted += 1;
            }
        }
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.samples.back()
    }

    pub fn oldest(&self) -> Option<&TelemetrySample> {
        self.samples.front()
    }

    /// The last `n` samples in chronological order.
    pub fn recent(&self, n: usize) -> Vec<TelemetrySample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).copied().collect()
    }

    /// Samples no older than `duration` before the newest sample.
    pub fn within(&self, duration: Duration) -> Vec<TelemetrySample> {
        let Some(newest) = self.samples.back().map(|s| s.timestamp) else {
            return Vec::new();
        };
        let span = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        let cutoff = newest.checked_sub_signed(span);
        self.samples
            .iter()
            .filter(|s| cutoff.map_or(true, |c| s.timestamp >= c))
            .copied()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelemetrySample> {
        self.samples.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn at(hours: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(hours)
    }

    fn sample_at(hours: i64, temp: f64) -> TelemetrySample {
        TelemetrySample::new(at(hours), temp, 100.0, 400.0)
    }

    /// Fill `window` with one sample per hour in `0..hours`, clock at the last one.
    fn fill(window: &mut HistoryWindow, hours: i64) {
        for h in 0..hours {
            window.push_at(sample_at(h, h as f64), at(h));
        }
    }

    #[test]
    fn push_keeps_chronological_order() {
        let mut window = HistoryWindow::default();
        window.push_at(sample_at(2, 60.0), at(2));
        window.push_at(sample_at(0, 50.0), at(2));
        window.push_at(sample_at(1, 55.0), at(2));
        let temps: Vec<f64> = window.iter().map(|s| s.temperature).collect();
        assert_eq!(temps, vec![50.0, 55.0, 60.0]);
    }

    #[test]
    fn retention_evicts_old_samples_on_every_push() {
        let mut window = HistoryWindow::new(1000, Duration::from_secs(24 * 3600));
        for h in 0..100 {
            window.push_at(sample_at(h, 60.0), at(h));
            let newest = window.latest().unwrap().timestamp;
            let oldest = window.oldest().unwrap().timestamp;
            assert!(newest - oldest <= chrono::Duration::hours(24));
        }
        assert_eq!(window.len(), 25);
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let mut window = HistoryWindow::new(3, DEFAULT_RETENTION);
        fill(&mut window, 5);
        let temps: Vec<f64> = window.iter().map(|s| s.temperature).collect();
        assert_eq!(temps, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn late_sample_outside_retention_is_dropped() {
        let mut window = HistoryWindow::new(100, Duration::from_secs(3600));
        window.push_at(sample_at(10, 60.0), at(10));
        let evicted = window.push_at(sample_at(0, 40.0), at(10));
        assert_eq!(evicted, 1);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn retention_is_measured_from_the_wall_clock() {
        let mut window = HistoryWindow::new(100, Duration::from_secs(24 * 3600));
        let now = Utc::now();
        for days in [41, 40] {
            let sample = TelemetrySample::new(now - chrono::Duration::days(days), 60.0, 100.0, 300.0);
            window.push(sample);
        }
        assert!(window.is_empty());
    }

    #[test]
    fn expire_drops_history_of_a_silent_device() {
        let mut window = HistoryWindow::new(100, Duration::from_secs(24 * 3600));
        fill(&mut window, 10);
        assert_eq!(window.len(), 10);

        assert_eq!(window.expire(at(30)), 6);
        assert_eq!(window.oldest().unwrap().timestamp, at(6));
        assert_eq!(window.expire(at(48)), 4);
        assert!(window.is_empty());
    }

    #[test]
    fn future_sample_does_not_wipe_the_window() {
        let mut window = HistoryWindow::new(100, Duration::from_secs(24 * 3600));
        fill(&mut window, 10);
        window.push_at(sample_at(24 * 40, 60.0), at(9));
        assert_eq!(window.len(), 11);
    }

    #[test]
    fn check_clock_rejects_samples_from_the_future() {
        let now = at(0);
        let ahead = TelemetrySample::new(now + chrono::Duration::hours(1), 60.0, 100.0, 300.0);
        assert_matches!(ahead.check_clock(now), Err(CoreError::Validation(_)));

        let skewed = TelemetrySample::new(now + chrono::Duration::seconds(60), 60.0, 100.0, 300.0);
        assert!(skewed.check_clock(now).is_ok());
        assert!(sample_at(-5, 60.0).check_clock(now).is_ok());
    }

    #[test]
    fn recent_returns_tail() {
        let mut window = HistoryWindow::default();
        fill(&mut window, 10);
        let tail: Vec<f64> = window.recent(3).iter().map(|s| s.temperature).collect();
        assert_eq!(tail, vec![7.0, 8.0, 9.0]);
        assert_eq!(window.recent(50).len(), 10);
    }

    #[test]
    fn within_filters_by_age_of_newest() {
        let mut window = HistoryWindow::default();
        fill(&mut window, 48);
        assert_eq!(window.within(Duration::from_secs(12 * 3600)).len(), 13);
        assert!(HistoryWindow::default().within(Duration::from_secs(60)).is_empty());
    }
}

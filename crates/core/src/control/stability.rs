//! Stability gating for performance-offset increases.

use async_trait::async_trait;

use crate::device::Device;
use crate::stats;
use crate::telemetry::TelemetrySample;

/// Runs a bounded workload at a candidate offset and reports pass/fail.
///
/// Implementations may block for a while; the controller wraps every call in
/// a timeout and a cancellation check, so they need not handle either.
#[async_trait]
pub trait StabilityTester: Send + Sync {
    async fn run(&self, device: &Device, candidate_offset: f64) -> bool;
}

/// Outcome of a single stability attempt as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityVerdict {
    Passed,
    Failed,
    TimedOut,
    Cancelled,
}

/// Whether recent temperatures are calm enough to try a tuning step.
///
/// Histories shorter than `lookback` count as stable.
pub fn is_thermally_stable(
    recent: &[TelemetrySample],
    lookback: usize,
    max_variance: f64,
    max_deviation: f64,
) -> bool {
    if recent.len() < lookback {
        return true;
    }
    let temps: Vec<f64> = recent[recent.len() - lookback..]
        .iter()
        .map(|s| s.temperature)
        .collect();
    stats::variance(&temps) < max_variance && stats::max_deviation(&temps) < max_deviation
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn samples(temps: &[f64]) -> Vec<TelemetrySample> {
        temps
            .iter()
            .map(|t| TelemetrySample::new(Utc::now(), *t, 100.0, 300.0))
            .collect()
    }

    #[test]
    fn short_history_counts_as_stable() {
        assert!(is_thermally_stable(&samples(&[40.0, 90.0]), 12, 25.0, 15.0));
    }

    #[test]
    fn calm_history_is_stable() {
        assert!(is_thermally_stable(&samples(&[60.0; 12]), 12, 25.0, 15.0));
    }

    #[test]
    fn swinging_history_is_unstable() {
        let temps: Vec<f64> = (0..12).map(|i| if i % 2 == 0 { 50.0 } else { 65.0 }).collect();
        assert!(!is_thermally_stable(&samples(&temps), 12, 25.0, 15.0));
    }

    #[test]
    fn only_lookback_tail_is_considered() {
        let mut temps = vec![20.0, 95.0, 20.0];
        temps.extend([60.0; 12]);
        assert!(is_thermally_stable(&samples(&temps), 12, 25.0, 15.0));
    }
}

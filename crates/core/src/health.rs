//! Per-cycle device health assessment.
//!
//! [`HealthAnalyzer::analyze`] is pure: it reads the device's history and the
//! latest sample and returns a [`HealthAssessment`]. The orchestrator runs the
//! thermal controller for the same sample afterwards and folds its actions in
//! via [`HealthAssessment::fold_control_actions`].

use chrono::Utc;
use serde::Serialize;

use crate::control::ControlAction;
use crate::device::Device;
use crate::stats;
use crate::telemetry::{HistoryWindow, TelemetrySample, BASELINE_WINDOW};
use crate::types::{DeviceId, Timestamp};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Tunable thresholds for the health assessment.
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    /// Minimum retained samples before throughput status is evaluated.
    pub min_samples: usize,
    /// Minimum samples in the 7-day slice before a baseline is defined.
    pub baseline_min_samples: usize,
    /// Share of the lowest samples discarded as transient dips.
    pub baseline_trim_fraction: f64,
    /// Throughput drop (percent of baseline) that counts as critical.
    /// Half of it counts as a warning.
    pub throughput_drop_threshold_pct: f64,
    /// Efficiency drop (percent) above which a recommendation is emitted.
    pub efficiency_drop_recommend_pct: f64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            min_samples: 24,
            baseline_min_samples: 168,
            baseline_trim_fraction: 0.2,
            throughput_drop_threshold_pct: 10.0,
            efficiency_drop_recommend_pct: 15.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureStatus {
    Normal,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThroughputStatus {
    Normal,
    Warning,
    Critical,
}

// ---------------------------------------------------------------------------
// HealthAssessment
// ---------------------------------------------------------------------------

/// Derived, per-cycle view of a device's health. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct HealthAssessment {
    pub device_id: DeviceId,
    pub temperature: f64,
    pub temperature_status: TemperatureStatus,
    pub throughput: f64,
    pub baseline_throughput: Option<f64>,
    pub throughput_drop_pct: Option<f64>,
    pub throughput_status: ThroughputStatus,
    /// Throughput per watt; `None` when power is not positive.
    pub efficiency: Option<f64>,
    pub expected_efficiency: f64,
    pub efficiency_drop_pct: Option<f64>,
    pub recommendations: Vec<String>,
    pub control_actions: Vec<ControlAction>,
    pub assessed_at: Timestamp,
}

impl HealthAssessment {
    /// Append the controller's applied actions and surface each one as a
    /// recommendation line.
    pub fn fold_control_actions(&mut self, actions: Vec<ControlAction>) {
        self.recommendations
            .extend(actions.iter().map(ControlAction::describe));
        self.control_actions.extend(actions);
    }
}

// ---------------------------------------------------------------------------
// HealthAnalyzer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct HealthAnalyzer {
    policy: HealthPolicy,
}

impl HealthAnalyzer {
    pub fn new(policy: HealthPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Assess `latest` against the device envelope and its history.
    pub fn analyze(
        &self,
        device: &Device,
        history: &HistoryWindow,
        latest: &TelemetrySample,
        expected_efficiency: f64,
    ) -> HealthAssessment {
        let mut recommendations = Vec::new();

        let temperature_status = if latest.temperature < device.max_safe_temp {
            TemperatureStatus::Normal
        } else {
            recommendations.push(format!(
                "Temperature {:.1}°C is at or above the safe limit of {:.1}°C; check airflow and fan operation",
                latest.temperature, device.max_safe_temp
            ));
            TemperatureStatus::Warning
        };

        let baseline_throughput = if history.len() >= self.policy.min_samples {
            self.baseline_throughput(history)
        } else {
            None
        };

        let throughput_drop_pct = baseline_throughput
            .filter(|b| *b > 0.0)
            .map(|b| (b - latest.throughput) / b * 100.0);

        let throughput_status = match throughput_drop_pct {
            Some(drop) if drop > self.policy.throughput_drop_threshold_pct => {
                ThroughputStatus::Critical
            }
            Some(drop) if drop > self.policy.throughput_drop_threshold_pct / 2.0 => {
                ThroughputStatus::Warning
            }
            _ => ThroughputStatus::Normal,
        };
        if let Some(drop) = throughput_drop_pct {
            if throughput_status != ThroughputStatus::Normal {
                recommendations.push(format!(
                    "Throughput is {drop:.1}% below its 7-day baseline; inspect for throttling or hardware faults"
                ));
            }
        }

        let efficiency = (latest.power > 0.0).then(|| latest.throughput / latest.power);
        let efficiency_drop_pct = match efficiency {
            Some(actual) if expected_efficiency > 0.0 => {
                Some((expected_efficiency - actual) / expected_efficiency * 100.0)
            }
            _ => None,
        };
        if let Some(drop) = efficiency_drop_pct {
            if drop > self.policy.efficiency_drop_recommend_pct {
                recommendations.push(format!(
                    "Efficiency is {drop:.1}% below the expected {expected_efficiency:.3}/W for {}; consider undervolting or re-pasting",
                    device.device_type
                ));
            }
        }

        HealthAssessment {
            device_id: device.id,
            temperature: latest.temperature,
            temperature_status,
            throughput: latest.throughput,
            baseline_throughput,
            throughput_drop_pct,
            throughput_status,
            efficiency,
            expected_efficiency,
            efficiency_drop_pct,
            recommendations,
            control_actions: Vec::new(),
            assessed_at: Utc::now(),
        }
    }

    /// Noise-robust expected throughput: mean of the upper share of the last
    /// 7 days of samples. `None` when the slice is too short.
    pub fn baseline_throughput(&self, history: &HistoryWindow) -> Option<f64> {
        let week: Vec<f64> = history
            .within(BASELINE_WINDOW)
            .iter()
            .map(|s| s.throughput)
            .collect();
        if week.len() < self.policy.baseline_min_samples {
            return None;
        }
        stats::upper_trimmed_mean(&week, self.policy.baseline_trim_fraction)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn device() -> Device {
        Device::new(7, "rtx-4090").with_max_safe_temp(80.0)
    }

    fn window_with(count: usize, temp: f64, throughput: f64, power: f64) -> HistoryWindow {
        let base = Utc::now() - Duration::hours(count as i64);
        let mut window = HistoryWindow::default();
        for i in 0..count {
            window.push(TelemetrySample::new(
                base + Duration::hours(i as i64),
                temp,
                throughput,
                power,
            ));
        }
        window
    }

    #[test]
    fn flat_healthy_device_is_normal() {
        let window = window_with(24, 68.0, 115.0, 440.0);
        let latest = *window.latest().unwrap();
        let assessment = HealthAnalyzer::default().analyze(&device(), &window, &latest, 0.2);
        assert_eq!(assessment.temperature_status, TemperatureStatus::Normal);
        assert_eq!(assessment.throughput_status, ThroughputStatus::Normal);
        assert!(assessment.baseline_throughput.is_none());
    }

    #[test]
    fn temperature_at_limit_is_warning() {
        let window = window_with(1, 80.0, 100.0, 400.0);
        let latest = *window.latest().unwrap();
        let assessment = HealthAnalyzer::default().analyze(&device(), &window, &latest, 0.2);
        assert_eq!(assessment.temperature_status, TemperatureStatus::Warning);
        assert!(!assessment.recommendations.is_empty());
    }

    #[test]
    fn baseline_requires_a_week_of_samples() {
        let analyzer = HealthAnalyzer::default();
        assert!(analyzer
            .baseline_throughput(&window_with(167, 60.0, 100.0, 400.0))
            .is_none());
        assert_eq!(
            analyzer.baseline_throughput(&window_with(168, 60.0, 100.0, 400.0)),
            Some(100.0)
        );
    }

    #[test]
    fn throughput_drop_classification() {
        let window = window_with(168, 60.0, 100.0, 400.0);
        let analyzer = HealthAnalyzer::default();
        let at = |throughput: f64| {
            let sample = TelemetrySample::new(Utc::now(), 60.0, throughput, 400.0);
            analyzer
                .analyze(&device(), &window, &sample, 0.2)
                .throughput_status
        };
        assert_eq!(at(97.0), ThroughputStatus::Normal);
        assert_eq!(at(93.0), ThroughputStatus::Warning);
        assert_eq!(at(85.0), ThroughputStatus::Critical);
    }

    #[test]
    fn efficiency_drop_against_expected() {
        let window = window_with(1, 60.0, 60.0, 400.0);
        let latest = *window.latest().unwrap();
        let assessment = HealthAnalyzer::default().analyze(&device(), &window, &latest, 0.2);
        assert_eq!(assessment.efficiency, Some(0.15));
        let drop = assessment.efficiency_drop_pct.unwrap();
        assert!((drop - 25.0).abs() < 1e-9);
        assert!(assessment
            .recommendations
            .iter()
            .any(|r| r.contains("Efficiency")));
    }

    #[test]
    fn zero_power_has_no_efficiency() {
        let window = window_with(1, 60.0, 60.0, 0.0);
        let latest = *window.latest().unwrap();
        let assessment = HealthAnalyzer::default().analyze(&device(), &window, &latest, 0.2);
        assert!(assessment.efficiency.is_none());
        assert!(assessment.efficiency_drop_pct.is_none());
    }
}

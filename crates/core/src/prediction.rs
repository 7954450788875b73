//! Failure prediction from temperature and throughput trends.
//!
//! Two independent sub-analyses (thermal trend, throughput stability) each
//! produce a [`FailurePrediction`]; a third, cross-correlation check adds a
//! coupling prediction when temperature and throughput move strongly against
//! each other. Short histories yield the low-risk sentinel rather than an
//! error.

use serde::Serialize;

use crate::stats;
use crate::types::DeviceId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Predicted hours used when there is no actionable horizon.
pub const NO_HORIZON_HOURS: f64 = 999.0;

/// Failure probability reported when history is too short to analyse.
pub const INSUFFICIENT_DATA_PROBABILITY: f64 = 0.05;

/// Predictions below this horizon require immediate action.
pub const IMMEDIATE_ACTION_HOURS: f64 = 24.0;

// ---------------------------------------------------------------------------
// RiskLevel
// ---------------------------------------------------------------------------

/// Ordinal severity; `Ord` follows `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// The subsystem a prediction is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Thermal,
    Performance,
    /// Temperature and throughput strongly anti-correlated.
    ThermalPerformanceCoupling,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Thermal => "thermal",
            Component::Performance => "performance",
            Component::ThermalPerformanceCoupling => "thermal_performance_coupling",
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// One row of a score → outcome table: scores `>= min_score` map here.
#[derive(Debug, Clone, Copy)]
pub struct RiskBand {
    pub min_score: u32,
    pub level: RiskLevel,
    pub probability: f64,
    pub hours: f64,
}

const fn band(min_score: u32, level: RiskLevel, probability: f64, hours: f64) -> RiskBand {
    RiskBand {
        min_score,
        level,
        probability,
        hours,
    }
}

/// Heuristic thresholds for risk scoring. Defaults are policy, not physics.
#[derive(Debug, Clone)]
pub struct RiskPolicy {
    /// Samples analysed by the trend checks (and their minimum).
    pub trend_window: usize,
    /// Samples analysed by the correlation check (and its minimum).
    pub correlation_window: usize,
    /// Tail examined for single-step throughput drops.
    pub recent_drop_window: usize,

    pub temp_mean_high: f64,
    pub temp_mean_elevated: f64,
    pub temp_max_high: f64,
    pub temp_max_elevated: f64,
    pub temp_slope_rising: f64,
    pub temp_variance_unstable: f64,
    /// Descending by `min_score`; the final row is the fallback.
    pub thermal_bands: [RiskBand; 4],

    pub throughput_slope_falling: f64,
    /// Relative standard deviation (fraction of mean) considered unstable.
    pub throughput_cv_unstable: f64,
    pub throughput_drop_severe_pct: f64,
    pub throughput_drop_notable_pct: f64,
    pub performance_bands: [RiskBand; 4],

    pub coupling_correlation: f64,
    pub coupling_probability: f64,
    pub coupling_hours: f64,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            trend_window: 24,
            correlation_window: 72,
            recent_drop_window: 6,

            temp_mean_high: 70.0,
            temp_mean_elevated: 60.0,
            temp_max_high: 85.0,
            temp_max_elevated: 80.0,
            temp_slope_rising: 0.5,
            temp_variance_unstable: 25.0,
            thermal_bands: [
                band(5, RiskLevel::Critical, 0.8, 48.0),
                band(3, RiskLevel::High, 0.6, 168.0),
                band(2, RiskLevel::Medium, 0.3, 336.0),
                band(0, RiskLevel::Low, 0.1, NO_HORIZON_HOURS),
            ],

            throughput_slope_falling: -0.1,
            throughput_cv_unstable: 0.1,
            throughput_drop_severe_pct: 15.0,
            throughput_drop_notable_pct: 10.0,
            performance_bands: [
                band(4, RiskLevel::Critical, 0.8, 72.0),
                band(3, RiskLevel::High, 0.6, 168.0),
                band(2, RiskLevel::Medium, 0.4, 336.0),
                band(0, RiskLevel::Low, 0.15, NO_HORIZON_HOURS),
            ],

            coupling_correlation: -0.7,
            coupling_probability: 0.7,
            coupling_hours: 96.0,
        }
    }
}

fn classify(bands: &[RiskBand], score: u32) -> RiskBand {
    bands
        .iter()
        .find(|b| score >= b.min_score)
        .copied()
        .unwrap_or(band(0, RiskLevel::Low, 0.1, NO_HORIZON_HOURS))
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FailurePrediction {
    pub component: Component,
    pub risk_score: u32,
    pub failure_probability: f64,
    pub predicted_hours_to_failure: f64,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
}

impl FailurePrediction {
    /// The designed default for a component without enough history.
    pub fn insufficient_data(component: Component) -> Self {
        Self {
            component,
            risk_score: 0,
            failure_probability: INSUFFICIENT_DATA_PROBABILITY,
            predicted_hours_to_failure: NO_HORIZON_HOURS,
            risk_level: RiskLevel::Low,
            recommendations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionReport {
    pub device_id: DeviceId,
    pub predictions: Vec<FailurePrediction>,
    pub overall_risk_level: RiskLevel,
    pub immediate_action_required: bool,
    pub next_maintenance_due_hours: f64,
}

impl PredictionReport {
    /// Derive the summary fields from a list of predictions.
    pub fn from_predictions(device_id: DeviceId, predictions: Vec<FailurePrediction>) -> Self {
        let overall_risk_level = predictions
            .iter()
            .map(|p| p.risk_level)
            .max()
            .unwrap_or(RiskLevel::Low);
        let immediate_action_required = predictions
            .iter()
            .any(|p| p.predicted_hours_to_failure < IMMEDIATE_ACTION_HOURS);
        let next_maintenance_due_hours = predictions
            .iter()
            .map(|p| p.predicted_hours_to_failure)
            .fold(NO_HORIZON_HOURS, f64::min);
        Self {
            device_id,
            predictions,
            overall_risk_level,
            immediate_action_required,
            next_maintenance_due_hours,
        }
    }
}

// ---------------------------------------------------------------------------
// FailurePredictor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct FailurePredictor {
    policy: RiskPolicy,
}

impl FailurePredictor {
    pub fn new(policy: RiskPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Run every sub-analysis over the device's series (oldest first).
    pub fn predict(
        &self,
        device_id: DeviceId,
        temperatures: &[f64],
        throughputs: &[f64],
        powers: &[f64],
    ) -> PredictionReport {
        let mut predictions = vec![
            self.temperature_trend(temperatures),
            self.throughput_stability(throughputs),
        ];
        if let Some(coupling) = self.correlation(temperatures, throughputs, powers) {
            predictions.push(coupling);
        }
        PredictionReport::from_predictions(device_id, predictions)
    }

    /// Thermal trend risk over the last `trend_window` samples.
    pub fn temperature_trend(&self, temperatures: &[f64]) -> FailurePrediction {
        let p = &self.policy;
        if temperatures.len() < p.trend_window {
            return FailurePrediction::insufficient_data(Component::Thermal);
        }
        let recent = tail(temperatures, p.trend_window);
        let mean = stats::mean(recent);
        let max = stats::max(recent);
        let variance = stats::variance(recent);
        let slope = stats::slope(recent);

        let mut score = 0;
        let mut recommendations = Vec::new();
        if mean > p.temp_mean_high {
            score += 2;
        } else if mean > p.temp_mean_elevated {
            score += 1;
        }
        if max > p.temp_max_high {
            score += 2;
            recommendations.push(format!(
                "Peak temperature {max:.1}°C; clean heatsinks and verify thermal paste"
            ));
        } else if max > p.temp_max_elevated {
            score += 1;
        }
        if slope > p.temp_slope_rising {
            score += 1;
            recommendations.push(format!(
                "Temperature rising {slope:.2}°C per sample; check fans and ambient airflow"
            ));
        }
        if variance > p.temp_variance_unstable {
            score += 1;
            recommendations.push("Temperature is unstable; inspect fan bearings".to_string());
        }

        let outcome = classify(&p.thermal_bands, score);
        if outcome.level >= RiskLevel::High && recommendations.is_empty() {
            recommendations.push(format!(
                "Sustained average temperature {mean:.1}°C; improve cooling"
            ));
        }
        FailurePrediction {
            component: Component::Thermal,
            risk_score: score,
            failure_probability: outcome.probability,
            predicted_hours_to_failure: outcome.hours,
            risk_level: outcome.level,
            recommendations,
        }
    }

    /// Throughput stability risk over the last `trend_window` samples.
    pub fn throughput_stability(&self, throughputs: &[f64]) -> FailurePrediction {
        let p = &self.policy;
        if throughputs.len() < p.trend_window {
            return FailurePrediction::insufficient_data(Component::Performance);
        }
        let recent = tail(throughputs, p.trend_window);
        let mean = stats::mean(recent);
        let std_dev = stats::std_dev(recent);
        let slope = stats::slope(recent);
        let max_drop = stats::max_step_drop_pct(tail(recent, p.recent_drop_window));

        let mut score = 0;
        let mut recommendations = Vec::new();
        if slope < p.throughput_slope_falling {
            score += 2;
            recommendations.push(format!(
                "Throughput declining {:.2} units per sample; run hardware diagnostics",
                slope.abs()
            ));
        } else if slope < 0.0 {
            score += 1;
        }
        if std_dev > mean * p.throughput_cv_unstable {
            score += 1;
            recommendations.push("Throughput is erratic; check power delivery".to_string());
        }
        if max_drop > p.throughput_drop_severe_pct {
            score += 2;
            recommendations.push(format!(
                "Sudden {max_drop:.1}% throughput drop; inspect for failing memory or VRM"
            ));
        } else if max_drop > p.throughput_drop_notable_pct {
            score += 1;
        }

        let outcome = classify(&p.performance_bands, score);
        FailurePrediction {
            component: Component::Performance,
            risk_score: score,
            failure_probability: outcome.probability,
            predicted_hours_to_failure: outcome.hours,
            risk_level: outcome.level,
            recommendations,
        }
    }

    /// Coupling check: `Some` only when all three series hold a full
    /// correlation window and temperature/throughput are strongly
    /// anti-correlated.
    pub fn correlation(
        &self,
        temperatures: &[f64],
        throughputs: &[f64],
        powers: &[f64],
    ) -> Option<FailurePrediction> {
        let p = &self.policy;
        let window = p.correlation_window;
        if temperatures.len() < window || throughputs.len() < window || powers.len() < window {
            return None;
        }
        let r = stats::pearson(tail(temperatures, window), tail(throughputs, window))?;
        if r >= p.coupling_correlation {
            return None;
        }
        Some(FailurePrediction {
            component: Component::ThermalPerformanceCoupling,
            risk_score: 0,
            failure_probability: p.coupling_probability,
            predicted_hours_to_failure: p.coupling_hours,
            risk_level: RiskLevel::High,
            recommendations: vec![format!(
                "Throughput falls as temperature rises (r = {r:.2}); device is thermally limited"
            )],
        })
    }
}

fn tail(values: &[f64], n: usize) -> &[f64] {
    &values[values.len().saturating_sub(n)..]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(from: f64, to: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| from + (to - from) * i as f64 / (n - 1) as f64)
            .collect()
    }

    #[test]
    fn short_history_returns_sentinel_for_every_category() {
        let predictor = FailurePredictor::default();
        let report = predictor.predict(1, &[90.0; 23], &[100.0; 23], &[400.0; 23]);
        assert_eq!(report.predictions.len(), 2);
        for p in &report.predictions {
            assert_eq!(p.risk_level, RiskLevel::Low);
            assert_eq!(p.predicted_hours_to_failure, NO_HORIZON_HOURS);
            assert_eq!(p.failure_probability, INSUFFICIENT_DATA_PROBABILITY);
            assert!(p.recommendations.is_empty());
        }
        assert_eq!(report.overall_risk_level, RiskLevel::Low);
        assert!(!report.immediate_action_required);
    }

    #[test]
    fn flat_moderate_temperature_is_low_risk() {
        let predictor = FailurePredictor::default();
        let report = predictor.predict(1, &[68.0; 24], &[115.0; 24], &[440.0; 24]);
        assert_eq!(report.overall_risk_level, RiskLevel::Low);
        assert_eq!(report.predictions[0].risk_score, 1);
        assert_eq!(report.predictions[1].risk_score, 0);
    }

    #[test]
    fn rising_temperature_is_critical() {
        let prediction = FailurePredictor::default().temperature_trend(&linear(70.0, 95.0, 24));
        assert!(prediction.risk_score >= 5);
        assert_eq!(prediction.risk_level, RiskLevel::Critical);
        assert_eq!(prediction.predicted_hours_to_failure, 48.0);
        assert_eq!(prediction.failure_probability, 0.8);
    }

    #[test]
    fn thermal_bands_map_scores() {
        let predictor = FailurePredictor::default();
        // mean 75 (+2), max 82 (+1): score 3 -> high
        let mut temps = vec![75.0; 23];
        temps.push(82.0);
        let prediction = predictor.temperature_trend(&temps);
        assert_eq!(prediction.risk_score, 3);
        assert_eq!(prediction.risk_level, RiskLevel::High);
        assert_eq!(prediction.predicted_hours_to_failure, 168.0);

        // mean 72 (+2) only -> medium
        let prediction = predictor.temperature_trend(&[72.0; 24]);
        assert_eq!(prediction.risk_level, RiskLevel::Medium);
        assert_eq!(prediction.predicted_hours_to_failure, 336.0);
    }

    #[test]
    fn sharp_throughput_drop_is_at_least_high() {
        let mut throughputs = vec![100.0; 20];
        throughputs.extend([80.0; 4]);
        let prediction = FailurePredictor::default().throughput_stability(&throughputs);
        assert!(prediction.risk_level >= RiskLevel::High);
        assert_eq!(prediction.risk_level, RiskLevel::Critical);
        assert_eq!(prediction.predicted_hours_to_failure, 72.0);
    }

    #[test]
    fn moderate_throughput_drop_is_high() {
        let mut throughputs = vec![100.0; 20];
        throughputs.extend([88.0; 4]);
        let prediction = FailurePredictor::default().throughput_stability(&throughputs);
        // slope < -0.1 (+2), 12% drop (+1), stddev below 10% of mean.
        assert_eq!(prediction.risk_score, 3);
        assert_eq!(prediction.risk_level, RiskLevel::High);
        assert_eq!(prediction.predicted_hours_to_failure, 168.0);
    }

    #[test]
    fn drop_outside_recent_window_is_ignored_by_step_check() {
        let mut throughputs = vec![100.0; 10];
        throughputs.extend([80.0; 14]);
        let prediction = FailurePredictor::default().throughput_stability(&throughputs);
        assert!(prediction
            .recommendations
            .iter()
            .all(|r| !r.contains("Sudden")));
    }

    #[test]
    fn strong_anti_correlation_adds_coupling_prediction() {
        let temps = linear(60.0, 80.0, 72);
        let throughputs = linear(120.0, 90.0, 72);
        let powers = vec![400.0; 72];
        let report = FailurePredictor::default().predict(1, &temps, &throughputs, &powers);
        let coupling = report
            .predictions
            .iter()
            .find(|p| p.component == Component::ThermalPerformanceCoupling)
            .expect("coupling prediction expected");
        assert_eq!(coupling.risk_level, RiskLevel::High);
        assert_eq!(coupling.predicted_hours_to_failure, 96.0);
        assert!(report.overall_risk_level >= RiskLevel::High);
    }

    #[test]
    fn correlation_requires_full_window_on_all_series() {
        let temps = linear(60.0, 80.0, 72);
        let throughputs = linear(120.0, 90.0, 72);
        let predictor = FailurePredictor::default();
        assert!(predictor
            .correlation(&temps, &throughputs, &[400.0; 71])
            .is_none());
    }

    #[test]
    fn overall_level_is_maximum_of_predictions() {
        let mut low = FailurePrediction::insufficient_data(Component::Thermal);
        low.predicted_hours_to_failure = 500.0;
        let mut high = FailurePrediction::insufficient_data(Component::Performance);
        high.risk_level = RiskLevel::High;
        high.predicted_hours_to_failure = 20.0;
        let report = PredictionReport::from_predictions(3, vec![low, high]);
        assert_eq!(report.overall_risk_level, RiskLevel::High);
        assert!(report.immediate_action_required);
        assert_eq!(report.next_maintenance_due_hours, 20.0);
    }
}

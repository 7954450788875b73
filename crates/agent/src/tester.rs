//! Telemetry-based stability probe.
//!
//! [`TelemetryProbeTester`] reads the device, waits a settle period with the
//! candidate offset in place, and reads again. The candidate passes when the
//! device stays below its safe limit by `margin` and throughput has not
//! fallen. Missing readings fail the probe.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thermaguard_core::control::StabilityTester;
use thermaguard_core::device::Device;

use crate::registry::TelemetrySource;

pub const DEFAULT_SETTLE: Duration = Duration::from_secs(30);
pub const DEFAULT_MARGIN: f64 = 5.0;

pub struct TelemetryProbeTester {
    source: Arc<dyn TelemetrySource>,
    settle: Duration,
    margin: f64,
    /// Fraction of the pre-probe throughput that may be lost.
    throughput_tolerance: f64,
}

impl TelemetryProbeTester {
    pub fn new(source: Arc<dyn TelemetrySource>) -> Self {
        Self {
            source,
            settle: DEFAULT_SETTLE,
            margin: DEFAULT_MARGIN,
            throughput_tolerance: 0.0,
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_throughput_tolerance(mut self, tolerance: f64) -> Self {
        self.throughput_tolerance = tolerance.clamp(0.0, 1.0);
        self
    }
}

#[async_trait]
impl StabilityTester for TelemetryProbeTester {
    async fn run(&self, device: &Device, candidate_offset: f64) -> bool {
        let Some(before) = self.source.latest(device).await else {
            tracing::debug!(device_id = device.id, "No baseline reading for stability probe");
            return false;
        };
        tokio::time::sleep(self.settle).await;
        let Some(after) = self.source.latest(device).await else {
            tracing::debug!(device_id = device.id, "No reading after stability probe settle");
            return false;
        };

        let cool_enough = after.temperature < device.max_safe_temp - self.margin;
        let kept_throughput =
            after.throughput >= before.throughput * (1.0 - self.throughput_tolerance);
        tracing::debug!(
            device_id = device.id,
            candidate_offset,
            temperature = after.temperature,
            throughput_before = before.throughput,
            throughput_after = after.throughput,
            passed = cool_enough && kept_throughput,
            "Stability probe finished"
        );
        cool_enough && kept_throughput
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use thermaguard_core::telemetry::TelemetrySample;

    /// Returns queued readings in order, then `None`.
    struct QueuedSource(Mutex<VecDeque<(f64, f64)>>);

    impl QueuedSource {
        fn new(readings: &[(f64, f64)]) -> Arc<Self> {
            Arc::new(Self(Mutex::new(readings.iter().copied().collect())))
        }
    }

    #[async_trait]
    impl TelemetrySource for QueuedSource {
        async fn latest(&self, _device: &Device) -> Option<TelemetrySample> {
            let (temp, throughput) = self.0.lock().unwrap().pop_front()?;
            Some(TelemetrySample::new(Utc::now(), temp, throughput, 300.0))
        }
    }

    fn device() -> Device {
        Device::new(1, "gpu").with_max_safe_temp(80.0)
    }

    fn tester(readings: &[(f64, f64)]) -> TelemetryProbeTester {
        TelemetryProbeTester::new(QueuedSource::new(readings)).with_settle(Duration::ZERO)
    }

    #[tokio::test]
    async fn cool_and_steady_passes() {
        assert!(tester(&[(60.0, 100.0), (66.0, 104.0)]).run(&device(), 100.0).await);
    }

    #[tokio::test]
    async fn heating_into_margin_fails() {
        assert!(!tester(&[(60.0, 100.0), (76.0, 110.0)]).run(&device(), 100.0).await);
    }

    #[tokio::test]
    async fn throughput_loss_fails() {
        assert!(!tester(&[(60.0, 100.0), (62.0, 97.0)]).run(&device(), 100.0).await);
    }

    #[tokio::test]
    async fn tolerance_absorbs_small_loss() {
        let probe = tester(&[(60.0, 100.0), (62.0, 97.0)]).with_throughput_tolerance(0.05);
        assert!(probe.run(&device(), 100.0).await);
    }

    #[tokio::test]
    async fn missing_reading_fails() {
        assert!(!tester(&[(60.0, 100.0)]).run(&device(), 100.0).await);
    }
}

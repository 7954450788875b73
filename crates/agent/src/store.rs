//! In-memory telemetry store.
//!
//! One [`HistoryWindow`] per registered device, each behind its own
//! reader/writer lock so ingestion for one device never blocks analysis of
//! another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thermaguard_core::telemetry::{HistoryWindow, TelemetrySample};
use thermaguard_core::types::DeviceId;
use thermaguard_core::CoreError;
use tokio::sync::RwLock;

type Window = Arc<RwLock<HistoryWindow>>;

pub struct TelemetryStore {
    windows: RwLock<HashMap<DeviceId, Window>>,
    capacity: usize,
    retention: Duration,
}

impl TelemetryStore {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            capacity,
            retention,
        }
    }

    /// Create an empty window for `device_id`. No-op if it already exists.
    pub async fn register(&self, device_id: DeviceId) {
        let mut windows = self.windows.write().await;
        windows.entry(device_id).or_insert_with(|| {
            tracing::debug!(device_id, "Registered device in telemetry store");
            Arc::new(RwLock::new(HistoryWindow::new(self.capacity, self.retention)))
        });
    }

    /// Append a sample and prune by retention and capacity.
    ///
    /// Samples stamped ahead of the local clock are rejected.
    pub async fn ingest(&self, device_id: DeviceId, sample: TelemetrySample) -> Result<(), CoreError> {
        let window = self.window(device_id).await?;
        let now = Utc::now();
        sample.check_clock(now)?;
        let evicted = window.write().await.push_at(sample, now);
        if evicted > 0 {
            tracing::debug!(device_id, evicted, "Pruned telemetry history");
        }
        Ok(())
    }

    /// Drop expired samples from every window, including devices that have
    /// stopped reporting. Returns the number of samples evicted.
    pub async fn expire_all(&self) -> usize {
        let windows: Vec<(DeviceId, Window)> = self
            .windows
            .read()
            .await
            .iter()
            .map(|(id, w)| (*id, Arc::clone(w)))
            .collect();
        let now = Utc::now();
        let mut total = 0;
        for (device_id, window) in windows {
            let evicted = window.write().await.expire(now);
            if evicted > 0 {
                tracing::debug!(device_id, evicted, "Expired telemetry history");
            }
            total += evicted;
        }
        total
    }

    /// Samples within `duration` of the newest sample, oldest first.
    pub async fn history(&self, device_id: DeviceId, duration: Duration) -> Vec<TelemetrySample> {
        match self.window(device_id).await {
            Ok(window) => window.read().await.within(duration),
            Err(_) => Vec::new(),
        }
    }

    /// The last `n` samples, oldest first.
    pub async fn recent(&self, device_id: DeviceId, n: usize) -> Vec<TelemetrySample> {
        match self.window(device_id).await {
            Ok(window) => window.read().await.recent(n),
            Err(_) => Vec::new(),
        }
    }

    pub async fn latest(&self, device_id: DeviceId) -> Option<TelemetrySample> {
        let window = self.window(device_id).await.ok()?;
        let latest = window.read().await.latest().copied();
        latest
    }

    pub async fn sample_count(&self, device_id: DeviceId) -> usize {
        match self.window(device_id).await {
            Ok(window) => window.read().await.len(),
            Err(_) => 0,
        }
    }

    pub async fn total_samples(&self) -> usize {
        let windows: Vec<Window> = self.windows.read().await.values().cloned().collect();
        let mut total = 0;
        for window in windows {
            total += window.read().await.len();
        }
        total
    }

    /// Run `f` against the device's full window under a read lock.
    pub async fn with_window<R>(
        &self,
        device_id: DeviceId,
        f: impl FnOnce(&HistoryWindow) -> R,
    ) -> Result<R, CoreError> {
        let window = self.window(device_id).await?;
        let guard = window.read().await;
        Ok(f(&guard))
    }

    async fn window(&self, device_id: DeviceId) -> Result<Window, CoreError> {
        self.windows
            .read()
            .await
            .get(&device_id)
            .cloned()
            .ok_or(CoreError::UnknownDevice(device_id))
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(
            thermaguard_core::telemetry::DEFAULT_CAPACITY,
            thermaguard_core::telemetry::DEFAULT_RETENTION,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Fire-and-forget alert dispatch.
//!
//! [`AlertDispatcher::dispatch`] applies the cooldown, then spawns the
//! delivery on its own task under a timeout. Delivery errors are logged and
//! never reach the caller, so a slow or broken sink cannot stall a fleet
//! cycle.

use std::sync::Arc;
use std::time::Duration;

use thermaguard_core::alert::{Alert, AlertCooldownTracker};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::delivery::{AlertSink, DeliveryError};

/// Default bound on a single delivery, retries included.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    cooldown: Mutex<AlertCooldownTracker>,
    timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self {
            sink,
            cooldown: Mutex::new(AlertCooldownTracker::default()),
            timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Queue `alert` for delivery.
    ///
    /// Returns `None` when the alert is suppressed by the cooldown, otherwise
    /// the handle of the delivery task. Callers normally drop the handle.
    pub async fn dispatch(&self, alert: Alert) -> Option<JoinHandle<()>> {
        let allowed = {
            let mut tracker = self.cooldown.lock().await;
            tracker.should_alert(&alert)
        };
        if !allowed {
            tracing::debug!(
                device_id = alert.device_id,
                title = %alert.title,
                "Alert suppressed by cooldown"
            );
            return None;
        }

        let sink = Arc::clone(&self.sink);
        let timeout = self.timeout;
        Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, sink.send(&alert)).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout(timeout)),
            };
            if let Err(e) = result {
                tracing::warn!(
                    device_id = alert.device_id,
                    title = %alert.title,
                    error = %e,
                    "Alert delivery failed"
                );
            }
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thermaguard_core::alert::AlertSeverity;

    #[derive(Default)]
    struct CountingSink {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        async fn send(&self, _alert: &Alert) -> Result<(), DeliveryError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AlertSink for FailingSink {
        async fn send(&self, _alert: &Alert) -> Result<(), DeliveryError> {
            Err(DeliveryError::Rejected("sink offline".into()))
        }
    }

    struct StalledSink;

    #[async_trait]
    impl AlertSink for StalledSink {
        async fn send(&self, _alert: &Alert) -> Result<(), DeliveryError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn warning(device_id: i64) -> Alert {
        Alert::new(device_id, "Thermal throttle", "hot", AlertSeverity::Warning)
    }

    #[tokio::test]
    async fn delivers_and_applies_cooldown() {
        let sink = Arc::new(CountingSink::default());
        let dispatcher = AlertDispatcher::new(sink.clone());

        dispatcher.dispatch(warning(1)).await.unwrap().await.unwrap();
        assert!(dispatcher.dispatch(warning(1)).await.is_none());
        dispatcher.dispatch(warning(2)).await.unwrap().await.unwrap();

        assert_eq!(sink.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn critical_alerts_bypass_cooldown() {
        let sink = Arc::new(CountingSink::default());
        let dispatcher = AlertDispatcher::new(sink.clone());
        for _ in 0..3 {
            let alert = Alert::new(1, "Thermal throttle", "hot", AlertSeverity::Critical);
            dispatcher.dispatch(alert).await.unwrap().await.unwrap();
        }
        assert_eq!(sink.sent.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn sink_failure_is_contained() {
        let dispatcher = AlertDispatcher::new(Arc::new(FailingSink));
        let handle = dispatcher.dispatch(warning(1)).await.unwrap();
        assert!(handle.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_sink_is_cut_off_by_timeout() {
        let dispatcher =
            AlertDispatcher::new(Arc::new(StalledSink)).with_timeout(Duration::from_secs(2));
        let handle = dispatcher.dispatch(warning(1)).await.unwrap();
        assert!(handle.await.is_ok());
    }
}

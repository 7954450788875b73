//! Sink that writes alerts to the tracing log. Used when no webhook is
//! configured.

use async_trait::async_trait;
use thermaguard_core::alert::{Alert, AlertSeverity};

use super::{AlertSink, DeliveryError};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn send(&self, alert: &Alert) -> Result<(), DeliveryError> {
        match alert.severity {
            AlertSeverity::Critical | AlertSeverity::Warning => tracing::warn!(
                device_id = alert.device_id,
                severity = alert.severity.as_str(),
                title = %alert.title,
                "{}",
                alert.message
            ),
            AlertSeverity::Minor | AlertSeverity::Info => tracing::info!(
                device_id = alert.device_id,
                severity = alert.severity.as_str(),
                title = %alert.title,
                "{}",
                alert.message
            ),
        }
        Ok(())
    }
}

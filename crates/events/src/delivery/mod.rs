//! Alert delivery channels.
//!
//! Every channel implements [`AlertSink`]. The orchestrator never calls a
//! sink directly; it goes through [`crate::AlertDispatcher`], which spawns
//! the delivery and logs failures.

use async_trait::async_trait;
use thermaguard_core::alert::Alert;

pub mod log;
pub mod webhook;

use webhook::WebhookError;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Webhook delivery failed: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Delivery timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

/// Destination for alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), DeliveryError>;
}

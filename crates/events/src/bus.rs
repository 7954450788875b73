//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans [`FleetEvent`]s out to any number of subscribers. It is
//! shared via `Arc<EventBus>` between the orchestrator and its observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thermaguard_core::types::DeviceId;
use tokio::sync::broadcast;

/// Event names published by the orchestrator.
pub mod kinds {
    pub const CONTROL_APPLIED: &str = "control.applied";
    pub const MAINTENANCE_URGENT: &str = "maintenance.urgent";
    pub const CYCLE_COMPLETED: &str = "cycle.completed";
    pub const CONTROLLER_ROLLBACK: &str = "controller.rollback";
}

// ---------------------------------------------------------------------------
// FleetEvent
// ---------------------------------------------------------------------------

/// Something that happened in the fleet.
///
/// Built with [`FleetEvent::new`] and the builder methods
/// [`for_device`](FleetEvent::for_device) and
/// [`with_payload`](FleetEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetEvent {
    /// Dot-separated event name, e.g. `"control.applied"`.
    pub event_type: String,

    /// Device the event concerns; `None` for fleet-wide events.
    pub device_id: Option<DeviceId>,

    /// Event-specific data.
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl FleetEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            device_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn for_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

const DEFAULT_CAPACITY: usize = 1024;

pub struct EventBus {
    sender: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// Slow receivers that fall more than `capacity` events behind observe
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped when nobody listens.
    pub fn publish(&self, event: FleetEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_device_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(
            FleetEvent::new(kinds::CONTROL_APPLIED)
                .for_device(3)
                .with_payload(serde_json::json!({"actions": 2})),
        );

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, "control.applied");
        assert_eq!(received.device_id, Some(3));
        assert_eq!(received.payload["actions"], 2);
    }

    #[tokio::test]
    async fn every_subscriber_sees_the_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(FleetEvent::new(kinds::CYCLE_COMPLETED));

        assert_eq!(rx1.recv().await.unwrap().event_type, "cycle.completed");
        assert_eq!(rx2.recv().await.unwrap().event_type, "cycle.completed");
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::default();
        bus.publish(FleetEvent::new(kinds::CONTROLLER_ROLLBACK));
    }

    #[test]
    fn fleet_event_defaults() {
        let event = FleetEvent::new(kinds::MAINTENANCE_URGENT);
        assert!(event.device_id.is_none());
        assert!(event.payload.is_object());
    }
}

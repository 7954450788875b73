//! Event bus and alert delivery for the fleet engine.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`FleetEvent`]: the event envelope published by the orchestrator.
//! - [`delivery`]: the [`AlertSink`] seam plus log and webhook sinks.
//! - [`AlertDispatcher`]: fire-and-forget delivery with cooldown and a
//!   per-delivery timeout.

pub mod bus;
pub mod delivery;
pub mod dispatcher;

pub use bus::{EventBus, FleetEvent};
pub use delivery::log::LogSink;
pub use delivery::webhook::WebhookDelivery;
pub use delivery::{AlertSink, DeliveryError};
pub use dispatcher::AlertDispatcher;

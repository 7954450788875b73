//! Domain logic for the fleet thermal and health engine.
//!
//! Everything here is synchronous or runtime-agnostic apart from the
//! controller's stability test, which is awaited under a timeout.

pub mod alert;
pub mod control;
pub mod device;
pub mod efficiency;
pub mod error;
pub mod health;
pub mod maintenance;
pub mod prediction;
pub mod stats;
pub mod telemetry;
pub mod types;

pub use error::CoreError;
pub use types::{DeviceId, Timestamp};

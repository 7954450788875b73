//! Collaborator seams consumed by the orchestrator.
//!
//! The device registry and telemetry source are external systems; the
//! orchestrator only sees these traits. [`StaticRegistry`] serves a fixed
//! device list for single-host deployments and tests.

use async_trait::async_trait;
use thermaguard_core::device::Device;
use thermaguard_core::telemetry::TelemetrySample;

pub use thermaguard_core::efficiency::{EfficiencyTable, StaticEfficiencyTable};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Device registry unavailable: {0}")]
    Unavailable(String),
}

/// Source of the monitored device list.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<Device>, RegistryError>;
}

/// Source of the latest telemetry reading per device.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// `None` when the device cannot be read right now.
    async fn latest(&self, device: &Device) -> Option<TelemetrySample>;
}

// ---------------------------------------------------------------------------
// StaticRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    devices: Vec<Device>,
}

impl StaticRegistry {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl DeviceRegistry for StaticRegistry {
    async fn list_devices(&self) -> Result<Vec<Device>, RegistryError> {
        Ok(self.devices.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_registry_returns_its_devices() {
        let registry = StaticRegistry::new(vec![Device::new(1, "gpu"), Device::new(2, "asic")]);
        let devices = registry.list_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].device_type, "asic");
    }

    #[test]
    fn registry_error_display() {
        let err = RegistryError::Unavailable("connection refused".into());
        assert_eq!(err.to_string(), "Device registry unavailable: connection refused");
    }
}

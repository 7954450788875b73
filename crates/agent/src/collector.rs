//! NVML-backed device registry and telemetry source.
//!
//! [`NvmlCollector`] wraps the NVIDIA Management Library. Each visible GPU
//! becomes a [`Device`] whose id is its NVML index; each reading becomes a
//! [`TelemetrySample`] with utilization percent as throughput and power draw
//! in watts.
//!
//! NVML initialisation is optional: without drivers (e.g. a developer
//! laptop) the collector logs a warning and reports zero devices.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use nvml_wrapper::enum_wrappers::device::{TemperatureSensor, TemperatureThreshold};
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;
use thermaguard_core::device::Device;
use thermaguard_core::telemetry::TelemetrySample;

use crate::registry::{DeviceRegistry, RegistryError, TelemetrySource};

/// Device type tag given to every NVML device.
pub const NVML_DEVICE_TYPE: &str = "nvidia-gpu";

/// Degrees below the driver's slowdown threshold used as the safe limit.
const SLOWDOWN_MARGIN: f64 = 5.0;

pub struct NvmlCollector {
    /// `None` when NVML could not be initialised.
    nvml: Option<Nvml>,
    default_max_safe_temp: f64,
}

impl NvmlCollector {
    pub fn new(default_max_safe_temp: f64) -> Self {
        let nvml = match Nvml::init() {
            Ok(nvml) => {
                tracing::info!("NVML initialised successfully");
                Some(nvml)
            }
            Err(e) => {
                tracing::warn!(error = %e, "NVML unavailable, no GPU telemetry will be collected");
                None
            }
        };
        Self {
            nvml,
            default_max_safe_temp,
        }
    }

    pub fn device_count(&self) -> u32 {
        self.nvml
            .as_ref()
            .and_then(|nvml| nvml.device_count().ok())
            .unwrap_or(0)
    }

    fn describe(&self, nvml: &Nvml, idx: u32) -> Result<Device, NvmlError> {
        let device = nvml.device_by_index(idx)?;
        // Prefer the driver's slowdown threshold when it is exposed.
        let max_safe_temp = device
            .temperature_threshold(TemperatureThreshold::Slowdown)
            .map(|t| f64::from(t) - SLOWDOWN_MARGIN)
            .unwrap_or(self.default_max_safe_temp);
        let target_max = (max_safe_temp - 8.0).max(40.0);
        Ok(Device::new(i64::from(idx), NVML_DEVICE_TYPE)
            .with_max_safe_temp(max_safe_temp)
            .with_target_range((target_max - 15.0).max(30.0), target_max))
    }

    fn read(&self, nvml: &Nvml, idx: u32) -> Result<TelemetrySample, NvmlError> {
        let device = nvml.device_by_index(idx)?;
        let temperature = device.temperature(TemperatureSensor::Gpu)?;
        let utilization = device.utilization_rates()?;
        // Power draw is in milliwatts. Not every board reports it.
        let power = device
            .power_usage()
            .map(|mw| f64::from(mw) / 1000.0)
            .unwrap_or(0.0);
        Ok(TelemetrySample::new(
            Utc::now(),
            f64::from(temperature),
            f64::from(utilization.gpu),
            power,
        ))
    }
}

/// Registry view over a shared collector.
pub struct NvmlRegistry(pub Arc<NvmlCollector>);

/// Telemetry view over a shared collector.
pub struct NvmlTelemetrySource(pub Arc<NvmlCollector>);

#[async_trait]
impl DeviceRegistry for NvmlRegistry {
    async fn list_devices(&self) -> Result<Vec<Device>, RegistryError> {
        let collector = &self.0;
        let Some(nvml) = collector.nvml.as_ref() else {
            return Ok(Vec::new());
        };
        let count = nvml
            .device_count()
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        let mut devices = Vec::with_capacity(count as usize);
        for idx in 0..count {
            match collector.describe(nvml, idx) {
                Ok(device) => devices.push(device),
                Err(e) => {
                    tracing::warn!(gpu_index = idx, error = %e, "Skipping GPU, device query failed");
                }
            }
        }
        Ok(devices)
    }
}

#[async_trait]
impl TelemetrySource for NvmlTelemetrySource {
    async fn latest(&self, device: &Device) -> Option<TelemetrySample> {
        let collector = &self.0;
        let nvml = collector.nvml.as_ref()?;
        let idx = u32::try_from(device.id).ok()?;
        match collector.read(nvml, idx) {
            Ok(sample) => Some(sample),
            Err(e) => {
                tracing::debug!(device_id = device.id, error = %e, "GPU telemetry read failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// On hosts without NVIDIA drivers the collector degrades to an empty
    /// fleet; on hosts with drivers it must still not panic.
    #[tokio::test]
    async fn collector_without_drivers_reports_empty_fleet() {
        let collector = Arc::new(NvmlCollector::new(83.0));
        let devices = NvmlRegistry(Arc::clone(&collector))
            .list_devices()
            .await
            .unwrap_or_default();
        assert!(devices.len() <= collector.device_count() as usize);
        for device in &devices {
            assert_eq!(device.device_type, NVML_DEVICE_TYPE);
        }
    }

    #[tokio::test]
    async fn negative_ids_are_unreadable() {
        let collector = Arc::new(NvmlCollector::new(83.0));
        let source = NvmlTelemetrySource(collector);
        assert!(source.latest(&Device::new(-1, NVML_DEVICE_TYPE)).await.is_none());
    }
}

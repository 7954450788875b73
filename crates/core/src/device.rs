//! Monitored device identity and static thermal envelope.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DeviceId;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default maximum safe temperature in °C when the registry does not supply one.
pub const DEFAULT_MAX_SAFE_TEMP: f64 = 83.0;

/// Default lower bound of the target temperature band (°C).
pub const DEFAULT_TARGET_TEMP_MIN: f64 = 60.0;

/// Default upper bound of the target temperature band (°C).
pub const DEFAULT_TARGET_TEMP_MAX: f64 = 75.0;

/// Default minimum fan speed (percent).
pub const DEFAULT_FAN_MIN: f64 = 30.0;

/// Default maximum fan speed (percent).
pub const DEFAULT_FAN_MAX: f64 = 100.0;

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// A monitored accelerator as described by the device registry.
///
/// Immutable for the duration of a fleet cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// Type tag used to look up the expected efficiency baseline.
    pub device_type: String,
    pub max_safe_temp: f64,
    pub target_temp_min: f64,
    pub target_temp_max: f64,
    pub fan_min: f64,
    pub fan_max: f64,
}

impl Device {
    /// Build a device with the default thermal envelope.
    pub fn new(id: DeviceId, device_type: impl Into<String>) -> Self {
        Self {
            id,
            device_type: device_type.into(),
            max_safe_temp: DEFAULT_MAX_SAFE_TEMP,
            target_temp_min: DEFAULT_TARGET_TEMP_MIN,
            target_temp_max: DEFAULT_TARGET_TEMP_MAX,
            fan_min: DEFAULT_FAN_MIN,
            fan_max: DEFAULT_FAN_MAX,
        }
    }

    pub fn with_max_safe_temp(mut self, max_safe_temp: f64) -> Self {
        self.max_safe_temp = max_safe_temp;
        self
    }

    pub fn with_target_range(mut self, min: f64, max: f64) -> Self {
        self.target_temp_min = min;
        self.target_temp_max = max;
        self
    }

    pub fn with_fan_bounds(mut self, min: f64, max: f64) -> Self {
        self.fan_min = min;
        self.fan_max = max;
        self
    }

    /// Check that the envelope is internally consistent.
    ///
    /// Rules:
    /// - Target band must be ordered and sit below the max safe temperature.
    /// - Fan bounds must be ordered and within `0..=100`.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.target_temp_min > self.target_temp_max {
            return Err(CoreError::Validation(format!(
                "Device {}: target_temp_min ({}) exceeds target_temp_max ({})",
                self.id, self.target_temp_min, self.target_temp_max
            )));
        }
        if self.target_temp_max > self.max_safe_temp {
            return Err(CoreError::Validation(format!(
                "Device {}: target_temp_max ({}) exceeds max_safe_temp ({})",
                self.id, self.target_temp_max, self.max_safe_temp
            )));
        }
        if self.fan_min < 0.0 || self.fan_max > 100.0 || self.fan_min > self.fan_max {
            return Err(CoreError::Validation(format!(
                "Device {}: fan bounds must satisfy 0 <= min ({}) <= max ({}) <= 100",
                self.id, self.fan_min, self.fan_max
            )));
        }
        Ok(())
    }
}

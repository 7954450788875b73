//! Linear fan curve over the device's extended target band.

use crate::device::Device;

/// Target fan speed for `temperature`.
///
/// Below `target_temp_min - margin` the fan sits at `fan_min`, above
/// `target_temp_max + margin` at `fan_max`, and in between it is interpolated
/// linearly.
pub fn target_fan_speed(device: &Device, temperature: f64, margin: f64) -> f64 {
    let low = device.target_temp_min - margin;
    let high = device.target_temp_max + margin;
    if temperature < low {
        return device.fan_min;
    }
    if temperature > high || high <= low {
        return device.fan_max;
    }
    let ratio = (temperature - low) / (high - low);
    device.fan_min + ratio * (device.fan_max - device.fan_min)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        // Extended band 55..80, fan 30..100.
        Device::new(1, "gpu")
            .with_target_range(60.0, 75.0)
            .with_fan_bounds(30.0, 100.0)
    }

    #[test]
    fn cold_device_runs_minimum_fan() {
        assert_eq!(target_fan_speed(&device(), 40.0, 5.0), 30.0);
    }

    #[test]
    fn hot_device_runs_maximum_fan() {
        assert_eq!(target_fan_speed(&device(), 81.0, 5.0), 100.0);
    }

    #[test]
    fn interpolates_inside_band() {
        // Midpoint of 55..80 is 67.5 -> midpoint of 30..100 is 65.
        assert!((target_fan_speed(&device(), 67.5, 5.0) - 65.0).abs() < 1e-9);
        assert_eq!(target_fan_speed(&device(), 55.0, 5.0), 30.0);
        assert_eq!(target_fan_speed(&device(), 80.0, 5.0), 100.0);
    }
}

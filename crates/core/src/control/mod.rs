//! Thermal/performance controller.
//!
//! One [`DeviceController`] per device owns that device's overclock, fan and
//! voltage state and is the only thing that mutates them. Each call to
//! [`DeviceController::step`] consumes one telemetry sample and runs, in
//! order:
//!
//! 1. emergency throttle when the device is over its safe limit, otherwise
//! 2. a stability-gated performance-offset increase when there is headroom,
//! 3. the fan curve (skipped in a throttle cycle),
//! 4. undervolting.
//!
//! A step never leaves the controller in `Testing` or `Throttled`; both are
//! transient within a single step.

pub mod fan;
pub mod stability;
pub mod state;

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::alert::{Alert, AlertSeverity};
use crate::device::Device;
use crate::telemetry::TelemetrySample;
use crate::types::DeviceId;

pub use stability::{is_thermally_stable, StabilityTester, StabilityVerdict};
pub use state::{FanState, OverclockAdjustment, OverclockState, VoltageState};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Tunables for the control loop. Defaults encode policy, not physics.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub overclock_enabled: bool,
    pub undervolt_enabled: bool,

    /// Degrees below the safe limit required before tuning is attempted.
    pub overclock_headroom: f64,
    /// Performance units offered per degree of headroom.
    pub increment_per_degree: f64,
    pub max_increment: f64,
    pub min_step: f64,
    pub max_offset: f64,
    /// Fraction of a failed increment retried once.
    pub retry_factor: f64,
    pub stability_timeout: Duration,
    pub stability_lookback: usize,
    pub stability_max_variance: f64,
    pub stability_max_deviation: f64,
    /// Cycles spent in `Stable` after a successful increase.
    pub settle_cycles: u32,

    /// Overshoot (°C) above which a throttle is critical and triggers the
    /// emergency pass.
    pub emergency_overshoot: f64,
    /// Overshoot (°C) above which a throttle is a warning.
    pub warning_overshoot: f64,

    /// Margin (°C) added around the target band for the fan curve.
    pub fan_band_margin: f64,
    /// Minimum change (percentage points) before the fan is moved.
    pub fan_hysteresis: f64,
    /// Fan speed restored on rollback.
    pub default_fan_percent: f64,

    /// Degrees below the safe limit required before undervolting.
    pub undervolt_headroom: f64,
    pub max_undervolt_mv: f64,
    /// Headroom (°C beyond `undervolt_headroom`) over which the undervolt
    /// ramps from zero to `max_undervolt_mv`.
    pub undervolt_span: f64,
    /// Minimum change (mV) before the voltage offset is moved.
    pub voltage_hysteresis_mv: f64,
    pub watts_per_mv: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            overclock_enabled: true,
            undervolt_enabled: true,

            overclock_headroom: 10.0,
            increment_per_degree: 10.0,
            max_increment: 200.0,
            min_step: 25.0,
            max_offset: 1_000.0,
            retry_factor: 0.7,
            stability_timeout: Duration::from_secs(120),
            stability_lookback: 12,
            stability_max_variance: 25.0,
            stability_max_deviation: 15.0,
            settle_cycles: 1,

            emergency_overshoot: 10.0,
            warning_overshoot: 5.0,

            fan_band_margin: 5.0,
            fan_hysteresis: 10.0,
            default_fan_percent: 50.0,

            undervolt_headroom: 5.0,
            max_undervolt_mv: 50.0,
            undervolt_span: 20.0,
            voltage_hysteresis_mv: 25.0,
            watts_per_mv: 0.2,
        }
    }
}

// ---------------------------------------------------------------------------
// State, actions, outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlState {
    Idle,
    /// Attempting a performance-offset increase.
    Testing,
    /// Emergency response to an over-temperature sample.
    Throttled,
    /// Recently adjusted; cooling off before the next attempt.
    Stable,
}

/// A change the controller actually applied during a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlAction {
    Throttle {
        severity: AlertSeverity,
        overshoot: f64,
        previous_offset: f64,
    },
    EmergencyCooling {
        fan_percent: f64,
    },
    OverclockIncrease {
        delta: f64,
        new_offset: f64,
        retried: bool,
    },
    FanAdjust {
        from: f64,
        to: f64,
    },
    VoltageAdjust {
        from_mv: f64,
        to_mv: f64,
        estimated_saving_watts: f64,
    },
}

impl ControlAction {
    /// Human-readable line for recommendation lists and logs.
    pub fn describe(&self) -> String {
        match self {
            ControlAction::Throttle {
                severity,
                overshoot,
                previous_offset,
            } => format!(
                "[{}] Thermal throttle: {overshoot:.1}°C over limit, performance offset {previous_offset:.0} reset to 0, fans at 100%",
                severity.as_str().to_uppercase()
            ),
            ControlAction::EmergencyCooling { fan_percent } => {
                format!("Emergency cooling: fans forced to {fan_percent:.0}%")
            }
            ControlAction::OverclockIncrease {
                delta,
                new_offset,
                retried,
            } => format!(
                "Performance offset +{delta:.0} (now {new_offset:.0}){}",
                if *retried { " after reduced retry" } else { "" }
            ),
            ControlAction::FanAdjust { from, to } => {
                format!("Fan speed {from:.0}% -> {to:.0}%")
            }
            ControlAction::VoltageAdjust {
                from_mv,
                to_mv,
                estimated_saving_watts,
            } => format!(
                "Voltage offset {from_mv:.0}mV -> {to_mv:.0}mV (est. {estimated_saving_watts:.1}W saved)"
            ),
        }
    }
}

/// One stability test the controller ran.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StabilityAttempt {
    pub increment: f64,
    pub candidate_offset: f64,
    pub verdict: StabilityVerdict,
}

/// Everything a single step decided.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControlOutcome {
    /// The decision state entered during the step, if any.
    pub entered: Option<ControlState>,
    pub actions: Vec<ControlAction>,
    pub alerts: Vec<Alert>,
    pub attempts: Vec<StabilityAttempt>,
    /// The step stopped early because the controller was cancelled.
    pub cancelled: bool,
}

/// Read-only copy of a controller's state.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub device_id: DeviceId,
    pub state: ControlState,
    pub current_offset: f64,
    pub fan_percent: f64,
    pub voltage_offset_mv: f64,
    pub adjustments_recorded: usize,
}

// ---------------------------------------------------------------------------
// DeviceController
// ---------------------------------------------------------------------------

pub struct DeviceController {
    device: Device,
    config: ControlConfig,
    state: ControlState,
    settle_remaining: u32,
    overclock: OverclockState,
    fan: FanState,
    voltage: VoltageState,
}

impl DeviceController {
    pub fn new(device: Device, config: ControlConfig) -> Self {
        let fan = FanState {
            current_percent: config.default_fan_percent,
        };
        Self {
            device,
            config,
            state: ControlState::Idle,
            settle_remaining: 0,
            overclock: OverclockState::default(),
            fan,
            voltage: VoltageState::default(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Replace the static envelope when the registry reports new values.
    pub fn update_device(&mut self, device: Device) {
        self.device = device;
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn overclock(&self) -> &OverclockState {
        &self.overclock
    }

    pub fn fan(&self) -> FanState {
        self.fan
    }

    pub fn voltage(&self) -> VoltageState {
        self.voltage
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            device_id: self.device.id,
            state: self.state,
            current_offset: self.overclock.current_offset(),
            fan_percent: self.fan.current_percent,
            voltage_offset_mv: self.voltage.current_offset_mv,
            adjustments_recorded: self.overclock.history_len(),
        }
    }

    /// Run one control cycle for `sample`. `recent` is the device's recent
    /// history (oldest first) used for the stability gate.
    ///
    /// Nothing is actuated once `cancel` has fired; the outcome comes back
    /// with `cancelled` set.
    pub async fn step(
        &mut self,
        sample: &TelemetrySample,
        recent: &[TelemetrySample],
        tester: &dyn StabilityTester,
        cancel: &CancellationToken,
    ) -> ControlOutcome {
        let mut outcome = ControlOutcome::default();
        if cancel.is_cancelled() {
            tracing::debug!(device_id = self.device.id, "Control step skipped, shutting down");
            outcome.cancelled = true;
            return outcome;
        }
        let temperature = sample.temperature;
        let max_safe = self.device.max_safe_temp;

        let throttled = temperature > max_safe;
        if throttled {
            self.throttle(temperature, &mut outcome);
        } else if self.state == ControlState::Stable && self.settle_remaining > 0 {
            self.settle_remaining -= 1;
            outcome.entered = Some(ControlState::Stable);
            tracing::debug!(
                device_id = self.device.id,
                settle_remaining = self.settle_remaining,
                "Cooling off after tuning step"
            );
        } else {
            self.state = ControlState::Idle;
            if self.config.overclock_enabled
                && temperature < max_safe - self.config.overclock_headroom
                && is_thermally_stable(
                    recent,
                    self.config.stability_lookback,
                    self.config.stability_max_variance,
                    self.config.stability_max_deviation,
                )
            {
                self.try_increase(temperature, tester, cancel, &mut outcome)
                    .await;
            }
        }

        if outcome.cancelled || cancel.is_cancelled() {
            outcome.cancelled = true;
            return outcome;
        }

        if !throttled {
            self.apply_fan_curve(temperature, &mut outcome);
        }
        self.apply_undervolt(temperature, &mut outcome);

        if self.state == ControlState::Stable && self.settle_remaining == 0 {
            // Next step re-evaluates from Idle.
            self.state = ControlState::Idle;
        }
        outcome
    }

    /// Reset offset, fan and voltage to safe defaults.
    pub fn rollback(&mut self) {
        let previous = self.overclock.reset("rollback");
        self.fan.current_percent = self.config.default_fan_percent;
        self.voltage.current_offset_mv = 0.0;
        self.state = ControlState::Idle;
        self.settle_remaining = 0;
        tracing::info!(
            device_id = self.device.id,
            previous_offset = previous,
            fan_percent = self.fan.current_percent,
            "Controller rolled back"
        );
    }

    // ---- private helpers ----

    fn throttle(&mut self, temperature: f64, outcome: &mut ControlOutcome) {
        self.state = ControlState::Throttled;
        outcome.entered = Some(ControlState::Throttled);

        let overshoot = temperature - self.device.max_safe_temp;
        let severity = if overshoot > self.config.emergency_overshoot {
            AlertSeverity::Critical
        } else if overshoot > self.config.warning_overshoot {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Minor
        };

        self.fan.current_percent = 100.0;
        let previous_offset = self.overclock.reset("thermal throttle");
        let throttle = ControlAction::Throttle {
            severity,
            overshoot,
            previous_offset,
        };
        tracing::warn!(
            device_id = self.device.id,
            temperature,
            overshoot,
            severity = severity.as_str(),
            "Thermal throttle applied"
        );

        outcome.alerts.push(Alert::new(
            self.device.id,
            "Thermal throttle",
            format!(
                "[{}] Device {} at {temperature:.1}°C ({overshoot:.1}°C over {:.1}°C); performance offset reset, fans at 100%",
                severity.as_str().to_uppercase(),
                self.device.id,
                self.device.max_safe_temp,
            ),
            severity,
        ));
        outcome.actions.push(throttle);

        if overshoot > self.config.emergency_overshoot {
            self.fan.current_percent = 100.0;
            self.overclock.clear_history();
            outcome.actions.push(ControlAction::EmergencyCooling { fan_percent: 100.0 });
            tracing::error!(
                device_id = self.device.id,
                overshoot,
                "Emergency cooling engaged"
            );
        }

        self.settle_remaining = 0;
        self.state = ControlState::Idle;
    }

    async fn try_increase(
        &mut self,
        temperature: f64,
        tester: &dyn StabilityTester,
        cancel: &CancellationToken,
        outcome: &mut ControlOutcome,
    ) {
        let headroom = self.device.max_safe_temp - temperature;
        let room_left = (self.config.max_offset - self.overclock.current_offset()).max(0.0);
        let increment = (headroom * self.config.increment_per_degree)
            .min(self.config.max_increment)
            .min(room_left);
        if increment < self.config.min_step {
            return;
        }

        self.state = ControlState::Testing;
        outcome.entered = Some(ControlState::Testing);

        let mut candidate = increment;
        let mut retried = false;
        loop {
            let candidate_offset = self.overclock.current_offset() + candidate;
            let verdict = self.run_stability_test(tester, candidate_offset, cancel).await;
            outcome.attempts.push(StabilityAttempt {
                increment: candidate,
                candidate_offset,
                verdict,
            });
            tracing::debug!(
                device_id = self.device.id,
                increment = candidate,
                ?verdict,
                "Stability test finished"
            );

            match verdict {
                StabilityVerdict::Passed => {
                    self.overclock.apply(candidate, "stability-tested increase");
                    let action = ControlAction::OverclockIncrease {
                        delta: candidate,
                        new_offset: self.overclock.current_offset(),
                        retried,
                    };
                    tracing::info!(
                        device_id = self.device.id,
                        delta = candidate,
                        new_offset = self.overclock.current_offset(),
                        "Performance offset increased"
                    );
                    outcome.alerts.push(Alert::new(
                        self.device.id,
                        "Performance offset increased",
                        action.describe(),
                        AlertSeverity::Info,
                    ));
                    outcome.actions.push(action);
                    self.state = ControlState::Stable;
                    self.settle_remaining = self.config.settle_cycles;
                    return;
                }
                StabilityVerdict::Cancelled => {
                    outcome.cancelled = true;
                    self.state = ControlState::Idle;
                    return;
                }
                StabilityVerdict::Failed | StabilityVerdict::TimedOut => {
                    let reduced = candidate * self.config.retry_factor;
                    if retried || reduced < self.config.min_step {
                        tracing::info!(
                            device_id = self.device.id,
                            "Stability test failed; offset unchanged"
                        );
                        self.state = ControlState::Idle;
                        return;
                    }
                    candidate = reduced;
                    retried = true;
                }
            }
        }
    }

    async fn run_stability_test(
        &self,
        tester: &dyn StabilityTester,
        candidate_offset: f64,
        cancel: &CancellationToken,
    ) -> StabilityVerdict {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => StabilityVerdict::Cancelled,
            result = tokio::time::timeout(
                self.config.stability_timeout,
                tester.run(&self.device, candidate_offset),
            ) => match result {
                Ok(true) => StabilityVerdict::Passed,
                Ok(false) => StabilityVerdict::Failed,
                Err(_) => StabilityVerdict::TimedOut,
            },
        }
    }

    fn apply_fan_curve(&mut self, temperature: f64, outcome: &mut ControlOutcome) {
        let target = fan::target_fan_speed(&self.device, temperature, self.config.fan_band_margin);
        let from = self.fan.current_percent;
        if (target - from).abs() < self.config.fan_hysteresis {
            return;
        }
        self.fan.current_percent = target;
        tracing::info!(device_id = self.device.id, from, to = target, "Fan speed adjusted");
        outcome.actions.push(ControlAction::FanAdjust { from, to: target });
    }

    fn apply_undervolt(&mut self, temperature: f64, outcome: &mut ControlOutcome) {
        let headroom = self.device.max_safe_temp - temperature;
        if !self.config.undervolt_enabled || headroom <= self.config.undervolt_headroom {
            return;
        }
        let ramp = ((headroom - self.config.undervolt_headroom) / self.config.undervolt_span)
            .clamp(0.0, 1.0);
        let target = -self.config.max_undervolt_mv * ramp;
        let from = self.voltage.current_offset_mv;
        let delta = target - from;
        if delta.abs() <= self.config.voltage_hysteresis_mv {
            return;
        }
        self.voltage.current_offset_mv = target;
        let estimated_saving_watts = delta.abs() * self.config.watts_per_mv;
        tracing::info!(
            device_id = self.device.id,
            from_mv = from,
            to_mv = target,
            estimated_saving_watts,
            "Voltage offset adjusted"
        );
        outcome.actions.push(ControlAction::VoltageAdjust {
            from_mv: from,
            to_mv: target,
            estimated_saving_watts,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

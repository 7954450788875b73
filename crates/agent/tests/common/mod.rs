//! Scripted collaborators shared by the orchestrator integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thermaguard_agent::orchestrator::Collaborators;
use thermaguard_agent::registry::StaticEfficiencyTable;
use thermaguard_agent::{AgentConfig, DeviceRegistry, FleetOrchestrator, RegistryError, TelemetrySource};
use thermaguard_core::alert::Alert;
use thermaguard_core::control::StabilityTester;
use thermaguard_core::device::Device;
use thermaguard_core::telemetry::TelemetrySample;
use thermaguard_core::types::DeviceId;
use thermaguard_events::{AlertSink, DeliveryError};
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeRegistry {
    devices: Mutex<Vec<Device>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeRegistry {
    pub fn new(devices: Vec<Device>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_devices(&self, devices: Vec<Device>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `list_devices` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceRegistry for FakeRegistry {
    async fn list_devices(&self) -> Result<Vec<Device>, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("registry offline".into()));
        }
        Ok(self.devices.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Telemetry source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum Reading {
    Sample {
        temperature: f64,
        throughput: f64,
        power: f64,
    },
    Missing,
    Panic,
    /// The read never completes.
    Stall,
}

#[derive(Default)]
pub struct ScriptedSource {
    readings: Mutex<HashMap<DeviceId, Reading>>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, device_id: DeviceId, reading: Reading) {
        self.readings.lock().unwrap().insert(device_id, reading);
    }

    pub fn set_temp(&self, device_id: DeviceId, temperature: f64) {
        self.set(
            device_id,
            Reading::Sample {
                temperature,
                throughput: 100.0,
                power: 300.0,
            },
        );
    }
}

#[async_trait]
impl TelemetrySource for ScriptedSource {
    async fn latest(&self, device: &Device) -> Option<TelemetrySample> {
        let reading = self
            .readings
            .lock()
            .unwrap()
            .get(&device.id)
            .copied()
            .unwrap_or(Reading::Missing);
        match reading {
            Reading::Sample {
                temperature,
                throughput,
                power,
            } => Some(TelemetrySample::new(Utc::now(), temperature, throughput, power)),
            Reading::Missing => None,
            Reading::Panic => panic!("sensor bus fault on device {}", device.id),
            Reading::Stall => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Stability tester
// ---------------------------------------------------------------------------

pub struct FixedTester(pub bool);

#[async_trait]
impl StabilityTester for FixedTester {
    async fn run(&self, _device: &Device, _candidate_offset: f64) -> bool {
        self.0
    }
}

/// Signals `started` on every run, then never finishes.
#[derive(Default)]
pub struct StallingTester {
    pub started: Notify,
}

#[async_trait]
impl StabilityTester for StallingTester {
    async fn run(&self, _device: &Device, _candidate_offset: f64) -> bool {
        self.started.notify_one();
        std::future::pending().await
    }
}

// ---------------------------------------------------------------------------
// Alert sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    /// Poll until at least `n` alerts arrived or two seconds passed.
    pub async fn wait_for(&self, n: usize) -> Vec<Alert> {
        for _ in 0..200 {
            if self.alerts.lock().unwrap().len() >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.alerts()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn send(&self, alert: &Alert) -> Result<(), DeliveryError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub orchestrator: Arc<FleetOrchestrator>,
    pub registry: Arc<FakeRegistry>,
    pub source: Arc<ScriptedSource>,
    pub sink: Arc<RecordingSink>,
}

pub fn test_config() -> AgentConfig {
    AgentConfig {
        cycle_interval: Duration::from_secs(3600),
        shutdown_timeout: Duration::from_secs(5),
        alert_timeout: Duration::from_secs(1),
        ..AgentConfig::default()
    }
}

pub fn harness(devices: Vec<Device>, tester_passes: bool) -> Harness {
    harness_with(devices, tester_passes, test_config())
}

pub fn harness_with(devices: Vec<Device>, tester_passes: bool, config: AgentConfig) -> Harness {
    harness_with_tester(devices, Arc::new(FixedTester(tester_passes)), config)
}

pub fn harness_with_tester(
    devices: Vec<Device>,
    tester: Arc<dyn StabilityTester>,
    config: AgentConfig,
) -> Harness {
    let registry = FakeRegistry::new(devices);
    let source = ScriptedSource::new();
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = Arc::new(FleetOrchestrator::new(
        config,
        Collaborators {
            registry: registry.clone(),
            source: source.clone(),
            efficiency: Arc::new(StaticEfficiencyTable::new().with_entry("gpu", 0.4)),
            tester,
            sink: sink.clone(),
        },
    ));
    Harness {
        orchestrator,
        registry,
        source,
        sink,
    }
}

pub fn gpu(id: DeviceId, max_safe_temp: f64) -> Device {
    Device::new(id, "gpu")
        .with_max_safe_temp(max_safe_temp)
        .with_target_range(60.0, 75.0)
}

/// `values.len()` samples one hour apart ending one hour before `end`.
pub fn hourly_series(
    end: DateTime<Utc>,
    values: &[(f64, f64, f64)],
) -> Vec<TelemetrySample> {
    let n = values.len() as i64;
    values
        .iter()
        .enumerate()
        .map(|(i, (temp, throughput, power))| {
            let ts = end - chrono::Duration::hours(n - i as i64);
            TelemetrySample::new(ts, *temp, *throughput, *power)
        })
        .collect()
}

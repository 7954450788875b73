//! Fleet orchestrator.
//!
//! Owns the telemetry store, one [`DeviceController`] per device and the
//! background loop that runs a fleet cycle every `cycle_interval`:
//!
//! 1. list devices from the registry (failure aborts the cycle),
//! 2. fan out one task per device, bounded by a semaphore,
//! 3. per device: read telemetry (bounded by `telemetry_timeout`), ingest,
//!    analyze (+control), predict, schedule, alert.
//!
//! A failing, panicking or stalled device task is logged and never affects
//! the other devices. [`FleetOrchestrator::stop`] rolls every controller back
//! to safe defaults.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thermaguard_core::alert::{Alert, AlertSeverity};
use thermaguard_core::control::{ControlOutcome, ControllerSnapshot, DeviceController, StabilityTester};
use thermaguard_core::device::Device;
use thermaguard_core::efficiency::EfficiencyTable;
use thermaguard_core::health::{HealthAnalyzer, HealthAssessment, HealthPolicy};
use thermaguard_core::maintenance::{MaintenanceSchedule, MaintenanceScheduler};
use thermaguard_core::prediction::{FailurePrediction, FailurePredictor, PredictionReport, RiskLevel, RiskPolicy};
use thermaguard_core::telemetry::TelemetrySample;
use thermaguard_core::types::{DeviceId, Timestamp};
use thermaguard_core::CoreError;
use thermaguard_events::bus::kinds;
use thermaguard_events::{AlertDispatcher, AlertSink, EventBus, FleetEvent};
use tokio::sync::{broadcast, Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::registry::{DeviceRegistry, RegistryError, TelemetrySource};
use crate::store::TelemetryStore;

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("No telemetry recorded for device {0}")]
    NoTelemetry(DeviceId),

    #[error("Orchestrator is already running")]
    AlreadyRunning,

    #[error("Device task failed: {0}")]
    Task(String),
}

/// Fleet-wide summary.
#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub devices_monitored: usize,
    pub total_samples: usize,
    /// Sum of every controller's current performance offset.
    pub active_overclock_total: f64,
    pub last_cycle_at: Option<Timestamp>,
    pub running: bool,
}

/// What one device's cycle step produced.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCycleOutcome {
    pub device_id: DeviceId,
    pub assessment: HealthAssessment,
    pub prediction: PredictionReport,
    pub schedule: MaintenanceSchedule,
}

/// Summary of one fleet cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: Timestamp,
    pub devices: usize,
    /// Devices whose step completed.
    pub processed: Vec<DeviceCycleOutcome>,
    /// Devices with no telemetry available this cycle.
    pub skipped: Vec<DeviceId>,
    /// Devices whose step errored or panicked.
    pub failed: Vec<DeviceId>,
}

impl CycleReport {
    pub fn outcome(&self, device_id: DeviceId) -> Option<&DeviceCycleOutcome> {
        self.processed.iter().find(|o| o.device_id == device_id)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// A device's controller plus its last published offset.
///
/// `offset_bits` is refreshed after every step and rollback so fleet-wide
/// reads never wait behind a step that is mid stability test.
struct ControllerSlot {
    controller: Mutex<DeviceController>,
    offset_bits: AtomicU64,
}

impl ControllerSlot {
    fn new(controller: DeviceController) -> Self {
        let offset = controller.overclock().current_offset();
        Self {
            controller: Mutex::new(controller),
            offset_bits: AtomicU64::new(offset.to_bits()),
        }
    }

    fn publish_offset(&self, controller: &DeviceController) {
        let offset = controller.overclock().current_offset();
        self.offset_bits.store(offset.to_bits(), Ordering::Relaxed);
    }

    fn offset(&self) -> f64 {
        f64::from_bits(self.offset_bits.load(Ordering::Relaxed))
    }

    async fn rollback(&self) -> ControllerSnapshot {
        let mut controller = self.controller.lock().await;
        controller.rollback();
        self.publish_offset(&controller);
        controller.snapshot()
    }
}

type Slot = Arc<ControllerSlot>;

/// Injected external collaborators.
pub struct Collaborators {
    pub registry: Arc<dyn DeviceRegistry>,
    pub source: Arc<dyn TelemetrySource>,
    pub efficiency: Arc<dyn EfficiencyTable>,
    pub tester: Arc<dyn StabilityTester>,
    pub sink: Arc<dyn AlertSink>,
}

#[derive(Default)]
struct Lifecycle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

pub struct FleetOrchestrator {
    config: AgentConfig,
    registry: Arc<dyn DeviceRegistry>,
    source: Arc<dyn TelemetrySource>,
    efficiency: Arc<dyn EfficiencyTable>,
    tester: Arc<dyn StabilityTester>,
    alerts: AlertDispatcher,
    bus: EventBus,
    store: TelemetryStore,
    analyzer: HealthAnalyzer,
    predictor: FailurePredictor,
    scheduler: MaintenanceScheduler,
    devices: RwLock<HashMap<DeviceId, Slot>>,
    last_cycle_at: RwLock<Option<Timestamp>>,
    lifecycle: Mutex<Lifecycle>,
}

impl FleetOrchestrator {
    pub fn new(config: AgentConfig, collaborators: Collaborators) -> Self {
        let alerts = AlertDispatcher::new(collaborators.sink).with_timeout(config.alert_timeout);
        let store = TelemetryStore::new(config.history_capacity, config.retention);
        Self {
            registry: collaborators.registry,
            source: collaborators.source,
            efficiency: collaborators.efficiency,
            tester: collaborators.tester,
            alerts,
            bus: EventBus::default(),
            store,
            analyzer: HealthAnalyzer::default(),
            predictor: FailurePredictor::default(),
            scheduler: MaintenanceScheduler::new(),
            devices: RwLock::new(HashMap::new()),
            last_cycle_at: RwLock::new(None),
            lifecycle: Mutex::new(Lifecycle::default()),
            config,
        }
    }

    pub fn with_health_policy(mut self, policy: HealthPolicy) -> Self {
        self.analyzer = HealthAnalyzer::new(policy);
        self
    }

    pub fn with_risk_policy(mut self, policy: RiskPolicy) -> Self {
        self.predictor = FailurePredictor::new(policy);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn store(&self) -> &TelemetryStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.bus.subscribe()
    }

    // ---- lifecycle ----

    /// Spawn the periodic cycle loop. The first cycle runs immediately.
    pub async fn start(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(OrchestratorError::AlreadyRunning);
        }
        if lifecycle.cancel.is_cancelled() {
            lifecycle.cancel = CancellationToken::new();
        }
        let cancel = lifecycle.cancel.clone();
        let this = Arc::clone(self);
        lifecycle.task = Some(tokio::spawn(this.run_loop(cancel)));
        tracing::info!(
            interval_secs = self.config.cycle_interval.as_secs(),
            max_concurrent_devices = self.config.max_concurrent_devices,
            "Fleet orchestrator started"
        );
        Ok(())
    }

    /// Stop the loop and roll every controller back to safe defaults.
    ///
    /// Waits up to `shutdown_timeout` for an in-flight cycle; stability tests
    /// in progress are cancelled and leave their pre-test offset.
    pub async fn stop(&self) {
        let task = {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.cancel.cancel();
            lifecycle.task.take()
        };
        if let Some(mut task) = task {
            match tokio::time::timeout(self.config.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Fleet loop task failed"),
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = self.config.shutdown_timeout.as_secs(),
                        "Fleet loop did not stop in time, aborting"
                    );
                    // Dropping the loop aborts every in-flight device task.
                    task.abort();
                    let _ = task.await;
                }
            }
        }

        let slots: Vec<(DeviceId, Slot)> = self
            .devices
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();
        for (device_id, slot) in slots {
            let snapshot = slot.rollback().await;
            self.bus.publish(
                FleetEvent::new(kinds::CONTROLLER_ROLLBACK)
                    .for_device(device_id)
                    .with_payload(to_payload(&snapshot)),
            );
        }

        {
            // Manual cycles after a stop run against a fresh token; device
            // tasks from the stopped loop keep the cancelled one.
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.task.is_none() {
                lifecycle.cancel = CancellationToken::new();
            }
        }
        tracing::info!("Fleet orchestrator stopped");
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Fleet loop stopping");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = match self.cycle(&cancel).await {
                Ok(_) => self.config.cycle_interval,
                Err(e) => {
                    let backoff = self.config.error_backoff();
                    tracing::error!(
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "Fleet cycle aborted"
                    );
                    backoff
                }
            };
        }
    }

    // ---- cycle ----

    /// Run one full fleet cycle now.
    pub async fn run_cycle(self: &Arc<Self>) -> Result<CycleReport, OrchestratorError> {
        let cancel = self.lifecycle.lock().await.cancel.clone();
        self.cycle(&cancel).await
    }

    async fn cycle(self: &Arc<Self>, cancel: &CancellationToken) -> Result<CycleReport, OrchestratorError> {
        let cycle_id = Uuid::now_v7();
        let span = tracing::info_span!("fleet_cycle", %cycle_id);
        self.cycle_inner(cycle_id, cancel).instrument(span).await
    }

    async fn cycle_inner(
        self: &Arc<Self>,
        cycle_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, OrchestratorError> {
        let started_at = Utc::now();
        let devices = self.registry.list_devices().await?;
        let devices = self.sync_devices(devices).await;
        let expired = self.store.expire_all().await;
        if expired > 0 {
            tracing::debug!(expired, "Expired telemetry past retention");
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_devices.max(1)));
        let mut set = JoinSet::new();
        for device in devices.iter().cloned() {
            let this = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.child_token();
            let device_id = device.id;
            let span = tracing::debug_span!("device_step", device_id);
            set.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                // Nested spawn so a panic is reported against this device. The
                // inner task dies with the outer one.
                let inner = AbortOnDropHandle::new(tokio::spawn(
                    async move { this.process_device(device, &cancel).await }.instrument(span),
                ));
                let result = match inner.await {
                    Ok(result) => result,
                    Err(e) => Err(OrchestratorError::Task(e.to_string())),
                };
                (device_id, result)
            });
        }

        let mut report = CycleReport {
            cycle_id,
            started_at,
            devices: devices.len(),
            processed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        };
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(Some(outcome)))) => report.processed.push(outcome),
                Ok((device_id, Ok(None))) => report.skipped.push(device_id),
                Ok((device_id, Err(e))) => {
                    tracing::error!(device_id, error = %e, "Device cycle step failed");
                    report.failed.push(device_id);
                }
                Err(e) => tracing::error!(error = %e, "Device cycle task lost"),
            }
        }
        report.processed.sort_by_key(|o| o.device_id);
        report.skipped.sort_unstable();
        report.failed.sort_unstable();

        *self.last_cycle_at.write().await = Some(Utc::now());
        tracing::info!(
            devices = report.devices,
            processed = report.processed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Fleet cycle completed"
        );
        self.bus.publish(FleetEvent::new(kinds::CYCLE_COMPLETED).with_payload(serde_json::json!({
            "cycle_id": cycle_id,
            "devices": report.devices,
            "processed": report.processed.len(),
            "skipped": report.skipped,
            "failed": report.failed,
        })));
        Ok(report)
    }

    /// Register new devices and drop the ones the registry no longer lists.
    /// Returns the valid devices for this cycle.
    async fn sync_devices(&self, listed: Vec<Device>) -> Vec<Device> {
        let mut valid = Vec::with_capacity(listed.len());
        for device in listed {
            match device.validate() {
                Ok(()) => valid.push(device),
                Err(e) => tracing::warn!(device_id = device.id, error = %e, "Ignoring invalid device"),
            }
        }

        for device in &valid {
            self.store.register(device.id).await;
        }

        // Existing controllers get their refreshed envelope in process_device.
        let removed: Vec<(DeviceId, Slot)> = {
            let mut slots = self.devices.write().await;
            for device in &valid {
                if !slots.contains_key(&device.id) {
                    tracing::info!(device_id = device.id, device_type = %device.device_type, "Device added to fleet");
                    let controller = DeviceController::new(device.clone(), self.config.control.clone());
                    slots.insert(device.id, Arc::new(ControllerSlot::new(controller)));
                }
            }
            let stale: Vec<DeviceId> = slots
                .keys()
                .filter(|id| !valid.iter().any(|d| d.id == **id))
                .copied()
                .collect();
            stale
                .into_iter()
                .filter_map(|id| slots.remove(&id).map(|slot| (id, slot)))
                .collect()
        };

        for (device_id, slot) in removed {
            slot.rollback().await;
            tracing::info!(device_id, "Device removed from fleet");
        }
        valid
    }

    async fn process_device(
        &self,
        device: Device,
        cancel: &CancellationToken,
    ) -> Result<Option<DeviceCycleOutcome>, OrchestratorError> {
        let slot = self.slot(device.id).await?;

        let Some(sample) = self.read_telemetry(&device, cancel).await else {
            return Ok(None);
        };
        if let Err(e) = self.store.ingest(device.id, sample).await {
            tracing::warn!(device_id = device.id, error = %e, "Telemetry ingest rejected");
            return Ok(None);
        }

        let mut controller = slot.controller.lock().await;
        controller.update_device(device.clone());
        let assessment = self
            .analyze_locked(&device, &slot, &mut controller, &sample, cancel)
            .await?;
        drop(controller);

        let prediction = self.predict_now(device.id).await?;
        let schedule = self.scheduler.schedule(&prediction.predictions);
        self.raise_urgent(&device, &prediction, &schedule).await;

        Ok(Some(DeviceCycleOutcome {
            device_id: device.id,
            assessment,
            prediction,
            schedule,
        }))
    }

    /// Latest reading for `device`, or `None` when it is unavailable, the
    /// read overruns `telemetry_timeout`, or the orchestrator is stopping.
    async fn read_telemetry(&self, device: &Device, cancel: &CancellationToken) -> Option<TelemetrySample> {
        let timeout = self.config.telemetry_timeout;
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            read = tokio::time::timeout(timeout, self.source.latest(device)) => read,
        };
        match read {
            Ok(Some(sample)) => Some(sample),
            Ok(None) => {
                tracing::debug!(device_id = device.id, "No telemetry available, skipping device");
                None
            }
            Err(_) => {
                tracing::warn!(
                    device_id = device.id,
                    timeout_secs = timeout.as_secs(),
                    "Telemetry read timed out, skipping device"
                );
                None
            }
        }
    }

    // ---- analysis operations ----

    /// Feed one sample into a device's history.
    pub async fn ingest(&self, device_id: DeviceId, sample: TelemetrySample) -> Result<(), OrchestratorError> {
        self.store.ingest(device_id, sample).await.map_err(|e| {
            tracing::warn!(device_id, error = %e, "Telemetry ingest rejected");
            OrchestratorError::from(e)
        })
    }

    /// Assess the device's latest sample and run its controller on it.
    pub async fn analyze_now(&self, device_id: DeviceId) -> Result<HealthAssessment, OrchestratorError> {
        let slot = self.slot(device_id).await?;
        let sample = self
            .store
            .latest(device_id)
            .await
            .ok_or(OrchestratorError::NoTelemetry(device_id))?;
        let cancel = self.lifecycle.lock().await.cancel.child_token();
        let mut controller = slot.controller.lock().await;
        let device = controller.device().clone();
        self.analyze_locked(&device, &slot, &mut controller, &sample, &cancel)
            .await
    }

    async fn analyze_locked(
        &self,
        device: &Device,
        slot: &ControllerSlot,
        controller: &mut DeviceController,
        sample: &TelemetrySample,
        cancel: &CancellationToken,
    ) -> Result<HealthAssessment, OrchestratorError> {
        let expected = self.efficiency.expected_for(&device.device_type);
        let mut assessment = self
            .store
            .with_window(device.id, |window| {
                self.analyzer.analyze(device, window, sample, expected)
            })
            .await?;

        let lookback = self.config.control.stability_lookback;
        let recent = self.store.recent(device.id, lookback).await;
        let outcome = controller
            .step(sample, &recent, self.tester.as_ref(), cancel)
            .await;
        slot.publish_offset(controller);
        self.publish_control(device.id, controller, &outcome);
        for alert in outcome.alerts {
            self.alerts.dispatch(alert).await;
        }
        assessment.fold_control_actions(outcome.actions);
        Ok(assessment)
    }

    fn publish_control(&self, device_id: DeviceId, controller: &DeviceController, outcome: &ControlOutcome) {
        if outcome.actions.is_empty() {
            return;
        }
        let described: Vec<String> = outcome.actions.iter().map(|a| a.describe()).collect();
        tracing::info!(device_id, actions = ?described, "Control actions applied");
        self.bus.publish(
            FleetEvent::new(kinds::CONTROL_APPLIED)
                .for_device(device_id)
                .with_payload(serde_json::json!({
                    "actions": outcome.actions,
                    "attempts": outcome.attempts,
                    "controller": controller.snapshot(),
                })),
        );
    }

    /// Failure prediction over the device's recent history.
    pub async fn predict_now(&self, device_id: DeviceId) -> Result<PredictionReport, OrchestratorError> {
        let policy = self.predictor.policy();
        let window = policy.trend_window.max(policy.correlation_window);
        let samples = self
            .store
            .with_window(device_id, |w| w.recent(window))
            .await?;
        let temperatures: Vec<f64> = samples.iter().map(|s| s.temperature).collect();
        let throughputs: Vec<f64> = samples.iter().map(|s| s.throughput).collect();
        let powers: Vec<f64> = samples.iter().map(|s| s.power).collect();
        Ok(self
            .predictor
            .predict(device_id, &temperatures, &throughputs, &powers))
    }

    pub fn schedule_now(&self, predictions: &[FailurePrediction]) -> MaintenanceSchedule {
        self.scheduler.schedule(predictions)
    }

    async fn raise_urgent(&self, device: &Device, prediction: &PredictionReport, schedule: &MaintenanceSchedule) {
        if schedule.urgent.is_empty() {
            return;
        }
        tracing::warn!(
            device_id = device.id,
            urgent = schedule.urgent.len(),
            overall_risk = prediction.overall_risk_level.as_str(),
            "Urgent maintenance required"
        );
        for task in &schedule.urgent {
            let severity = if task.risk_level == RiskLevel::Critical {
                AlertSeverity::Critical
            } else {
                AlertSeverity::Warning
            };
            self.alerts
                .dispatch(Alert::new(
                    device.id,
                    format!("Urgent maintenance: {}", task.component.as_str()),
                    task.action.clone(),
                    severity,
                ))
                .await;
        }
        self.bus.publish(
            FleetEvent::new(kinds::MAINTENANCE_URGENT)
                .for_device(device.id)
                .with_payload(serde_json::json!({
                    "tasks": schedule.urgent,
                    "next_maintenance_due_hours": prediction.next_maintenance_due_hours,
                })),
        );
    }

    // ---- status ----

    pub async fn status(&self) -> FleetStatus {
        let (devices_monitored, active_overclock_total) = {
            let slots = self.devices.read().await;
            (slots.len(), slots.values().map(|slot| slot.offset()).sum::<f64>())
        };
        let running = self
            .lifecycle
            .lock()
            .await
            .task
            .as_ref()
            .is_some_and(|t| !t.is_finished());
        FleetStatus {
            devices_monitored,
            total_samples: self.store.total_samples().await,
            active_overclock_total,
            last_cycle_at: *self.last_cycle_at.read().await,
            running,
        }
    }

    pub async fn controller_snapshot(&self, device_id: DeviceId) -> Option<ControllerSnapshot> {
        let slot = self.slot(device_id).await.ok()?;
        let snapshot = slot.controller.lock().await.snapshot();
        Some(snapshot)
    }

    async fn slot(&self, device_id: DeviceId) -> Result<Slot, OrchestratorError> {
        self.devices
            .read()
            .await
            .get(&device_id)
            .cloned()
            .ok_or(OrchestratorError::Core(CoreError::UnknownDevice(device_id)))
    }
}

fn to_payload<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|_| serde_json::json!({}))
}

//! `thermaguard-agent` library crate.
//!
//! Hosts the fleet orchestrator and its collaborators. Re-exports every
//! module for integration testing; the daemon entrypoint lives in `main.rs`.

pub mod collector;
pub mod config;
pub mod orchestrator;
pub mod registry;
pub mod store;
pub mod tester;

pub use config::AgentConfig;
pub use orchestrator::{FleetOrchestrator, FleetStatus, OrchestratorError};
pub use registry::{DeviceRegistry, RegistryError, StaticRegistry, TelemetrySource};
pub use store::TelemetryStore;

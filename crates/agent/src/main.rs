//! `thermaguard-agent` -- fleet health and thermal control daemon.
//!
//! Discovers local NVIDIA GPUs through NVML, runs a fleet cycle every
//! `CYCLE_INTERVAL_SECS` and delivers alerts to `ALERT_WEBHOOK_URL` (or the
//! log when unset). See [`AgentConfig::from_env`] for every variable.
//!
//! Set `LOG_FORMAT=json` for JSON log lines.

use std::sync::Arc;

use anyhow::Context;
use thermaguard_agent::collector::{NvmlCollector, NvmlRegistry, NvmlTelemetrySource};
use thermaguard_agent::orchestrator::Collaborators;
use thermaguard_agent::registry::StaticEfficiencyTable;
use thermaguard_agent::tester::TelemetryProbeTester;
use thermaguard_agent::{AgentConfig, FleetOrchestrator};
use thermaguard_events::{AlertSink, LogSink, WebhookDelivery};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "thermaguard_agent=info,thermaguard_core=info,thermaguard_events=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AgentConfig::from_env().context("invalid agent configuration")?;
    tracing::info!(
        interval_secs = config.cycle_interval.as_secs(),
        retention_hours = config.retention.as_secs() / 3600,
        overclock_enabled = config.control.overclock_enabled,
        undervolt_enabled = config.control.undervolt_enabled,
        "Loaded agent configuration"
    );

    let collector = Arc::new(NvmlCollector::new(config.default_max_safe_temp));
    tracing::info!(gpu_count = collector.device_count(), "GPU detection complete");

    let source = Arc::new(NvmlTelemetrySource(Arc::clone(&collector)));
    let sink: Arc<dyn AlertSink> = match config.alert_webhook_url.as_deref() {
        Some(url) => {
            tracing::info!(url, "Alerts delivered by webhook");
            Arc::new(WebhookDelivery::new(url).context("failed to build webhook client")?)
        }
        None => {
            tracing::info!("ALERT_WEBHOOK_URL not set, alerts go to the log");
            Arc::new(LogSink)
        }
    };

    let orchestrator = Arc::new(FleetOrchestrator::new(
        config,
        Collaborators {
            registry: Arc::new(NvmlRegistry(Arc::clone(&collector))),
            source: source.clone(),
            efficiency: Arc::new(StaticEfficiencyTable::new()),
            tester: Arc::new(TelemetryProbeTester::new(source)),
            sink,
        },
    ));

    orchestrator.start().await?;
    shutdown_signal().await?;
    orchestrator.stop().await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT or (on Unix) SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to install Ctrl-C handler")?;
                tracing::info!("Received SIGINT (Ctrl-C), stopping");
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, stopping");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to install Ctrl-C handler")?;
        tracing::info!("Received Ctrl-C, stopping");
    }

    Ok(())
}

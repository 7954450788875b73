//! Agent configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use thermaguard_core::control::ControlConfig;
use thermaguard_core::device::DEFAULT_MAX_SAFE_TEMP;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Runtime configuration for the orchestrator and daemon.
///
/// Every field has a default suitable for a single-host deployment.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Time between fleet cycles.
    pub cycle_interval: Duration,
    /// A failed cycle waits `cycle_interval * error_backoff_multiplier`.
    pub error_backoff_multiplier: u32,
    /// Upper bound on devices processed concurrently within one cycle.
    pub max_concurrent_devices: usize,
    pub retention: Duration,
    pub history_capacity: usize,
    /// Bound on a single telemetry read; a read that runs over counts as
    /// unavailable for the cycle.
    pub telemetry_timeout: Duration,
    /// Webhook URL for alerts; alerts are logged when unset.
    pub alert_webhook_url: Option<String>,
    pub alert_timeout: Duration,
    /// Bound on waiting for an in-flight cycle during shutdown.
    pub shutdown_timeout: Duration,
    /// Safe limit given to devices whose registry entry lacks one.
    pub default_max_safe_temp: f64,
    pub control: ControlConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(1800),
            error_backoff_multiplier: 5,
            max_concurrent_devices: 8,
            retention: Duration::from_secs(720 * 3600),
            history_capacity: 50_000,
            telemetry_timeout: Duration::from_secs(10),
            alert_webhook_url: None,
            alert_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            default_max_safe_temp: DEFAULT_MAX_SAFE_TEMP,
            control: ControlConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                    | Default            |
    /// |----------------------------|--------------------|
    /// | `CYCLE_INTERVAL_SECS`      | `1800`             |
    /// | `ERROR_BACKOFF_MULTIPLIER` | `5`                |
    /// | `MAX_CONCURRENT_DEVICES`   | `8`                |
    /// | `RETENTION_HOURS`          | `720`              |
    /// | `HISTORY_CAPACITY`         | `50000`            |
    /// | `TELEMETRY_TIMEOUT_SECS`   | `10`               |
    /// | `OVERCLOCK_ENABLED`        | `true`             |
    /// | `UNDERVOLT_ENABLED`        | `true`             |
    /// | `STABILITY_TIMEOUT_SECS`   | `120`              |
    /// | `ALERT_WEBHOOK_URL`        | unset (log sink)   |
    /// | `ALERT_TIMEOUT_SECS`       | `30`               |
    /// | `SHUTDOWN_TIMEOUT_SECS`    | `30`               |
    /// | `DEFAULT_MAX_SAFE_TEMP`    | `83`               |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Missing or blank keys
    /// take the default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let cycle_secs: u64 = parse_or(&get, "CYCLE_INTERVAL_SECS", 1800)?;
        let retention_hours: u64 = parse_or(&get, "RETENTION_HOURS", 720)?;
        let telemetry_timeout_secs: u64 = parse_or(&get, "TELEMETRY_TIMEOUT_SECS", 10)?;
        let alert_timeout_secs: u64 = parse_or(&get, "ALERT_TIMEOUT_SECS", 30)?;
        let shutdown_timeout_secs: u64 = parse_or(&get, "SHUTDOWN_TIMEOUT_SECS", 30)?;
        let stability_timeout_secs: u64 = parse_or(&get, "STABILITY_TIMEOUT_SECS", 120)?;

        let control = ControlConfig {
            overclock_enabled: parse_or(&get, "OVERCLOCK_ENABLED", true)?,
            undervolt_enabled: parse_or(&get, "UNDERVOLT_ENABLED", true)?,
            stability_timeout: Duration::from_secs(stability_timeout_secs),
            ..defaults.control
        };

        Ok(Self {
            cycle_interval: Duration::from_secs(cycle_secs.max(1)),
            error_backoff_multiplier: parse_or(&get, "ERROR_BACKOFF_MULTIPLIER", 5)?,
            max_concurrent_devices: parse_or::<usize, _>(&get, "MAX_CONCURRENT_DEVICES", 8)?
                .max(1),
            retention: Duration::from_secs(retention_hours * 3600),
            history_capacity: parse_or(&get, "HISTORY_CAPACITY", 50_000)?,
            telemetry_timeout: Duration::from_secs(telemetry_timeout_secs.max(1)),
            alert_webhook_url: get("ALERT_WEBHOOK_URL").map(|v| v.trim().to_string()),
            alert_timeout: Duration::from_secs(alert_timeout_secs),
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
            default_max_safe_temp: parse_or(&get, "DEFAULT_MAX_SAFE_TEMP", DEFAULT_MAX_SAFE_TEMP)?,
            control,
        })
    }

    /// Delay before retrying after an aborted cycle.
    pub fn error_backoff(&self) -> Duration {
        self.cycle_interval * self.error_backoff_multiplier.max(1)
    }
}

fn parse_or<T, F>(get: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

//! Alert types raised by the controller and the maintenance path, plus the
//! cooldown tracker that keeps repeated alerts from flooding the sink.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::types::{DeviceId, Timestamp};

/// Minimum interval between repeated alerts with the same device + title.
pub const ALERT_COOLDOWN: Duration = Duration::from_secs(300); // 5 minutes

/// Severity attached to an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational, e.g. a successful tuning step.
    Info,
    /// Small excursion past a limit.
    Minor,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Minor => "minor",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// A single alert addressed to the external alert sink.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub device_id: DeviceId,
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub timestamp: Timestamp,
}

impl Alert {
    pub fn new(
        device_id: DeviceId,
        title: impl Into<String>,
        message: impl Into<String>,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            device_id,
            title: title.into(),
            message: message.into(),
            severity,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cooldown
// ---------------------------------------------------------------------------

type CooldownKey = (DeviceId, String);

/// Tracks when each (device, title) pair last fired so repeats inside the
/// cooldown window can be suppressed. Critical alerts always pass.
#[derive(Debug)]
pub struct AlertCooldownTracker {
    window: chrono::Duration,
    last_alert: HashMap<CooldownKey, Timestamp>,
}

impl Default for AlertCooldownTracker {
    fn default() -> Self {
        Self::new(ALERT_COOLDOWN)
    }
}

impl AlertCooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            last_alert: HashMap::new(),
        }
    }

    /// Returns `true` if the alert should be emitted, recording it if so.
    pub fn should_alert(&mut self, alert: &Alert) -> bool {
        let key = (alert.device_id, alert.title.clone());
        if alert.severity < AlertSeverity::Critical {
            if let Some(last) = self.last_alert.get(&key) {
                if alert.timestamp.signed_duration_since(*last) < self.window {
                    return false;
                }
            }
        }
        self.last_alert.insert(key, alert.timestamp);
        true
    }
}

//! Maintenance scheduling from failure predictions.
//!
//! Buckets each [`FailurePrediction`] into urgent / scheduled / preventive
//! work and bands the summed cost and downtime into coarse labels for the
//! ticketing collaborator.

use serde::Serialize;

use crate::prediction::{Component, FailurePrediction, RiskLevel, IMMEDIATE_ACTION_HOURS};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Predictions up to and including this horizon (and outside the immediate one) are scheduled.
pub const SCHEDULED_HORIZON_HOURS: f64 = 168.0;

/// Days until a preventive task should be reviewed.
pub const PREVENTIVE_REVIEW_DAYS: u32 = 30;

/// Per-task cost weights.
pub const COST_URGENT: u32 = 500;
pub const COST_SCHEDULED: u32 = 200;
pub const COST_PREVENTIVE: u32 = 50;

/// Total cost below this is `Low`.
pub const COST_BAND_LOW_MAX: u32 = 250;
/// Total cost below this (and not `Low`) is `Medium`.
pub const COST_BAND_MEDIUM_MAX: u32 = 1_000;

/// Summed downtime below this is `Low`.
pub const DOWNTIME_BAND_LOW_MAX_HOURS: f64 = 8.0;
/// Summed downtime up to this is `High`; above it is `Critical`.
pub const DOWNTIME_BAND_HIGH_MAX_HOURS: f64 = 24.0;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenancePriority {
    Immediate,
    High,
    Low,
}

/// When the task should happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "days", rename_all = "snake_case")]
pub enum ScheduleWindow {
    Immediate,
    WithinDays(u32),
    ReviewInDays(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CostBand {
    Low,
    Medium,
    High,
}

impl CostBand {
    pub fn from_total(total: u32) -> Self {
        if total < COST_BAND_LOW_MAX {
            CostBand::Low
        } else if total < COST_BAND_MEDIUM_MAX {
            CostBand::Medium
        } else {
            CostBand::High
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DowntimeBand {
    Low,
    High,
    Critical,
}

impl DowntimeBand {
    pub fn from_hours(hours: f64) -> Self {
        if hours < DOWNTIME_BAND_LOW_MAX_HOURS {
            DowntimeBand::Low
        } else if hours <= DOWNTIME_BAND_HIGH_MAX_HOURS {
            DowntimeBand::High
        } else {
            DowntimeBand::Critical
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceTask {
    pub component: Component,
    pub risk_level: RiskLevel,
    pub priority: MaintenancePriority,
    pub window: ScheduleWindow,
    pub action: String,
    pub cost_estimate: u32,
    pub downtime_min_hours: f64,
    pub downtime_max_hours: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceSchedule {
    pub urgent: Vec<MaintenanceTask>,
    pub scheduled: Vec<MaintenanceTask>,
    pub preventive: Vec<MaintenanceTask>,
    pub total_cost: u32,
    pub estimated_cost_range: CostBand,
    pub total_downtime_hours: f64,
    pub total_downtime_estimate: DowntimeBand,
}

impl MaintenanceSchedule {
    pub fn is_empty(&self) -> bool {
        self.urgent.is_empty() && self.scheduled.is_empty() && self.preventive.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct MaintenanceScheduler;

impl MaintenanceScheduler {
    pub fn new() -> Self {
        Self
    }

    pub fn schedule(&self, predictions: &[FailurePrediction]) -> MaintenanceSchedule {
        let mut urgent = Vec::new();
        let mut scheduled = Vec::new();
        let mut preventive = Vec::new();

        for prediction in predictions {
            let hours = prediction.predicted_hours_to_failure;
            if hours < IMMEDIATE_ACTION_HOURS || prediction.risk_level == RiskLevel::Critical {
                urgent.push(urgent_task(prediction));
            } else if hours <= SCHEDULED_HORIZON_HOURS {
                scheduled.push(scheduled_task(prediction));
            } else {
                preventive.push(preventive_task(prediction));
            }
        }

        let all = || urgent.iter().chain(&scheduled).chain(&preventive);
        let total_cost: u32 = all().map(|t| t.cost_estimate).sum();
        let total_downtime_hours: f64 = all().map(|t| t.downtime_max_hours).sum();

        MaintenanceSchedule {
            estimated_cost_range: CostBand::from_total(total_cost),
            total_downtime_estimate: DowntimeBand::from_hours(total_downtime_hours),
            total_cost,
            total_downtime_hours,
            urgent,
            scheduled,
            preventive,
        }
    }
}

fn urgent_task(prediction: &FailurePrediction) -> MaintenanceTask {
    MaintenanceTask {
        component: prediction.component,
        risk_level: prediction.risk_level,
        priority: MaintenancePriority::Immediate,
        window: ScheduleWindow::Immediate,
        action: primary_action(prediction, "Take the device offline and inspect"),
        cost_estimate: COST_URGENT,
        downtime_min_hours: 4.0,
        downtime_max_hours: 8.0,
    }
}

fn scheduled_task(prediction: &FailurePrediction) -> MaintenanceTask {
    let days = ((prediction.predicted_hours_to_failure / 24.0).floor() as u32).max(1);
    MaintenanceTask {
        component: prediction.component,
        risk_level: prediction.risk_level,
        priority: MaintenancePriority::High,
        window: ScheduleWindow::WithinDays(days),
        action: primary_action(prediction, "Schedule a maintenance window and inspect"),
        cost_estimate: COST_SCHEDULED,
        downtime_min_hours: 2.0,
        downtime_max_hours: 4.0,
    }
}

fn preventive_task(prediction: &FailurePrediction) -> MaintenanceTask {
    MaintenanceTask {
        component: prediction.component,
        risk_level: prediction.risk_level,
        priority: MaintenancePriority::Low,
        window: ScheduleWindow::ReviewInDays(PREVENTIVE_REVIEW_DAYS),
        action: preventive_action(prediction.component).to_string(),
        cost_estimate: COST_PREVENTIVE,
        downtime_min_hours: 0.5,
        downtime_max_hours: 0.5,
    }
}

fn primary_action(prediction: &FailurePrediction, fallback: &str) -> String {
    prediction
        .recommendations
        .first()
        .cloned()
        .unwrap_or_else(|| format!("{fallback} the {} subsystem", prediction.component.as_str()))
}

fn preventive_action(component: Component) -> &'static str {
    match component {
        Component::Thermal => "Clean dust filters and heatsinks; check thermal paste age",
        Component::Performance => "Run a benchmark pass and compare against the baseline",
        Component::ThermalPerformanceCoupling => {
            "Review the fan curve and airflow under sustained load"
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Actuator state owned by a single device's controller.

use std::collections::VecDeque;

use chrono::Utc;
use serde::Serialize;

use crate::types::Timestamp;

/// Maximum adjustments remembered per device.
pub const MAX_ADJUSTMENT_HISTORY: usize = 100;

/// One applied change to the performance offset.
#[derive(Debug, Clone, Serialize)]
pub struct OverclockAdjustment {
    pub timestamp: Timestamp,
    pub delta: f64,
    pub resulting_offset: f64,
    pub reason: String,
}

/// Current performance offset and the recent adjustments that produced it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OverclockState {
    current_offset: f64,
    history: VecDeque<OverclockAdjustment>,
}

impl OverclockState {
    pub fn current_offset(&self) -> f64 {
        self.current_offset
    }

    pub fn history(&self) -> impl Iterator<Item = &OverclockAdjustment> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Add `delta` to the offset and record it.
    pub fn apply(&mut self, delta: f64, reason: impl Into<String>) {
        self.current_offset += delta;
        if self.history.len() == MAX_ADJUSTMENT_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(OverclockAdjustment {
            timestamp: Utc::now(),
            delta,
            resulting_offset: self.current_offset,
            reason: reason.into(),
        });
    }

    /// Zero the offset. Returns the offset that was removed.
    pub fn reset(&mut self, reason: impl Into<String>) -> f64 {
        let previous = self.current_offset;
        if previous != 0.0 {
            self.apply(-previous, reason);
        }
        previous
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FanState {
    pub current_percent: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct VoltageState {
    /// Offset from the stock voltage, negative when undervolted.
    pub current_offset_mv: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_accumulates_and_records() {
        let mut oc = OverclockState::default();
        oc.apply(100.0, "tune");
        oc.apply(50.0, "tune");
        assert_eq!(oc.current_offset(), 150.0);
        let last = oc.history().last().unwrap();
        assert_eq!(last.resulting_offset, 150.0);
    }

    #[test]
    fn reset_records_negative_delta() {
        let mut oc = OverclockState::default();
        oc.apply(120.0, "tune");
        assert_eq!(oc.reset("throttle"), 120.0);
        assert_eq!(oc.current_offset(), 0.0);
        assert_eq!(oc.history().last().unwrap().delta, -120.0);
    }

    #[test]
    fn reset_at_zero_records_nothing() {
        let mut oc = OverclockState::default();
        assert_eq!(oc.reset("throttle"), 0.0);
        assert_eq!(oc.history_len(), 0);
    }

    #[test]
    fn history_is_bounded() {
        let mut oc = OverclockState::default();
        for _ in 0..(MAX_ADJUSTMENT_HISTORY + 20) {
            oc.apply(1.0, "tune");
        }
        assert_eq!(oc.history_len(), MAX_ADJUSTMENT_HISTORY);
    }
}

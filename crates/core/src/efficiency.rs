//! Expected throughput-per-watt baselines keyed by device type.

use std::collections::HashMap;

/// Fallback expected efficiency (throughput units per watt) for unknown types.
pub const DEFAULT_EXPECTED_EFFICIENCY: f64 = 0.2;

/// Lookup of the expected efficiency for a device type.
pub trait EfficiencyTable: Send + Sync {
    /// Expected throughput per watt for `device_type`, if the table knows it.
    fn lookup(&self, device_type: &str) -> Option<f64>;

    /// Expected efficiency with the generic default applied.
    fn expected_for(&self, device_type: &str) -> f64 {
        self.lookup(device_type)
            .unwrap_or(DEFAULT_EXPECTED_EFFICIENCY)
    }
}

/// In-memory efficiency table.
#[derive(Debug, Clone, Default)]
pub struct StaticEfficiencyTable {
    entries: HashMap<String, f64>,
}

impl StaticEfficiencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, device_type: impl Into<String>, per_watt: f64) -> Self {
        self.entries.insert(device_type.into(), per_watt);
        self
    }
}

impl FromIterator<(String, f64)> for StaticEfficiencyTable {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl EfficiencyTable for StaticEfficiencyTable {
    fn lookup(&self, device_type: &str) -> Option<f64> {
        self.entries.get(device_type).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_type_uses_table_value() {
        let table = StaticEfficiencyTable::new().with_entry("s19", 0.034);
        assert_eq!(table.expected_for("s19"), 0.034);
    }

    #[test]
    fn unknown_type_falls_back_to_default() {
        let table = StaticEfficiencyTable::new();
        assert!(table.lookup("mystery").is_none());
        assert_eq!(table.expected_for("mystery"), DEFAULT_EXPECTED_EFFICIENCY);
    }
}

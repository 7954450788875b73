/// Devices are identified by the integer id the registry hands out.
pub type DeviceId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

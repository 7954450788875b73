use crate::types::DeviceId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("Validation failed: {0}")]
    Validation(String),
}

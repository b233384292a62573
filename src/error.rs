//! Hub error taxonomy
//!
//! Every variant is reported to the tool caller as a plain message. None of
//! them are fatal to the process.

use thiserror::Error;

use crate::devices::channel::ChannelError;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Device {device} not found in {room}.")]
    DeviceNotFound { room: String, device: String },

    #[error("Device {device} does not support {capability}.")]
    UnsupportedCapability { device: String, capability: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Device {device} already exists in {room}.")]
    DeviceExists { room: String, device: String },

    #[error("Remote channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Failed to persist state: {0}")]
    PersistenceFailure(String),
}

impl HubError {
    pub fn not_found(room: &str, device: &str) -> Self {
        Self::DeviceNotFound {
            room: room.to_string(),
            device: device.to_string(),
        }
    }

    pub fn unsupported(device: &str, capability: impl ToString) -> Self {
        Self::UnsupportedCapability {
            device: device.to_string(),
            capability: capability.to_string(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }
}

impl From<ChannelError> for HubError {
    fn from(err: ChannelError) -> Self {
        Self::ChannelUnavailable(err.to_string())
    }
}

pub type HubResult<T> = Result<T, HubError>;

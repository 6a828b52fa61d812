//! GATT link error types

use contracts::ContractError;
use thiserror::Error;
use uuid::Uuid;

/// GATT link specific error
#[derive(Debug, Error)]
pub enum GattError {
    /// No peripheral matched the configured identity
    #[error("device not found: {device}")]
    DeviceNotFound { device: String },

    /// Link could not be established
    #[error("failed to connect to '{device}': {message}")]
    ConnectFailed { device: String, message: String },

    /// Characteristic not present on the connected peripheral
    #[error("characteristic {uuid} not found")]
    CharacteristicNotFound { uuid: Uuid },

    /// Descriptor not present on the characteristic
    #[error("descriptor {descriptor} not found on characteristic {characteristic}")]
    DescriptorNotFound {
        characteristic: Uuid,
        descriptor: Uuid,
    },

    /// Operation rejected by the peripheral or the platform stack
    #[error("{operation} failed: {message}")]
    OperationFailed {
        operation: &'static str,
        message: String,
    },

    /// Operation did not complete in time
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// No active link
    #[error("not connected")]
    NotConnected,

    /// Command queue worker has stopped
    #[error("command queue closed")]
    QueueClosed,

    /// Platform BLE stack error
    #[error("platform error: {0}")]
    Platform(String),

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl GattError {
    /// Create operation failure
    pub fn operation(operation: &'static str, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation,
            message: message.into(),
        }
    }

    /// Map into the shared taxonomy, attributing link errors to `device`
    pub fn into_contract(self, device: &str) -> ContractError {
        let message = self.to_string();
        match self {
            Self::Contract(e) => e,
            Self::DeviceNotFound { .. }
            | Self::ConnectFailed { .. }
            | Self::CharacteristicNotFound { .. }
            | Self::NotConnected
            | Self::Platform(_)
            | Self::Timeout {
                operation: "connect",
                ..
            } => ContractError::connection(device, message),
            Self::Timeout { operation, .. } | Self::OperationFailed { operation, .. } => {
                ContractError::gatt(operation, message)
            }
            Self::DescriptorNotFound { .. } => ContractError::gatt("write_descriptor", message),
            Self::QueueClosed => ContractError::gatt("submit", message),
        }
    }
}

#[cfg(feature = "real-ble")]
impl From<btleplug::Error> for GattError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::NotConnected => Self::NotConnected,
            btleplug::Error::DeviceNotFound => Self::DeviceNotFound {
                device: "unknown".into(),
            },
            other => Self::Platform(other.to_string()),
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, GattError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_errors_map_to_connection() {
        let err = GattError::NotConnected.into_contract("tag");
        assert!(matches!(err, ContractError::Connection { .. }));

        let err = GattError::Timeout {
            operation: "connect",
            timeout_ms: 100,
        }
        .into_contract("tag");
        assert!(matches!(err, ContractError::Connection { .. }));
    }

    #[test]
    fn test_operation_errors_map_to_gatt() {
        let err = GattError::operation("read", "att error 0x02").into_contract("tag");
        match err {
            ContractError::Gatt { operation, message } => {
                assert_eq!(operation, "read");
                assert!(message.contains("0x02"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

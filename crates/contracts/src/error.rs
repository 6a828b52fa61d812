//! Layered error definitions
//!
//! Categorized by source: config / connection / gatt / subscription

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Connection Errors =====
    /// Device not found, link failure, or a configured characteristic is missing
    #[error("connection error for device '{device}': {message}")]
    Connection { device: String, message: String },

    // ===== Subscription Errors =====
    /// Notify flag or CCCD write was not confirmed in time
    #[error("notification setup failed for characteristic {characteristic}: {message}")]
    NotificationSetup {
        characteristic: String,
        message: String,
    },

    // ===== GATT Errors =====
    /// GATT command could not be issued (queue closed, not connected, ...)
    #[error("gatt {operation} failed: {message}")]
    Gatt { operation: String, message: String },

    /// Lifecycle call in the wrong state
    #[error("invalid state: expected {expected}, was {actual}")]
    InvalidState { expected: String, actual: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create connection error
    pub fn connection(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create notification setup error
    pub fn notification_setup(
        characteristic: impl ToString,
        message: impl Into<String>,
    ) -> Self {
        Self::NotificationSetup {
            characteristic: characteristic.to_string(),
            message: message.into(),
        }
    }

    /// Create gatt error
    pub fn gatt(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Gatt {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create invalid state error
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Whether this error originates from configuration parsing or validation
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse { .. } | Self::ConfigValidation { .. }
        )
    }
}

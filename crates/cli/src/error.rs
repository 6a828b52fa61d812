//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// The link dropped and could not be re-established
    #[error("Link to {device} lost, {attempts} reconnect attempts failed")]
    ReconnectExhausted { device: String, attempts: u32 },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn reconnect_exhausted(device: impl Into<String>, attempts: u32) -> Self {
        Self::ReconnectExhausted {
            device: device.into(),
            attempts,
        }
    }
}

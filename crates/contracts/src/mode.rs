//! Acquisition mode
//!
//! Validated form of `ModeKind` + `rate_hz`, built once at construction.

use std::time::Duration;

use crate::{
    ContractError, ModeKind, DISABLE_VALUE, ENABLE_INDICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
};

/// How samples are obtained from the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// Read every bound characteristic once per `period` (`ZERO` = as fast as the queue drains)
    Poll { period: Duration },
    /// Peripheral pushes values, no acknowledgement
    Notification,
    /// Peripheral pushes values, acknowledged per value
    Indication,
}

impl AcquisitionMode {
    /// Build the mode from configuration
    ///
    /// # Errors
    /// Poll mode with a negative or non-finite rate.
    pub fn from_config(kind: ModeKind, rate_hz: f64) -> Result<Self, ContractError> {
        match kind {
            ModeKind::Poll => {
                if !rate_hz.is_finite() || rate_hz < 0.0 {
                    return Err(ContractError::config_validation(
                        "input.rate_hz",
                        format!("poll rate must be finite and >= 0, got {rate_hz}"),
                    ));
                }
                let period = if rate_hz == 0.0 {
                    Duration::ZERO
                } else {
                    Duration::from_nanos((1e9 / rate_hz).round() as u64)
                };
                Ok(Self::Poll { period })
            }
            ModeKind::Notification => Ok(Self::Notification),
            ModeKind::Indication => Ok(Self::Indication),
        }
    }

    pub fn kind(&self) -> ModeKind {
        match self {
            Self::Poll { .. } => ModeKind::Poll,
            Self::Notification => ModeKind::Notification,
            Self::Indication => ModeKind::Indication,
        }
    }

    /// Whether values are pushed by the peripheral
    pub fn is_push(&self) -> bool {
        !matches!(self, Self::Poll { .. })
    }

    /// CCCD value that enables this mode, None for poll
    pub fn enable_value(&self) -> Option<[u8; 2]> {
        match self {
            Self::Poll { .. } => None,
            Self::Notification => Some(ENABLE_NOTIFICATION_VALUE),
            Self::Indication => Some(ENABLE_INDICATION_VALUE),
        }
    }

    /// CCCD value that disables pushes, None for poll
    pub fn disable_value(&self) -> Option<[u8; 2]> {
        self.is_push().then_some(DISABLE_VALUE)
    }
}

impl std::fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poll { period } if period.is_zero() => write!(f, "poll (unthrottled)"),
            Self::Poll { period } => write!(f, "poll ({period:?})"),
            Self::Notification => write!(f, "notification"),
            Self::Indication => write!(f, "indication"),
        }
    }
}

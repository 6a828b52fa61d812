//! # Ingestion
//!
//! BLE sample acquisition module.
//!
//! Responsibilities:
//! - Drive the connection manager per acquisition mode (poll / notification / indication)
//! - Convert characteristic payloads into per-channel values (failures become NaN)
//! - Aggregate poll reads into rows
//! - Timestamp rows against the session time origin and append them under one lock
//!
//! ## Usage Example
//!
//! ```ignore
//! use std::collections::HashMap;
//! use gatt_link::{MockConfig, MockGattClient};
//! use ingestion::BluetoothInput;
//!
//! let client = MockGattClient::with_config(MockConfig::for_blueprint(&blueprint));
//! let mut input = BluetoothInput::new(&blueprint, client)?;
//!
//! input.connect(&HashMap::new()).await?;
//! input.start().await?;
//! // ... consumers read input.buffers()
//! input.stop().await;
//! input.close_connection().await;
//! ```

mod accumulator;
mod config;
mod conversion;
mod error;
mod input;
mod session;

// Re-exports
pub use accumulator::{PollAccumulator, Row};
pub use config::{IngestionMetrics, MetricsSnapshot, SUBSCRIBE_TIMEOUT, UNSUBSCRIBE_TIMEOUT};
pub use conversion::{convert, try_convert};
pub use error::{ConversionError, Result};
pub use input::{AbortHandle, BluetoothInput, InputState};

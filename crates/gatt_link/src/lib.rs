//! # GATT Link
//!
//! BLE link layer module.
//!
//! Responsibilities:
//! - Resolve and connect the configured peripheral
//! - Serialize GATT operations (one in flight per link)
//! - Forward notifications and read completions as `GattEvent`s
//! - Provide the cancellable pending latch used for subscribe/unsubscribe
//! - Support Mock mode for tests and hardware-free runs
//!
//! ## Feature Flags
//!
//! - `real-ble`: Enable the platform client (requires btleplug)

pub mod client;
pub mod connection;
pub mod error;
pub mod latch;
pub mod metrics;
pub mod mock_client;
pub mod queue;

#[cfg(feature = "real-ble")]
pub mod btleplug_client;

pub use client::{GattClient, NotificationStream};
pub use connection::{find_device, ConnectionManager};
pub use error::{GattError, Result};
pub use latch::{await_latch, LatchOutcome, LatchSlot, LatchTicket, PendingLatch};
pub use metrics::{QueueMetrics, QueueMetricsSnapshot};
pub use mock_client::{default_payload, GattOp, MockConfig, MockGattClient, MockPeripheral};
pub use queue::{
    CommandQueue, CommandSender, GattCommand, GattEvent, GattEventCallback, QueueConfig,
    DEFAULT_OPERATION_TIMEOUT,
};

#[cfg(feature = "real-ble")]
pub use btleplug_client::BtleplugClient;

//! GATT client abstraction
//!
//! Defines the operations the link layer needs from a BLE stack, supporting
//! the platform implementation and mock testing.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use contracts::{DiscoveredDevice, GattCharacteristic, GattNotification};
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::Result;

/// Stream of values pushed by the connected peripheral
pub type NotificationStream = BoxStream<'static, GattNotification>;

/// GATT client trait
///
/// One client drives one peripheral. Operations take `&mut self`: the command
/// queue worker owns the client while connected, which is what keeps at most
/// one operation in flight.
pub trait GattClient: Send + 'static {
    /// Scan for advertising peripherals
    ///
    /// # Arguments
    /// * `service_filter` - Only report devices advertising this service
    /// * `timeout` - Scan duration
    fn scan(
        &mut self,
        service_filter: Option<Uuid>,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<DiscoveredDevice>>> + Send;

    /// Open the link to `device`
    fn connect(&mut self, device: &DiscoveredDevice) -> impl Future<Output = Result<()>> + Send;

    /// Discover services and return every characteristic
    fn discover_characteristics(
        &mut self,
    ) -> impl Future<Output = Result<Vec<GattCharacteristic>>> + Send;

    /// Read the current value of a characteristic
    fn read(&mut self, characteristic: Uuid) -> impl Future<Output = Result<Bytes>> + Send;

    /// Write a characteristic value (with response)
    fn write(
        &mut self,
        characteristic: Uuid,
        value: Bytes,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Enable or disable local delivery of pushed values for a characteristic
    fn set_notify(
        &mut self,
        characteristic: Uuid,
        enabled: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Write a descriptor value (e.g. the CCCD)
    fn write_descriptor(
        &mut self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Bytes,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Stream of pushed values; ends when the link drops
    fn notifications(&mut self) -> impl Future<Output = Result<NotificationStream>> + Send;

    /// Close the link
    ///
    /// Idempotent operation: returns Ok if not connected
    fn disconnect(&mut self) -> impl Future<Output = Result<()>> + Send;
}

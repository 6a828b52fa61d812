//! ConnectionManager - owns the single GATT link
//!
//! Resolves the configured device, opens the link, builds the characteristic
//! map and hands the client to the command queue worker for as long as the
//! link is up. `close_connection` takes the client back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use contracts::{
    CharacteristicConfig, CharacteristicMap, ContractError, DeviceConfig, DiscoveredDevice,
};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::client::{GattClient, NotificationStream};
use crate::error::{GattError, Result};
use crate::latch::{await_latch, LatchSlot, LatchTicket, PendingLatch};
use crate::metrics::{QueueMetrics, QueueMetricsSnapshot};
use crate::queue::{
    CommandQueue, CommandSender, GattCommand, GattEvent, GattEventCallback, QueueConfig,
};

struct ActiveLink<C: GattClient> {
    device: DiscoveredDevice,
    queue: CommandQueue<C>,
    forwarder: JoinHandle<()>,
}

/// Connection manager for one configured peripheral
pub struct ConnectionManager<C: GattClient> {
    device: DeviceConfig,
    queue_config: QueueConfig,
    /// Present while disconnected; owned by the worker while connected
    client: Option<C>,
    link: Option<ActiveLink<C>>,
    latch: LatchSlot,
    on_event: GattEventCallback,
}

impl<C: GattClient> ConnectionManager<C> {
    pub fn new(
        client: C,
        device: DeviceConfig,
        queue_config: QueueConfig,
        on_event: GattEventCallback,
    ) -> Self {
        Self {
            device,
            queue_config,
            client: Some(client),
            link: None,
            latch: LatchSlot::new(),
            on_event,
        }
    }

    pub fn device_config(&self) -> &DeviceConfig {
        &self.device
    }

    /// Peripheral of the active link
    pub fn connected_device(&self) -> Option<&DiscoveredDevice> {
        self.link.as_ref().map(|l| &l.device)
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Latch slot handle, usable to cancel a wait without borrowing the manager
    pub fn latch_slot(&self) -> LatchSlot {
        self.latch.clone()
    }

    /// Connect and build the characteristic map
    ///
    /// `known_devices` (keyed by address) is consulted before scanning.
    ///
    /// # Errors
    /// `Connection` when the device is not found, the link fails or times out,
    /// or a configured characteristic is missing. `InvalidState` if already connected.
    #[instrument(
        name = "connection_connect",
        skip(self, characteristics, known_devices),
        fields(device = %self.device.id)
    )]
    pub async fn connect(
        &mut self,
        characteristics: &[CharacteristicConfig],
        known_devices: &HashMap<String, DiscoveredDevice>,
    ) -> std::result::Result<CharacteristicMap, ContractError> {
        if self.link.is_some() {
            return Err(ContractError::invalid_state("disconnected", "connected"));
        }
        let label = self.device.label();
        let mut client = self
            .client
            .take()
            .ok_or_else(|| ContractError::invalid_state("client available", "client lost"))?;

        observability::record_connection_state("connecting");
        let established = establish(&mut client, &self.device, characteristics, known_devices).await;
        let (device, map, stream) = match established {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(disconnect_err) = client.disconnect().await {
                    debug!(error = %disconnect_err, "disconnect after failed connect");
                }
                self.client = Some(client);
                observability::record_connection_state("failed");
                warn!(device = %label, error = %e, "connect failed");
                return Err(e.into_contract(&label));
            }
        };

        let queue = CommandQueue::spawn(client, self.queue_config, Arc::clone(&self.on_event));
        let forwarder = spawn_forwarder(
            stream,
            Arc::clone(&self.on_event),
            Arc::clone(queue.metrics()),
            device.address.clone(),
        );

        info!(
            address = %device.address,
            name = ?device.name,
            characteristics = map.len(),
            "connected"
        );
        observability::record_connection_state("connected");
        self.link = Some(ActiveLink {
            device,
            queue,
            forwarder,
        });
        Ok(map)
    }

    /// Enqueue a command on the active link
    pub async fn submit(&self, command: GattCommand) -> std::result::Result<(), ContractError> {
        let link = self.active()?;
        link.queue
            .submit(command)
            .await
            .map_err(|e| e.into_contract(&self.device.label()))
    }

    /// Cloneable submission handle for the active link
    pub fn sender(&self) -> Option<CommandSender> {
        self.link.as_ref().map(|l| l.queue.sender())
    }

    /// Arm the pending latch (cancels the previous one)
    pub fn arm_latch(&self) -> (PendingLatch, LatchTicket) {
        self.latch.arm()
    }

    /// Submit a latched command and wait for its completion
    ///
    /// Returns `Ok(false)` on failure, cancellation or timeout; errors only
    /// when the command cannot be queued.
    pub async fn submit_latched(
        &self,
        purpose: &'static str,
        timeout: Duration,
        build: impl FnOnce(LatchTicket) -> GattCommand,
    ) -> std::result::Result<bool, ContractError> {
        let (pending, ticket) = self.arm_latch();
        self.submit(build(ticket)).await?;
        Ok(await_latch(pending, timeout, purpose).await)
    }

    pub fn queue_metrics(&self) -> Option<QueueMetricsSnapshot> {
        self.link.as_ref().map(|l| l.queue.metrics().snapshot())
    }

    /// Close the link
    ///
    /// Cancels the pending latch and the outstanding command, stops the worker
    /// and disconnects. Idempotent.
    #[instrument(name = "connection_close", skip(self), fields(device = %self.device.id))]
    pub async fn close_connection(&mut self) {
        self.latch.cancel();
        let Some(link) = self.link.take() else {
            debug!("not connected");
            return;
        };
        link.forwarder.abort();

        match link.queue.shutdown().await {
            Some(mut client) => {
                if let Err(e) = client.disconnect().await {
                    warn!(error = %e, "disconnect failed");
                }
                self.client = Some(client);
            }
            None => warn!("client lost with the worker task"),
        }
        observability::record_connection_state("disconnected");
        info!(address = %link.device.address, "connection closed");
    }

    fn active(&self) -> std::result::Result<&ActiveLink<C>, ContractError> {
        self.link
            .as_ref()
            .ok_or_else(|| GattError::NotConnected.into_contract(&self.device.label()))
    }
}

impl<C: GattClient> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        if let Some(link) = &self.link {
            link.forwarder.abort();
        }
    }
}

impl<C: GattClient> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("device", &self.device.id)
            .field("connected", &self.connected_device().map(|d| &d.address))
            .field("latch", &self.latch)
            .finish()
    }
}

/// Pick the configured device among candidates
///
/// Address match wins (case-insensitive); otherwise the advertised name must
/// match and, with a `uuid_filter`, the device must advertise that service.
pub fn find_device<'a>(
    config: &DeviceConfig,
    candidates: impl IntoIterator<Item = &'a DiscoveredDevice>,
) -> Option<&'a DiscoveredDevice> {
    let mut candidates = candidates.into_iter();
    if let Some(address) = &config.address {
        return candidates.find(|d| d.address.eq_ignore_ascii_case(address));
    }
    let name = config.name.as_deref()?;
    candidates.find(|d| {
        d.name.as_deref() == Some(name) && config.uuid_filter.map_or(true, |s| d.advertises(&s))
    })
}

async fn resolve_device<C: GattClient>(
    client: &mut C,
    config: &DeviceConfig,
    known_devices: &HashMap<String, DiscoveredDevice>,
) -> Result<DiscoveredDevice> {
    if let Some(device) = find_device(config, known_devices.values()) {
        debug!(address = %device.address, "device resolved from known devices");
        return Ok(device.clone());
    }

    let scan_timeout = Duration::from_millis(config.scan_timeout_ms);
    let found = client.scan(config.uuid_filter, scan_timeout).await?;
    debug!(found = found.len(), "scan complete");
    find_device(config, &found)
        .cloned()
        .ok_or_else(|| GattError::DeviceNotFound {
            device: config.label(),
        })
}

async fn establish<C: GattClient>(
    client: &mut C,
    config: &DeviceConfig,
    characteristics: &[CharacteristicConfig],
    known_devices: &HashMap<String, DiscoveredDevice>,
) -> Result<(DiscoveredDevice, CharacteristicMap, NotificationStream)> {
    let device = resolve_device(client, config, known_devices).await?;

    tokio::time::timeout(
        Duration::from_millis(config.connect_timeout_ms),
        client.connect(&device),
    )
    .await
    .map_err(|_| GattError::Timeout {
        operation: "connect",
        timeout_ms: config.connect_timeout_ms,
    })??;

    let discovered = client.discover_characteristics().await?;
    debug!(discovered = discovered.len(), "characteristics discovered");
    let map = CharacteristicMap::resolve(&config.label(), characteristics, &discovered)?;
    let stream = client.notifications().await?;
    Ok((device, map, stream))
}

fn spawn_forwarder(
    mut stream: NotificationStream,
    on_event: GattEventCallback,
    metrics: Arc<QueueMetrics>,
    address: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = stream.next().await {
            metrics.inc_notifications();
            on_event(GattEvent::Notification {
                characteristic: notification.uuid,
                value: notification.value,
            });
        }
        warn!(%address, "notification stream ended, link lost");
        observability::record_connection_state("lost");
        on_event(GattEvent::LinkLost);
    })
}

//! BluetoothInput - acquisition mode state machine
//!
//! `Idle -> Connecting -> Connected -> Subscribing -> Acquiring -> Unsubscribing -> Disconnected`
//!
//! Drives the connection manager according to the configured mode: a poll
//! scheduler issuing reads, or notification/indication subscription through
//! the pending latch. Samples flow from the GATT event callback into the
//! session core.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use buffer_sync::{BufferGroup, BufferView, Clock, MonotonicClock};
use bytes::Bytes;
use contracts::{
    AcquisitionBlueprint, AcquisitionMode, CharacteristicConfig, CharacteristicMap, ContractError,
    DiscoveredDevice, CLIENT_CHARACTERISTIC_CONFIG,
};
use gatt_link::{
    CommandSender, ConnectionManager, GattClient, GattCommand, GattEventCallback, LatchSlot,
    QueueConfig, QueueMetricsSnapshot, DEFAULT_OPERATION_TIMEOUT,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{IngestionMetrics, MetricsSnapshot, SUBSCRIBE_TIMEOUT, UNSUBSCRIBE_TIMEOUT};
use crate::error::Result;
use crate::session::AcquisitionCore;

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    /// Created, never connected
    Idle,
    Connecting,
    /// Link up, not acquiring
    Connected,
    Subscribing,
    Acquiring,
    Unsubscribing,
    /// Link closed; `connect` may be called again
    Disconnected,
}

impl fmt::Display for InputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Subscribing => "subscribing",
            Self::Acquiring => "acquiring",
            Self::Unsubscribing => "unsubscribing",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Where the active subscription was made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subscription {
    AtConnect,
    AtStart,
}

/// Cancels an in-progress latch wait from another task
#[derive(Clone)]
pub struct AbortHandle {
    latch: LatchSlot,
    core: Arc<AcquisitionCore>,
}

impl AbortHandle {
    /// Stop accepting samples and cancel the pending latch
    pub fn abort(&self) {
        self.core.set_accepting(false);
        self.latch.cancel();
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle").field("latch", &self.latch).finish()
    }
}

/// BLE acquisition input
pub struct BluetoothInput<C: GattClient> {
    mode: AcquisitionMode,
    subscribe_on_start: bool,
    characteristics: Vec<CharacteristicConfig>,
    state: InputState,
    /// Set by `start`, cleared by `stop`; survives a lost link (paused session)
    running: bool,
    subscription: Option<Subscription>,
    connection: ConnectionManager<C>,
    core: Arc<AcquisitionCore>,
    metrics: Arc<IngestionMetrics>,
    map: Option<CharacteristicMap>,
    poller: Option<JoinHandle<()>>,
}

impl<C: GattClient> BluetoothInput<C> {
    /// Build from a validated blueprint
    ///
    /// # Errors
    /// `ConfigValidation` for an invalid mode/rate combination.
    pub fn new(blueprint: &AcquisitionBlueprint, client: C) -> Result<Self> {
        Self::with_clock(blueprint, client, Arc::new(MonotonicClock::new()))
    }

    /// Build with an explicit clock (tests, replay)
    pub fn with_clock(
        blueprint: &AcquisitionBlueprint,
        client: C,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let input = &blueprint.input;
        let mode = AcquisitionMode::from_config(input.mode, input.rate_hz)?;
        let metrics = Arc::new(IngestionMetrics::new());
        let core = Arc::new(AcquisitionCore::new(
            mode,
            BufferGroup::from_config(&blueprint.buffers),
            clock,
            Arc::clone(&metrics),
        ));

        let sink = Arc::clone(&core);
        let on_event: GattEventCallback = Arc::new(move |event| sink.handle_event(event));
        let connection = ConnectionManager::new(
            client,
            blueprint.device.clone(),
            QueueConfig {
                capacity: input.queue_capacity,
                operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            },
            on_event,
        );

        debug!(device = %blueprint.device.id, %mode, "bluetooth input created");
        Ok(Self {
            mode,
            subscribe_on_start: input.subscribe_on_start,
            characteristics: input.characteristics.clone(),
            state: InputState::Idle,
            running: false,
            subscription: None,
            connection,
            core,
            metrics,
            map: None,
            poller: None,
        })
    }

    pub fn state(&self) -> InputState {
        self.state
    }

    pub fn mode(&self) -> AcquisitionMode {
        self.mode
    }

    /// Session marked running (also while paused after a lost link)
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The notification stream ended without a close request
    pub fn is_link_lost(&self) -> bool {
        self.core.is_link_lost()
    }

    /// Read-only view of the acquired channels (`contracts::BufferReader`)
    ///
    /// Appends stay inside the session; consumers only observe.
    pub fn buffers(&self) -> BufferView {
        self.core.buffers().view()
    }

    pub fn characteristic_map(&self) -> Option<&CharacteristicMap> {
        self.map.as_ref()
    }

    pub fn connected_device(&self) -> Option<&DiscoveredDevice> {
        self.connection.connected_device()
    }

    /// Current time origin in nanoseconds
    pub fn t0(&self) -> Option<i64> {
        self.core.t0()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn queue_metrics(&self) -> Option<QueueMetricsSnapshot> {
        self.connection.queue_metrics()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            latch: self.connection.latch_slot(),
            core: Arc::clone(&self.core),
        }
    }

    /// Connect to the peripheral
    ///
    /// Subscribes right away when push mode is configured without `subscribe_on_start`.
    ///
    /// # Errors
    /// `Connection` if the device cannot be reached, `NotificationSetup` if the
    /// early subscription is not confirmed, `InvalidState` if already connected.
    #[instrument(name = "input_connect", skip(self, known_devices), fields(mode = %self.mode))]
    pub async fn connect(&mut self, known_devices: &HashMap<String, DiscoveredDevice>) -> Result<()> {
        if !matches!(self.state, InputState::Idle | InputState::Disconnected) {
            return Err(ContractError::invalid_state(
                "idle or disconnected",
                self.state.to_string(),
            ));
        }

        self.state = InputState::Connecting;
        let map = match self
            .connection
            .connect(&self.characteristics, known_devices)
            .await
        {
            Ok(map) => map,
            Err(e) => {
                self.state = InputState::Disconnected;
                return Err(e);
            }
        };
        self.core.install(map.clone());
        self.map = Some(map);
        self.state = InputState::Connected;

        if self.mode.is_push() && !self.subscribe_on_start {
            self.state = InputState::Subscribing;
            if let Err(e) = self.subscribe().await {
                warn!(error = %e, "subscription at connect failed");
                self.close_connection().await;
                return Err(e);
            }
            self.subscription = Some(Subscription::AtConnect);
            self.state = InputState::Connected;
        }
        info!(state = %self.state, "input connected");
        Ok(())
    }

    /// Start acquiring
    ///
    /// Keeps `t0` when resuming a running session after a lost link.
    ///
    /// # Errors
    /// `InvalidState` when not connected, `Connection` when the link was lost,
    /// `NotificationSetup` when subscribing is not confirmed.
    #[instrument(name = "input_start", skip(self), fields(mode = %self.mode))]
    pub async fn start(&mut self) -> Result<()> {
        if self.state != InputState::Connected {
            return Err(ContractError::invalid_state("connected", self.state.to_string()));
        }
        if self.core.is_link_lost() {
            return Err(ContractError::connection(
                self.connection.device_config().label(),
                "link lost, reconnect before starting",
            ));
        }

        let resume = self.running;
        self.core.begin(resume);

        if self.mode.is_push() && self.subscribe_on_start {
            self.state = InputState::Subscribing;
            if let Err(e) = self.subscribe().await {
                self.state = InputState::Connected;
                return Err(e);
            }
            self.subscription = Some(Subscription::AtStart);
        }

        self.running = true;
        self.core.set_accepting(true);
        if let AcquisitionMode::Poll { period } = self.mode {
            let sender = self
                .connection
                .sender()
                .ok_or_else(|| ContractError::invalid_state("connected", "no command queue"))?;
            let uuids: Vec<Uuid> = self.map.iter().flat_map(|m| m.uuids()).collect();
            self.poller = Some(spawn_poller(sender, uuids, period));
        }
        self.state = InputState::Acquiring;
        info!(resume, "acquisition started");
        Ok(())
    }

    /// Stop acquiring
    ///
    /// Reverses a start-time subscription; unsubscribe failures are ignored.
    /// No-op unless acquiring.
    #[instrument(name = "input_stop", skip(self), fields(mode = %self.mode))]
    pub async fn stop(&mut self) {
        if self.state != InputState::Acquiring {
            debug!(state = %self.state, "stop ignored");
            return;
        }
        self.running = false;
        self.core.set_accepting(false);
        self.stop_poller();
        self.core.discard_pending();

        if self.subscription == Some(Subscription::AtStart) {
            self.state = InputState::Unsubscribing;
            if !self.core.is_link_lost() {
                self.unsubscribe().await;
            }
            self.subscription = None;
        }
        self.state = InputState::Connected;
        info!("acquisition stopped");
    }

    /// Close the link
    ///
    /// Does not clear the running flag: a session interrupted by a lost link
    /// resumes with the same `t0` after `connect` + `start`. Idempotent.
    #[instrument(name = "input_close", skip(self))]
    pub async fn close_connection(&mut self) {
        self.core.set_accepting(false);
        self.stop_poller();

        if self.subscription.is_some()
            && self.connection.is_connected()
            && !self.core.is_link_lost()
        {
            self.state = InputState::Unsubscribing;
            self.unsubscribe().await;
        }
        self.subscription = None;
        self.connection.close_connection().await;
        if self.state != InputState::Idle {
            self.state = InputState::Disconnected;
        }
    }

    /// Enable pushes on every bound characteristic
    ///
    /// Notify flag first, then the CCCD write; both confirmed within 3s.
    /// A characteristic without CCCD is accepted as is. On failure the
    /// characteristics already subscribed are reverted before returning.
    async fn subscribe(&self) -> Result<()> {
        let Some(enable) = self.mode.enable_value() else {
            return Ok(());
        };
        let mut subscribed = Vec::new();
        for uuid in self.bound_characteristics() {
            if let Err(e) = self.subscribe_one(uuid, enable).await {
                if !subscribed.is_empty() {
                    debug!(count = subscribed.len(), "reverting partial subscription");
                    self.unsubscribe_from(&subscribed).await;
                }
                return Err(e);
            }
            subscribed.push(uuid);
        }
        Ok(())
    }

    async fn subscribe_one(&self, uuid: Uuid, enable: [u8; 2]) -> Result<()> {
        let flagged = self
            .connection
            .submit_latched("notify_flag", SUBSCRIBE_TIMEOUT, |ticket| {
                GattCommand::SetNotify {
                    characteristic: uuid,
                    enabled: true,
                    latch: Some(ticket),
                }
            })
            .await?;
        if !flagged {
            return Err(ContractError::notification_setup(
                uuid,
                "enabling notifications was not confirmed",
            ));
        }

        if !self.has_cccd(&uuid) {
            debug!(characteristic = %uuid, "no CCCD, subscription accepted");
            return Ok(());
        }
        let written = self
            .connection
            .submit_latched("subscribe", SUBSCRIBE_TIMEOUT, |ticket| {
                GattCommand::WriteDescriptor {
                    characteristic: uuid,
                    descriptor: CLIENT_CHARACTERISTIC_CONFIG,
                    value: Bytes::copy_from_slice(&enable),
                    latch: Some(ticket),
                }
            })
            .await?;
        if !written {
            return Err(ContractError::notification_setup(
                uuid,
                format!(
                    "descriptor write not confirmed within {}s",
                    SUBSCRIBE_TIMEOUT.as_secs()
                ),
            ));
        }
        debug!(characteristic = %uuid, "subscribed");
        Ok(())
    }

    /// Best-effort reversal of `subscribe`; every failure is ignored
    async fn unsubscribe(&self) {
        self.unsubscribe_from(&self.bound_characteristics()).await;
    }

    /// CCCD disable, then notify flag off, per characteristic
    ///
    /// An unconfirmed step leaves the queue worker busy with that command,
    /// so the remaining characteristics are left to the disconnect.
    async fn unsubscribe_from(&self, uuids: &[Uuid]) {
        let Some(disable) = self.mode.disable_value() else {
            return;
        };
        for &uuid in uuids {
            if self.has_cccd(&uuid) {
                let confirmed = self
                    .connection
                    .submit_latched("unsubscribe", UNSUBSCRIBE_TIMEOUT, |ticket| {
                        GattCommand::WriteDescriptor {
                            characteristic: uuid,
                            descriptor: CLIENT_CHARACTERISTIC_CONFIG,
                            value: Bytes::copy_from_slice(&disable),
                            latch: Some(ticket),
                        }
                    })
                    .await;
                if !matches!(confirmed, Ok(true)) {
                    debug!(characteristic = %uuid, "unsubscribe not confirmed");
                    return;
                }
            }
            let cleared = self
                .connection
                .submit_latched("notify_flag", UNSUBSCRIBE_TIMEOUT, |ticket| {
                    GattCommand::SetNotify {
                        characteristic: uuid,
                        enabled: false,
                        latch: Some(ticket),
                    }
                })
                .await;
            if !matches!(cleared, Ok(true)) {
                debug!(characteristic = %uuid, "notify flag not cleared");
                return;
            }
        }
    }

    fn bound_characteristics(&self) -> Vec<Uuid> {
        self.map.iter().flat_map(|m| m.uuids()).collect()
    }

    fn has_cccd(&self, uuid: &Uuid) -> bool {
        self.map
            .as_ref()
            .and_then(|m| m.get(uuid))
            .is_some_and(|b| b.characteristic.has_cccd())
    }

    fn stop_poller(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
            debug!("poll scheduler cancelled");
        }
    }
}

impl<C: GattClient> Drop for BluetoothInput<C> {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

impl<C: GattClient> fmt::Debug for BluetoothInput<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BluetoothInput")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("running", &self.running)
            .field("subscription", &self.subscription)
            .finish()
    }
}

/// Poll scheduler: one read per characteristic per period
///
/// A zero period polls as fast as the command queue accepts reads.
fn spawn_poller(sender: CommandSender, uuids: Vec<Uuid>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = (!period.is_zero()).then(|| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        loop {
            match ticker.as_mut() {
                Some(ticker) => {
                    ticker.tick().await;
                }
                None => tokio::task::yield_now().await,
            }
            for &characteristic in &uuids {
                if sender
                    .submit(GattCommand::Read { characteristic })
                    .await
                    .is_err()
                {
                    debug!("command queue closed, poll scheduler exiting");
                    return;
                }
            }
        }
    })
}

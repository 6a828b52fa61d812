//! CommandQueue - serializes GATT operations on a single worker task
//!
//! The worker owns the client and runs one command at a time, in submission
//! order. Completions are reported through the event callback; commands that
//! carry a latch ticket release it with the outcome.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, trace, warn};
use uuid::Uuid;

use crate::client::GattClient;
use crate::error::{GattError, Result};
use crate::latch::LatchTicket;
use crate::metrics::QueueMetrics;

/// Default per-operation timeout
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Queued GATT operation
#[derive(Debug)]
pub enum GattCommand {
    /// Steady-state read; never latched
    Read { characteristic: Uuid },
    Write {
        characteristic: Uuid,
        value: Bytes,
        latch: Option<LatchTicket>,
    },
    WriteDescriptor {
        characteristic: Uuid,
        descriptor: Uuid,
        value: Bytes,
        latch: Option<LatchTicket>,
    },
    /// Toggle local delivery of pushed values
    SetNotify {
        characteristic: Uuid,
        enabled: bool,
        latch: Option<LatchTicket>,
    },
}

impl GattCommand {
    /// Operation name used in logs and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::WriteDescriptor { .. } => "write_descriptor",
            Self::SetNotify { .. } => "set_notify",
        }
    }

    pub fn characteristic(&self) -> Uuid {
        match self {
            Self::Read { characteristic }
            | Self::Write { characteristic, .. }
            | Self::WriteDescriptor { characteristic, .. }
            | Self::SetNotify { characteristic, .. } => *characteristic,
        }
    }
}

/// Completion or push delivered to the acquisition layer
#[derive(Debug, Clone, PartialEq)]
pub enum GattEvent {
    /// A queued read finished; `None` when it failed
    ReadCompleted {
        characteristic: Uuid,
        value: Option<Bytes>,
    },
    /// Value pushed by the peripheral
    Notification { characteristic: Uuid, value: Bytes },
    /// Notification stream ended without a close request
    LinkLost,
}

/// Event callback, invoked from the worker and notification tasks
pub type GattEventCallback = Arc<dyn Fn(GattEvent) + Send + Sync>;

/// Queue configuration
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Bounded queue capacity; `submit` waits when full
    pub capacity: usize,
    /// Per-operation timeout
    pub operation_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

/// Cloneable submission handle
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<GattCommand>,
    metrics: Arc<QueueMetrics>,
}

impl std::fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSender")
            .field("closed", &self.tx.is_closed())
            .field("capacity", &self.tx.capacity())
            .finish()
    }
}

impl CommandSender {
    /// Enqueue a command, waiting while the queue is full
    pub async fn submit(&self, command: GattCommand) -> Result<()> {
        trace!(kind = command.kind(), characteristic = %command.characteristic(), "submit");
        self.tx
            .send(command)
            .await
            .map_err(|_| GattError::QueueClosed)?;
        self.metrics.inc_submitted();
        observability::record_queue_depth(self.tx.max_capacity() - self.tx.capacity());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle to a running command worker
pub struct CommandQueue<C: GattClient> {
    sender: CommandSender,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<C>,
}

impl<C: GattClient> CommandQueue<C> {
    /// Spawn the worker task; it owns `client` until `shutdown`
    pub fn spawn(client: C, config: QueueConfig, on_event: GattEventCallback) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let metrics = Arc::new(QueueMetrics::new());

        let worker = tokio::spawn(queue_worker(
            client,
            rx,
            shutdown_rx,
            on_event,
            Arc::clone(&metrics),
            config.operation_timeout,
        ));

        Self {
            sender: CommandSender { tx, metrics },
            shutdown,
            worker,
        }
    }

    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.sender.metrics
    }

    /// Enqueue a command
    pub async fn submit(&self, command: GattCommand) -> Result<()> {
        self.sender.submit(command).await
    }

    /// Stop the worker, cancelling the outstanding command
    ///
    /// Queued commands are dropped. Returns the client, or None if the worker panicked.
    #[instrument(name = "command_queue_shutdown", skip(self))]
    pub async fn shutdown(self) -> Option<C> {
        let _ = self.shutdown.send(true);
        match self.worker.await {
            Ok(client) => Some(client),
            Err(e) => {
                error!(error = ?e, "GATT worker task panicked");
                None
            }
        }
    }
}

/// Worker task that executes commands one at a time
async fn queue_worker<C: GattClient>(
    mut client: C,
    mut rx: mpsc::Receiver<GattCommand>,
    mut shutdown: watch::Receiver<bool>,
    on_event: GattEventCallback,
    metrics: Arc<QueueMetrics>,
    operation_timeout: Duration,
) -> C {
    debug!("GATT worker started");

    loop {
        let command = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            command = rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };
        metrics.set_queue_len(rx.len());

        let kind = command.kind();
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!(kind, "outstanding command cancelled");
                break;
            }
            () = execute(&mut client, command, operation_timeout, &on_event, &metrics) => {}
        }
    }

    rx.close();
    let dropped = rx.len();
    if dropped > 0 {
        debug!(dropped, "queued commands dropped on shutdown");
    }
    debug!("GATT worker stopped");
    client
}

async fn execute<C: GattClient>(
    client: &mut C,
    command: GattCommand,
    limit: Duration,
    on_event: &GattEventCallback,
    metrics: &QueueMetrics,
) {
    let kind = command.kind();
    let characteristic = command.characteristic();
    let started = Instant::now();

    let (latch, result) = match command {
        GattCommand::Read { characteristic } => {
            let result = with_timeout(kind, limit, client.read(characteristic)).await;
            let value = result.as_ref().ok().cloned();
            on_event(GattEvent::ReadCompleted {
                characteristic,
                value,
            });
            (None, result.map(|_| ()))
        }
        GattCommand::Write {
            characteristic,
            value,
            latch,
        } => (
            latch,
            with_timeout(kind, limit, client.write(characteristic, value)).await,
        ),
        GattCommand::WriteDescriptor {
            characteristic,
            descriptor,
            value,
            latch,
        } => (
            latch,
            with_timeout(
                kind,
                limit,
                client.write_descriptor(characteristic, descriptor, value),
            )
            .await,
        ),
        GattCommand::SetNotify {
            characteristic,
            enabled,
            latch,
        } => (
            latch,
            with_timeout(kind, limit, client.set_notify(characteristic, enabled)).await,
        ),
    };

    let success = result.is_ok();
    match &result {
        Ok(()) => metrics.inc_completed(),
        Err(e) => {
            metrics.inc_failed();
            if kind == "read" {
                debug!(%characteristic, error = %e, "read failed");
            } else {
                warn!(kind, %characteristic, error = %e, "GATT command failed");
            }
        }
    }
    observability::record_gatt_command(kind, success, started.elapsed().as_secs_f64());

    if let Some(ticket) = latch {
        ticket.release(success);
    }
}

async fn with_timeout<T>(
    operation: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or_else(|_| {
            Err(GattError::Timeout {
                operation,
                timeout_ms: limit.as_millis() as u64,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latch::{LatchOutcome, LatchSlot};
    use crate::mock_client::{GattOp, MockConfig, MockGattClient};
    use contracts::{CLIENT_CHARACTERISTIC_CONFIG, ENABLE_NOTIFICATION_VALUE};
    use std::sync::Mutex;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    async fn connected_client(config: MockConfig) -> MockGattClient {
        let mut client = MockGattClient::with_config(config);
        let device = client.scan(None, Duration::ZERO).await.unwrap()[0].clone();
        client.connect(&device).await.unwrap();
        client
    }

    fn collecting_callback() -> (GattEventCallback, Arc<Mutex<Vec<GattEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: GattEventCallback = Arc::new(move |event| sink.lock().unwrap().push(event));
        (callback, events)
    }

    #[tokio::test]
    async fn test_commands_execute_one_at_a_time() {
        let mut config = MockConfig::default()
            .with_characteristic(uuid(1), true)
            .with_characteristic(uuid(2), true);
        config.op_delay = Duration::from_millis(2);
        let client = connected_client(config).await;
        let peripheral = client.peripheral();
        let (callback, events) = collecting_callback();

        let queue = CommandQueue::spawn(client, QueueConfig::default(), callback);
        let tasks: Vec<_> = (0..4u128)
            .map(|i| {
                let sender = queue.sender();
                tokio::spawn(async move {
                    sender
                        .submit(GattCommand::Read {
                            characteristic: uuid(1 + i % 2),
                        })
                        .await
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        let slot = LatchSlot::new();
        let (pending, ticket) = slot.arm();
        queue
            .submit(GattCommand::Write {
                characteristic: uuid(1),
                value: Bytes::from_static(&[0x01]),
                latch: Some(ticket),
            })
            .await
            .unwrap();
        assert!(pending.wait(Duration::from_secs(1)).await.is_released());

        assert_eq!(peripheral.max_in_flight(), 1);
        assert_eq!(peripheral.count_ops(|op| matches!(op, GattOp::Read(_))), 4);
        assert_eq!(events.lock().unwrap().len(), 4);
        let ops = peripheral.ops();
        assert_eq!(ops.last(), Some(&GattOp::Write(uuid(1))));

        let snapshot = queue.metrics().snapshot();
        assert_eq!(snapshot.submitted, 5);
        assert_eq!(snapshot.completed, 5);
        assert!(queue.shutdown().await.is_some());
    }

    #[tokio::test]
    async fn test_failed_read_reports_none() {
        let mut config = MockConfig::default().with_characteristic(uuid(1), true);
        config.failing_reads = vec![uuid(1)];
        let client = connected_client(config).await;
        let (callback, events) = collecting_callback();
        let queue = CommandQueue::spawn(client, QueueConfig::default(), callback);

        queue
            .submit(GattCommand::Read {
                characteristic: uuid(1),
            })
            .await
            .unwrap();
        // Barrier: a latched command completes after the read
        let slot = LatchSlot::new();
        let (pending, ticket) = slot.arm();
        queue
            .submit(GattCommand::SetNotify {
                characteristic: uuid(1),
                enabled: true,
                latch: Some(ticket),
            })
            .await
            .unwrap();
        assert!(pending.wait(Duration::from_secs(1)).await.is_released());

        assert_eq!(
            events.lock().unwrap()[0],
            GattEvent::ReadCompleted {
                characteristic: uuid(1),
                value: None
            }
        );
        assert_eq!(queue.metrics().snapshot().failed, 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_latched_descriptor_write() {
        let client = connected_client(MockConfig::default().with_characteristic(uuid(1), true)).await;
        let peripheral = client.peripheral();
        let (callback, _) = collecting_callback();
        let queue = CommandQueue::spawn(client, QueueConfig::default(), callback);

        let slot = LatchSlot::new();
        let (pending, ticket) = slot.arm();
        queue
            .submit(GattCommand::WriteDescriptor {
                characteristic: uuid(1),
                descriptor: CLIENT_CHARACTERISTIC_CONFIG,
                value: Bytes::from_static(&ENABLE_NOTIFICATION_VALUE),
                latch: Some(ticket),
            })
            .await
            .unwrap();

        assert_eq!(
            pending.wait(Duration::from_secs(1)).await,
            LatchOutcome::Released
        );
        assert_eq!(
            peripheral.cccd_value(&uuid(1)),
            Some(ENABLE_NOTIFICATION_VALUE.to_vec())
        );
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_stalled_command() {
        let mut config = MockConfig::default().with_characteristic(uuid(1), true);
        config.stall_descriptor_writes = true;
        let client = connected_client(config).await;
        let peripheral = client.peripheral();
        let (callback, _) = collecting_callback();
        let queue = CommandQueue::spawn(
            client,
            QueueConfig {
                capacity: 4,
                operation_timeout: Duration::from_secs(60),
            },
            callback,
        );

        let slot = LatchSlot::new();
        let (pending, ticket) = slot.arm();
        queue
            .submit(GattCommand::WriteDescriptor {
                characteristic: uuid(1),
                descriptor: CLIENT_CHARACTERISTIC_CONFIG,
                value: Bytes::from_static(&ENABLE_NOTIFICATION_VALUE),
                latch: Some(ticket),
            })
            .await
            .unwrap();

        assert_eq!(
            pending.wait(Duration::from_secs(3)).await,
            LatchOutcome::TimedOut
        );
        assert!(queue.shutdown().await.is_some());
        tokio::task::yield_now().await;
        assert_eq!(peripheral.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_timeout_fails_latch() {
        let mut config = MockConfig::default().with_characteristic(uuid(1), true);
        config.stall_descriptor_writes = true;
        let client = connected_client(config).await;
        let (callback, _) = collecting_callback();
        let queue = CommandQueue::spawn(
            client,
            QueueConfig {
                capacity: 4,
                operation_timeout: Duration::from_secs(1),
            },
            callback,
        );

        let slot = LatchSlot::new();
        let (pending, ticket) = slot.arm();
        queue
            .submit(GattCommand::WriteDescriptor {
                characteristic: uuid(1),
                descriptor: CLIENT_CHARACTERISTIC_CONFIG,
                value: Bytes::from_static(&ENABLE_NOTIFICATION_VALUE),
                latch: Some(ticket),
            })
            .await
            .unwrap();

        assert_eq!(
            pending.wait(Duration::from_secs(3)).await,
            LatchOutcome::Failed
        );
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let client = connected_client(MockConfig::default()).await;
        let (callback, _) = collecting_callback();
        let queue = CommandQueue::spawn(client, QueueConfig::default(), callback);
        let sender = queue.sender();
        queue.shutdown().await;

        let err = sender
            .submit(GattCommand::Read {
                characteristic: uuid(1),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GattError::QueueClosed));
        assert!(sender.is_closed());
    }
}

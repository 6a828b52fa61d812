//! Acquisition orchestrator - drives one `BluetoothInput` session.
//!
//! Uses the platform BLE client when the `real-ble` feature is enabled and
//! `--mock` is not given; otherwise a simulated peripheral built from the
//! blueprint.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{AcquisitionBlueprint, ChannelIndex, DiscoveredDevice};
use gatt_link::{GattClient, MockConfig, MockGattClient};
use ingestion::BluetoothInput;
use observability::record_buffer_depth;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::{PipelineStats, StopReason};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The acquisition blueprint
    pub blueprint: AcquisitionBlueprint,

    /// Session duration (None = until interrupted)
    pub duration: Option<Duration>,

    /// Maximum number of appended rows (None = unlimited)
    pub max_samples: Option<u64>,

    /// Interval between progress reports and link checks
    pub report_interval: Duration,

    /// Reconnect attempts after a lost link
    pub reconnect_attempts: u32,

    /// Pause before each reconnect attempt
    pub reconnect_backoff: Duration,

    /// Force the simulated peripheral
    #[cfg_attr(not(feature = "real-ble"), allow(dead_code))]
    pub mock: bool,

    /// Push interval of the simulated peripheral
    pub mock_interval: Duration,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Outcome of one wait in the main loop
enum Event {
    Shutdown,
    Deadline,
    Tick,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run the session until `shutdown` resolves or a stop condition is met
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<PipelineStats> {
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        #[cfg(feature = "real-ble")]
        if !self.config.mock {
            let client = gatt_link::BtleplugClient::new()
                .await
                .context("Failed to open Bluetooth adapter")?;
            info!("Using platform Bluetooth adapter");
            return self.run_with_client(client, shutdown).await;
        }

        info!("Running in MOCK mode (no Bluetooth adapter required)");
        let client = MockGattClient::with_config(self.mock_config());
        self.run_with_client(client, shutdown).await
    }

    /// Simulated peripheral matching the blueprint
    fn mock_config(&self) -> MockConfig {
        let blueprint = &self.config.blueprint;
        let push = blueprint.input.mode != contracts::ModeKind::Poll;
        MockConfig {
            notify_interval: push.then_some(self.config.mock_interval),
            ..MockConfig::for_blueprint(blueprint)
        }
    }

    /// Session logic shared by the real and the simulated client
    pub async fn run_with_client<C: GattClient>(
        &self,
        client: C,
        shutdown: impl Future<Output = ()>,
    ) -> Result<PipelineStats> {
        let started = Instant::now();
        let blueprint = &self.config.blueprint;
        let known_devices: HashMap<String, DiscoveredDevice> = HashMap::new();

        let mut input = BluetoothInput::new(blueprint, client)
            .context("Invalid acquisition configuration")?;
        let abort = input.abort_handle();
        tokio::pin!(shutdown);

        let mut stats = PipelineStats::default();

        info!(device = %blueprint.device.label(), mode = %input.mode(), "Opening session...");
        let opened = tokio::select! {
            result = open(&mut input, &known_devices) => Some(result),
            _ = &mut shutdown => None,
        };
        match opened {
            Some(result) => result.with_context(|| {
                format!("Failed to open session with {}", blueprint.device.label())
            })?,
            None => {
                warn!("Interrupted while connecting");
                abort.abort();
                input.close_connection().await;
                stats.stop_reason = StopReason::Interrupted;
                stats.duration = started.elapsed();
                return Ok(stats);
            }
        }
        info!(
            device = ?input.connected_device().map(|d| d.address.as_str()),
            characteristics = input.characteristic_map().map_or(0, |m| m.len()),
            "Acquisition running"
        );

        let deadline = self.config.duration;
        let deadline = async move {
            match deadline {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let mut report = tokio::time::interval(self.config.report_interval);
        report.set_missed_tick_behavior(MissedTickBehavior::Skip);
        report.tick().await;

        stats.stop_reason = loop {
            let event = tokio::select! {
                _ = &mut shutdown => Event::Shutdown,
                _ = &mut deadline => Event::Deadline,
                _ = report.tick() => Event::Tick,
            };

            match event {
                Event::Shutdown => {
                    abort.abort();
                    break StopReason::Interrupted;
                }
                Event::Deadline => {
                    info!("Reached session duration");
                    break StopReason::Duration;
                }
                Event::Tick => {
                    report_progress(&input);

                    if let Some(max) = self.config.max_samples {
                        if input.metrics().rows_appended >= max {
                            info!(rows = max, "Reached max samples limit");
                            break StopReason::MaxSamples;
                        }
                    }

                    if input.is_link_lost() {
                        warn!("Link lost, session paused");
                        let resumed = tokio::select! {
                            ok = self.reconnect(&mut input, &known_devices) => Some(ok),
                            _ = &mut shutdown => None,
                        };
                        match resumed {
                            Some(true) => stats.reconnects += 1,
                            Some(false) => break StopReason::LinkLost,
                            None => {
                                abort.abort();
                                break StopReason::Interrupted;
                            }
                        }
                    }
                }
            }
        };

        // Shutdown
        info!(reason = %stats.stop_reason, "Stopping acquisition...");
        input.stop().await;

        let (value_channels, time_channels) = bound_channels(blueprint);
        stats.collect(&input.buffers(), &value_channels, &time_channels);
        stats.ingestion = input.metrics();
        stats.queue = input.queue_metrics();

        input.close_connection().await;
        stats.duration = started.elapsed();

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            rows = stats.ingestion.rows_appended,
            reconnects = stats.reconnects,
            "Session shutdown complete"
        );

        Ok(stats)
    }

    /// Re-establish a lost link, keeping the session time origin
    ///
    /// Returns false once every attempt has failed; the link is then closed.
    async fn reconnect<C: GattClient>(
        &self,
        input: &mut BluetoothInput<C>,
        known_devices: &HashMap<String, DiscoveredDevice>,
    ) -> bool {
        for attempt in 1..=self.config.reconnect_attempts {
            input.close_connection().await;
            tokio::time::sleep(self.config.reconnect_backoff).await;
            match open(input, known_devices).await {
                Ok(()) => {
                    info!(attempt, t0 = ?input.t0(), "Session resumed");
                    return true;
                }
                Err(e) => warn!(attempt, error = %e, "Reconnect failed"),
            }
        }
        input.close_connection().await;
        false
    }
}

/// Connect and start; a failed start leaves the link closed
async fn open<C: GattClient>(
    input: &mut BluetoothInput<C>,
    known_devices: &HashMap<String, DiscoveredDevice>,
) -> ingestion::Result<()> {
    input.connect(known_devices).await?;
    if let Err(e) = input.start().await {
        input.close_connection().await;
        return Err(e);
    }
    Ok(())
}

fn report_progress<C: GattClient>(input: &BluetoothInput<C>) {
    for channel in input.buffers().stats() {
        record_buffer_depth(&channel.name, channel.len);
    }
    let metrics = input.metrics();
    info!(
        state = %input.state(),
        rows = metrics.rows_appended,
        nan = metrics.nan_values,
        read_failures = metrics.read_failures,
        "Acquisition progress"
    );
}

/// Value channels and time channels written by the blueprint
fn bound_channels(blueprint: &AcquisitionBlueprint) -> (Vec<ChannelIndex>, Vec<ChannelIndex>) {
    let characteristics = &blueprint.input.characteristics;
    let mut values: Vec<ChannelIndex> = characteristics
        .iter()
        .flat_map(|c| c.channels.iter().map(|b| b.channel))
        .collect();
    let mut times: Vec<ChannelIndex> = characteristics
        .iter()
        .filter_map(|c| c.time_channel)
        .collect();
    values.sort_unstable();
    values.dedup();
    times.sort_unstable();
    times.dedup();
    (values, times)
}

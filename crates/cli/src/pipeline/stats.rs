//! Session statistics and summary output.

use std::fmt;
use std::time::Duration;

use buffer_sync::BufferView;
use contracts::{BufferReader, ChannelIndex};
use gatt_link::QueueMetricsSnapshot;
use ingestion::MetricsSnapshot;
use observability::AcquisitionMetricsAggregator;

/// Why the session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    /// Ctrl+C / SIGTERM
    #[default]
    Interrupted,
    /// Configured duration elapsed
    Duration,
    /// Configured sample count reached
    MaxSamples,
    /// Link lost and every reconnect attempt failed
    LinkLost,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Interrupted => "interrupted",
            Self::Duration => "duration",
            Self::MaxSamples => "max_samples",
            Self::LinkLost => "link_lost",
        };
        f.write_str(s)
    }
}

/// Statistics from one acquisition session
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Wall time of the session
    pub duration: Duration,

    pub stop_reason: StopReason,

    /// Successful reconnects after a lost link
    pub reconnects: u32,

    /// Ingestion counters at the end of the session
    pub ingestion: MetricsSnapshot,

    /// Command queue counters of the last link
    pub queue: Option<QueueMetricsSnapshot>,

    /// Buffer content statistics
    pub metrics: AcquisitionMetricsAggregator,
}

impl PipelineStats {
    /// Fold the buffer contents into the aggregator
    pub fn collect(
        &mut self,
        buffers: &BufferView,
        value_channels: &[ChannelIndex],
        time_channels: &[ChannelIndex],
    ) {
        for &channel in value_channels {
            if let Some(name) = buffers.name(channel) {
                self.metrics
                    .update_channel(&name, &buffers.snapshot(channel));
            }
        }
        for &channel in time_channels {
            if channel < buffers.channel_count() {
                self.metrics.update_time_channel(&buffers.snapshot(channel));
            }
        }
    }

    /// Appended rows per second of wall time
    pub fn rows_per_sec(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.ingestion.rows_appended as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Acquisition Statistics                    ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Stop reason: {}", self.stop_reason);
        println!("   ├─ Rows appended: {}", self.ingestion.rows_appended);
        println!("   ├─ Rows/s: {:.2}", self.rows_per_sec());
        println!("   └─ Reconnects: {}", self.reconnects);

        println!("\n🔢 Ingestion");
        println!("   ├─ Values appended: {}", self.ingestion.values_appended);
        println!("   ├─ NaN values: {}", self.ingestion.nan_values);
        println!(
            "   ├─ Conversion failures: {}",
            self.ingestion.conversion_failures
        );
        println!("   ├─ Read failures: {}", self.ingestion.read_failures);
        println!("   ├─ Early poll flushes: {}", self.ingestion.early_flushes);
        println!("   └─ Events dropped: {}", self.ingestion.events_dropped);

        if let Some(ref queue) = self.queue {
            println!("\n📡 GATT Queue");
            println!("   ├─ Commands submitted: {}", queue.submitted);
            println!("   ├─ Commands completed: {}", queue.completed);
            println!("   ├─ Commands failed: {}", queue.failed);
            println!("   └─ Notifications: {}", queue.notifications);
        }

        println!("\n{}", self.metrics.summary());
    }
}

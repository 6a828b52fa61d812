//! Acquisition timeouts and metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Confirmation timeout for enabling notifications (notify flag and CCCD write)
pub const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Confirmation timeout for disabling notifications; failures are ignored
pub const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Ingestion metrics
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Rows appended to the buffers
    pub rows_appended: AtomicU64,

    /// Values appended to value channels (NaN included)
    pub values_appended: AtomicU64,

    /// NaN values written
    pub nan_values: AtomicU64,

    /// Channels whose conversion failed
    pub conversion_failures: AtomicU64,

    /// Reads that returned no data
    pub read_failures: AtomicU64,

    /// Events discarded while not acquiring
    pub events_dropped: AtomicU64,

    /// Poll rows flushed early because a channel repeated
    pub early_flushes: AtomicU64,
}

impl IngestionMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one appended row
    pub fn record_row(&self, values: usize, nan: usize) {
        self.rows_appended.fetch_add(1, Ordering::Relaxed);
        self.values_appended
            .fetch_add(values as u64, Ordering::Relaxed);
        self.nan_values.fetch_add(nan as u64, Ordering::Relaxed);
    }

    pub fn record_conversion_failure(&self) {
        self.conversion_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_failure(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_early_flush(&self) {
        self.early_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_appended: self.rows_appended.load(Ordering::Relaxed),
            values_appended: self.values_appended.load(Ordering::Relaxed),
            nan_values: self.nan_values.load(Ordering::Relaxed),
            conversion_failures: self.conversion_failures.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            early_flushes: self.early_flushes.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rows_appended: u64,
    pub values_appended: u64,
    pub nan_values: u64,
    pub conversion_failures: u64,
    pub read_failures: u64,
    pub events_dropped: u64,
    pub early_flushes: u64,
}

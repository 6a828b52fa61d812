//! Buffer consumer interface
//!
//! Read-only view handed to the analysis/visualization layer.

use crate::ChannelIndex;

/// Read access to acquired channel data
///
/// Implementations must be safe to call while acquisition appends concurrently.
pub trait BufferReader: Send + Sync {
    /// Number of channels
    fn channel_count(&self) -> usize;

    /// Number of values currently held by `channel` (0 for an unknown channel)
    fn len(&self, channel: ChannelIndex) -> usize;

    /// Most recent value of `channel`
    fn last_value(&self, channel: ChannelIndex) -> Option<f64>;

    /// Copy of all values of `channel`, oldest first
    fn snapshot(&self, channel: ChannelIndex) -> Vec<f64>;
}

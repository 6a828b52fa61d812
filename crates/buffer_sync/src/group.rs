//! Shared buffer group.
//!
//! One mutex guards every channel so that the values of one sample event
//! (all value channels plus the time channel) land atomically.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{BufferConfig, BufferReader, ChannelIndex};
use tracing::trace;

use crate::DataBuffer;

/// Cloneable handle to the channel buffers of one acquisition session
#[derive(Clone)]
pub struct BufferGroup {
    inner: Arc<Mutex<Vec<DataBuffer>>>,
}

impl std::fmt::Debug for BufferGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.lock();
        f.debug_list().entries(guard.buffers.iter()).finish()
    }
}

/// Per-channel statistics snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStats {
    pub name: String,
    pub len: usize,
    pub dropped: u64,
    pub last: Option<f64>,
}

impl BufferGroup {
    /// Create from buffer configuration, one buffer per channel
    pub fn from_config(configs: &[BufferConfig]) -> Self {
        Self::new(
            configs
                .iter()
                .map(|c| DataBuffer::new(c.name.clone(), c.capacity))
                .collect(),
        )
    }

    pub fn new(buffers: Vec<DataBuffer>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(buffers)),
        }
    }

    /// Acquire the group lock
    ///
    /// Released when the guard goes out of scope. A panic in another holder
    /// does not poison acquisition; the data is append-only.
    pub fn lock(&self) -> BufferGuard<'_> {
        BufferGuard {
            buffers: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn stats(&self) -> Vec<ChannelStats> {
        self.lock()
            .buffers
            .iter()
            .map(|b| ChannelStats {
                name: b.name().to_string(),
                len: b.len(),
                dropped: b.dropped_count(),
                last: b.last(),
            })
            .collect()
    }

    /// Channel index of the buffer named `name`
    pub fn channel_of(&self, name: &str) -> Option<ChannelIndex> {
        self.lock().buffers.iter().position(|b| b.name() == name)
    }

    /// Read-only handle for consumers outside the acquisition path
    pub fn view(&self) -> BufferView {
        BufferView {
            group: self.clone(),
        }
    }

    /// Clear every channel
    pub fn clear(&self) {
        let mut guard = self.lock();
        for buf in guard.buffers.iter_mut() {
            buf.clear();
        }
    }
}

/// Exclusive access to all channels
pub struct BufferGuard<'a> {
    buffers: MutexGuard<'a, Vec<DataBuffer>>,
}

impl BufferGuard<'_> {
    /// Append `value` to `channel`; returns false for an unknown channel
    #[inline]
    pub fn append(&mut self, channel: ChannelIndex, value: f64) -> bool {
        match self.buffers.get_mut(channel) {
            Some(buf) => {
                buf.append(value);
                true
            }
            None => {
                trace!(
                    channel,
                    channels = self.buffers.len(),
                    "append to unknown channel dropped"
                );
                false
            }
        }
    }

    #[inline]
    pub fn last_value(&self, channel: ChannelIndex) -> Option<f64> {
        self.buffers.get(channel).and_then(DataBuffer::last)
    }

    pub fn len(&self, channel: ChannelIndex) -> usize {
        self.buffers.get(channel).map_or(0, DataBuffer::len)
    }

    pub fn channel_count(&self) -> usize {
        self.buffers.len()
    }

    /// Largest last value over `channels`, ignoring empty channels and NaN
    pub fn max_last_value(&self, channels: &[ChannelIndex]) -> Option<f64> {
        channels
            .iter()
            .filter_map(|&ch| self.last_value(ch))
            .filter(|v| !v.is_nan())
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
    }

    pub fn buffer(&self, channel: ChannelIndex) -> Option<&DataBuffer> {
        self.buffers.get(channel)
    }
}

/// Read-only view of a `BufferGroup`
///
/// Exposes lengths, last values and copies; no write access.
#[derive(Clone, Debug)]
pub struct BufferView {
    group: BufferGroup,
}

impl BufferView {
    pub fn stats(&self) -> Vec<ChannelStats> {
        self.group.stats()
    }

    pub fn channel_of(&self, name: &str) -> Option<ChannelIndex> {
        self.group.channel_of(name)
    }

    /// Name of the buffer behind `channel`
    pub fn name(&self, channel: ChannelIndex) -> Option<String> {
        self.group
            .lock()
            .buffer(channel)
            .map(|b| b.name().to_string())
    }
}

impl BufferReader for BufferView {
    fn channel_count(&self) -> usize {
        self.group.channel_count()
    }

    fn len(&self, channel: ChannelIndex) -> usize {
        BufferReader::len(&self.group, channel)
    }

    fn last_value(&self, channel: ChannelIndex) -> Option<f64> {
        BufferReader::last_value(&self.group, channel)
    }

    fn snapshot(&self, channel: ChannelIndex) -> Vec<f64> {
        self.group.snapshot(channel)
    }
}

impl BufferReader for BufferGroup {
    fn channel_count(&self) -> usize {
        self.lock().channel_count()
    }

    fn len(&self, channel: ChannelIndex) -> usize {
        self.lock().len(channel)
    }

    fn last_value(&self, channel: ChannelIndex) -> Option<f64> {
        self.lock().last_value(channel)
    }

    fn snapshot(&self, channel: ChannelIndex) -> Vec<f64> {
        self.lock()
            .buffer(channel)
            .map(DataBuffer::to_vec)
            .unwrap_or_default()
    }
}

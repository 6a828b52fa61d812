//! Per-channel numeric buffer.
//!
//! Append-only in insertion order. A bounded buffer evicts its oldest value
//! when full and counts the eviction.

use std::collections::VecDeque;
use std::fmt;

/// Ordered sequence of `f64` values for one channel
pub struct DataBuffer {
    name: String,
    values: VecDeque<f64>,
    /// 0 = unbounded
    capacity: usize,
    dropped_count: u64,
    total_appended: u64,
}

impl fmt::Debug for DataBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBuffer")
            .field("name", &self.name)
            .field("len", &self.values.len())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped_count)
            .finish()
    }
}

impl DataBuffer {
    /// Create a buffer; `capacity == 0` means unbounded
    #[inline]
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            values: if capacity > 0 {
                VecDeque::with_capacity(capacity)
            } else {
                VecDeque::new()
            },
            capacity,
            dropped_count: 0,
            total_appended: 0,
        }
    }

    /// Append a value
    ///
    /// If the buffer is bounded and full, the oldest value is evicted.
    #[inline]
    pub fn append(&mut self, value: f64) {
        if self.capacity > 0 && self.values.len() >= self.capacity {
            self.values.pop_front();
            self.dropped_count += 1;
        }
        self.values.push_back(value);
        self.total_appended += 1;
    }

    #[inline]
    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Values evicted because the buffer was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    /// Values ever appended, including evicted ones
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

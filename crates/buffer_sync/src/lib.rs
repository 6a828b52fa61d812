//! # Buffer Sync
//!
//! 采集数据缓冲区与时间原点同步。
//!
//! 负责：
//! - 每通道有序追加的 `DataBuffer`
//! - 多通道原子追加 (`BufferGroup` + `BufferGuard`)
//! - 对外只读视图 `BufferView` (实现 `BufferReader`)
//! - 会话时间原点 `t0` 的锚定与恢复
//!
//! ## 使用示例
//!
//! ```
//! use buffer_sync::{BufferGroup, DataBuffer, TimeOrigin};
//!
//! let group = BufferGroup::new(vec![DataBuffer::new("x", 0), DataBuffer::new("t", 0)]);
//! let mut origin = TimeOrigin::new();
//!
//! let mut guard = group.lock();
//! origin.anchor(1_000, guard.max_last_value(&[1]));
//! guard.append(0, 0.5);
//! guard.append(1, origin.elapsed_secs(1_000));
//! ```

mod buffer;
mod group;
mod time_origin;

pub use buffer::DataBuffer;
pub use group::{BufferGroup, BufferGuard, BufferView, ChannelStats};
pub use time_origin::{Clock, ManualClock, MonotonicClock, TimeOrigin};

// Re-export contracts types
pub use contracts::{BufferConfig, BufferReader, ChannelIndex};

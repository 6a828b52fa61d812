//! # Contracts
//!
//! Frozen interface contracts (ICD), defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Monotonic clock, nanosecond resolution
//! - Time channels hold seconds (f64) relative to the session origin `t0`

mod blueprint;
mod buffer;
mod conversion;
mod error;
mod gatt;
mod mapping;
mod mode;

pub use blueprint::*;
pub use buffer::BufferReader;
pub use conversion::*;
pub use error::*;
pub use gatt::*;
pub use mapping::*;
pub use mode::AcquisitionMode;

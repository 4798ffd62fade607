//! Userland driver core for a TSN-capable NIC.
//!
//! The crate couples two halves that must agree on queue occupancy,
//! priority mapping and buffer lifetimes:
//!
//! * the egress scheduler: IEEE 802.1Qbv time-aware gating and IEEE
//!   802.1Qav credit-based shaping, driven by the device PTP clock, which
//!   stamps every outgoing frame with its hardware transmit window, and
//! * the burst pipeline: receive bursts over multi-descriptor DMA,
//!   reshape the frames in place and submit them back through the same
//!   multi-descriptor path.

mod clock;
mod config;
mod constants;
mod csr;
mod dma;
mod error;
mod gptp;
mod mem;
mod metadata;
mod packet;
mod pipeline;
mod qav;
mod qbv;
mod queue;
mod runtime;
mod spawner;
mod stats;
mod tracker;
mod tsn;
mod tstamp;
mod types;

/// Wrappers exposing internals to the criterion benches.
#[doc(hidden)]
pub mod bench_wrappers;

pub use config::{ConfigError, ConfigLoader, DriverConfig, PipelineCpus, RunMode};
pub use csr::emulated::EmulatedAdaptor;
pub use csr::hardware::SysfsBarAdaptor;
pub use csr::DeviceAdaptor;
pub use dma::{DmaChannel, XdmaChannel};
pub use error::{Result, TsnError};
pub use runtime::{PipelineHandle, Runtime};
pub use stats::StatsSnapshot;
pub use tsn::{MqprioUpdate, QavParams, QbvEntry};
pub use types::{Sysclock, Timestamp};

//! # nwp-driver
//!
//! Host-side core of the driver for Wi-Fi/Bluetooth/BLE/Zigbee network
//! co-processors. Protocol domains share one transport; the core keeps their
//! commands serialized per domain, orders traffic across domains, and owns
//! all memory through pools carved from one caller buffer.
//!
//! ## Module Overview
//! - [`driver`]     – Driver context, init/deinit lifecycle.
//! - [`command`]    – Command issue, bounded wait and response processing.
//! - [`scheduler`]  – Fixed-priority sweep over transport, tx and rx work.
//! - [`subsystem`]  – Per-domain control blocks and the in-flight gate.
//! - [`common`]     – Common-domain commands (opermode, version, RTC, GPIO).
//! - [`queue`]      – Packet FIFOs per channel.
//! - [`frame`]      – Frame descriptor layout.
//! - [`transport`]  – Bus boundary; [`sim`] provides a simulated device.
//!
//! ```
//! use nwp_driver::{CoexMode, Driver, DriverConfig, SimTransport};
//!
//! let mut memory = vec![0u8; 32 * 1024];
//! let driver = Driver::init(&mut memory, DriverConfig::default(), SimTransport::new()).unwrap();
//! driver.device_init().unwrap();
//! driver.wireless_init(0, CoexMode::WLAN_ONLY).unwrap();
//!
//! let mut version = [0u8; 32];
//! let len = driver.get_fw_version(&mut version).unwrap();
//! assert_eq!(&version[..len], b"1610.2.4.0.0.36");
//! ```

pub mod command;
pub mod common;
pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod frame;
pub mod primitives;
pub mod queue;
pub mod scheduler;
pub mod sim;
pub mod subsystem;
pub mod sync;
pub mod transport;

pub use command::Command;
pub use common::{Antenna, CoexMode, RtcTime, DRIVER_VERSION};
pub use config::{DriverConfig, DriverConfigBuilder, PoolConfig, ScheduleMode, Timeouts};
pub use driver::Driver;
pub use error::{status_code, DriverError, DriverResult, FrameError, TransportError};
pub use event::{AsyncEvent, SwitchProtoCallback};
pub use frame::{FrameDescriptor, QueueId};
pub use nwp_mem::PoolStats;
pub use scheduler::SchedulerState;
pub use sim::{Reply, SimTransport};
pub use subsystem::{DeviceState, Subsystem, SubsystemState};
pub use transport::Transport;

#[cfg(test)]
mod tests;

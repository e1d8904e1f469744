//! Driver configuration.
//!
//! Everything that sizes the driver is fixed at [`Driver::init`]: the pool
//! geometry per subsystem (a subsystem without a pool is disabled), the
//! scheduling model and the command timeouts.
//!
//! [`Driver::init`]: crate::driver::Driver::init

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};
use crate::frame::DESCRIPTOR_LEN;
use crate::subsystem::Subsystem;

/// How blocking waits make progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScheduleMode {
    /// No scheduler thread: a waiting caller runs scheduler rounds itself.
    #[default]
    Cooperative,
    /// A dedicated thread runs [`Driver::run_scheduler`] and callers block.
    ///
    /// [`Driver::run_scheduler`]: crate::driver::Driver::run_scheduler
    Threaded,
}

/// Geometry of one packet pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolConfig {
    pub block_count: usize,
    /// Bytes per block, frame descriptor included.
    pub block_len: usize,
}

impl PoolConfig {
    pub const fn new(block_count: usize, block_len: usize) -> Self {
        Self {
            block_count,
            block_len,
        }
    }

    pub const fn region_len(&self) -> usize {
        self.block_count * self.block_len
    }

    /// Largest command payload a block can carry.
    pub const fn max_payload(&self) -> usize {
        self.block_len.saturating_sub(DESCRIPTOR_LEN)
    }

    fn validate(&self) -> DriverResult<()> {
        if self.block_count == 0 || self.block_len <= DESCRIPTOR_LEN || self.block_len % 4 != 0 {
            return Err(DriverError::InvalidParam);
        }
        Ok(())
    }
}

/// Per-command wait limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Timeouts {
    pub card_ready: Duration,
    pub opermode: Duration,
    /// Firmware version, RTC read, GPIO.
    pub query: Duration,
    /// Antenna, feature frame, debug log, protocol switch, UART flow control.
    pub config: Duration,
    pub ram_dump: Duration,
    /// Soft reset.
    pub deinit: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            card_ready: Duration::from_millis(3000),
            opermode: Duration::from_millis(3000),
            query: Duration::from_millis(1000),
            config: Duration::from_millis(1000),
            ram_dump: Duration::from_millis(3000),
            deinit: Duration::from_millis(3000),
        }
    }
}

impl Timeouts {
    /// Every timeout set to `value`.
    pub const fn uniform(value: Duration) -> Self {
        Self {
            card_ready: value,
            opermode: value,
            query: value,
            config: value,
            ram_dump: value,
            deinit: value,
        }
    }
}

/// Configuration for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DriverConfig {
    pub name: String,
    pub mode: ScheduleMode,
    pub rx_pool: PoolConfig,
    pub common_pool: PoolConfig,
    pub wlan_pool: Option<PoolConfig>,
    pub bt_classic_pool: Option<PoolConfig>,
    pub ble_pool: Option<PoolConfig>,
    pub zigbee_pool: Option<PoolConfig>,
    pub prop_protocol_pool: Option<PoolConfig>,
    pub timeouts: Timeouts,
    /// Longest a threaded scheduler sleeps before polling the transport.
    pub poll_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: "nwp".to_string(),
            mode: ScheduleMode::Cooperative,
            rx_pool: PoolConfig::new(4, 1616),
            common_pool: PoolConfig::new(2, 1616),
            wlan_pool: Some(PoolConfig::new(2, 1616)),
            bt_classic_pool: Some(PoolConfig::new(2, 528)),
            ble_pool: Some(PoolConfig::new(2, 528)),
            zigbee_pool: Some(PoolConfig::new(2, 272)),
            prop_protocol_pool: Some(PoolConfig::new(2, 272)),
            timeouts: Timeouts::default(),
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl DriverConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> DriverConfigBuilder {
        DriverConfigBuilder::default()
    }

    /// Pool of `subsystem`, `None` when the subsystem is disabled.
    pub fn pool(&self, subsystem: Subsystem) -> Option<PoolConfig> {
        match subsystem {
            Subsystem::Common => Some(self.common_pool),
            Subsystem::Wlan => self.wlan_pool,
            Subsystem::BtClassic => self.bt_classic_pool,
            Subsystem::Ble => self.ble_pool,
            Subsystem::Zigbee => self.zigbee_pool,
            Subsystem::PropProtocol => self.prop_protocol_pool,
        }
    }

    fn pool_slot(&mut self, subsystem: Subsystem) -> Option<&mut Option<PoolConfig>> {
        match subsystem {
            Subsystem::Common => None,
            Subsystem::Wlan => Some(&mut self.wlan_pool),
            Subsystem::BtClassic => Some(&mut self.bt_classic_pool),
            Subsystem::Ble => Some(&mut self.ble_pool),
            Subsystem::Zigbee => Some(&mut self.zigbee_pool),
            Subsystem::PropProtocol => Some(&mut self.prop_protocol_pool),
        }
    }

    pub fn is_enabled(&self, subsystem: Subsystem) -> bool {
        self.pool(subsystem).is_some()
    }

    /// Checks pool geometry: every block must hold a descriptor plus payload
    /// and keep 4-byte alignment.
    pub fn validate(&self) -> DriverResult<()> {
        self.rx_pool.validate()?;
        for subsystem in Subsystem::ALL {
            if let Some(pool) = self.pool(subsystem) {
                pool.validate()?;
            }
        }
        Ok(())
    }
}

/// Builder for ergonomic driver configuration construction.
#[derive(Debug, Clone, Default)]
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    /// Sets the driver name used in log lines.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets the scheduling model.
    pub fn mode(mut self, mode: ScheduleMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Sets the receive pool geometry.
    pub fn rx_pool(mut self, pool: PoolConfig) -> Self {
        self.config.rx_pool = pool;
        self
    }

    /// Sets the transmit pool of `subsystem`, enabling it.
    pub fn pool(mut self, subsystem: Subsystem, pool: PoolConfig) -> Self {
        match self.config.pool_slot(subsystem) {
            Some(slot) => *slot = Some(pool),
            None => self.config.common_pool = pool,
        }
        self
    }

    /// Disables `subsystem`. The common subsystem cannot be disabled.
    pub fn disable(mut self, subsystem: Subsystem) -> Self {
        if let Some(slot) = self.config.pool_slot(subsystem) {
            *slot = None;
        }
        self
    }

    /// Keeps only the common subsystem and the listed ones.
    pub fn only(mut self, subsystems: &[Subsystem]) -> Self {
        for subsystem in Subsystem::ALL {
            if !subsystems.contains(&subsystem) {
                self = self.disable(subsystem);
            }
        }
        self
    }

    /// Sets all command timeouts.
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    /// Sets the threaded scheduler poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Finalizes the builder.
    pub fn build(self) -> DriverConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DriverConfig::default().validate().is_ok());
    }

    #[test]
    fn block_must_exceed_descriptor() {
        let config = DriverConfig::builder()
            .pool(Subsystem::Wlan, PoolConfig::new(1, DESCRIPTOR_LEN))
            .build();
        assert_eq!(config.validate(), Err(DriverError::InvalidParam));
    }

    #[test]
    fn disabled_pool_is_not_validated() {
        let config = DriverConfig::builder()
            .pool(Subsystem::Zigbee, PoolConfig::new(0, 3))
            .disable(Subsystem::Zigbee)
            .build();
        assert!(config.validate().is_ok());
        assert!(!config.is_enabled(Subsystem::Zigbee));
    }

    #[test]
    fn common_cannot_be_disabled() {
        let config = DriverConfig::builder().only(&[]).build();
        assert!(config.is_enabled(Subsystem::Common));
        assert!(!config.is_enabled(Subsystem::Wlan));
    }
}

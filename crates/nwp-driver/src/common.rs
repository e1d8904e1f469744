//! Common-domain commands.
//!
//! Operations that are not tied to one radio: operating mode, firmware
//! version, antenna and feature configuration, firmware debug controls, RTC,
//! GPIO and soft reset. Each one validates its parameters locally, then goes
//! through [`Driver::execute`] on [`Subsystem::Common`].

use crate::command::Command;
use crate::driver::Driver;
use crate::error::{DriverError, DriverResult};
use crate::event::SwitchProtoCallback;
use crate::frame::opcode;
use crate::subsystem::{DeviceState, Subsystem, SubsystemState};
use crate::transport::Transport;

/// Version of this driver.
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest value accepted for debug-log assertion type and level.
pub const MAX_ASSERTION_VALUE: u32 = 15;

/// Antenna path selection.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Antenna {
    Internal = 0,
    External = 1,
}

/// Coexistence mode passed with the operating mode.
///
/// Bit 0 selects WLAN; bits 2..4 select the Bluetooth flavour; bit 1 selects
/// Zigbee and bit 4 the proprietary protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoexMode(pub u16);

impl CoexMode {
    pub const WLAN_ONLY: CoexMode = CoexMode(0);
    pub const WLAN_BT_CLASSIC: CoexMode = CoexMode(5);
    pub const WLAN_DUAL_MODE: CoexMode = CoexMode(9);
    pub const WLAN_BLE: CoexMode = CoexMode(13);

    pub fn includes_wlan(self) -> bool {
        self.0 == 0 || self.0 & 0x1 != 0
    }

    pub fn includes_bt(self) -> bool {
        self.0 & 0xc != 0
    }

    pub fn includes_zigbee(self) -> bool {
        self.0 & 0x2 != 0
    }

    pub fn includes_prop_protocol(self) -> bool {
        self.0 & 0x10 != 0
    }
}

/// Calendar time kept by the device RTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RtcTime {
    pub second: u32,
    pub minute: u32,
    pub hour: u32,
    pub day: u32,
    pub month: u32,
    pub year: u32,
    pub weekday: u32,
}

impl RtcTime {
    pub const WIRE_LEN: usize = 28;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        let fields = [
            self.second,
            self.minute,
            self.hour,
            self.day,
            self.month,
            self.year,
            self.weekday,
        ];
        let mut out = [0u8; Self::WIRE_LEN];
        for (chunk, value) in out.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> DriverResult<Self> {
        if bytes.len() < Self::WIRE_LEN {
            return Err(DriverError::InvalidParam);
        }
        let mut fields = bytes[..Self::WIRE_LEN]
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        let mut next = || fields.next().unwrap_or_default();
        Ok(Self {
            second: next(),
            minute: next(),
            hour: next(),
            day: next(),
            month: next(),
            year: next(),
            weekday: next(),
        })
    }
}

/// GPIO sub-commands of [`opcode::GPIO_CONFIG`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GpioOp {
    PinInit = 0,
    Write = 1,
    Read = 2,
}

impl<'a, T: Transport> Driver<'a, T> {
    /// Version of this driver.
    pub fn driver_version(&self) -> &'static str {
        DRIVER_VERSION
    }

    /// Status code of the last common command.
    pub fn common_status(&self) -> DriverResult<i32> {
        Ok(self.control_block(Subsystem::Common)?.status())
    }

    /// Overrides the stored common status.
    pub fn set_common_status(&self, status: i32) -> DriverResult<()> {
        self.control_block(Subsystem::Common)?.set_status(status);
        Ok(())
    }

    /// Waits for card ready, then sets the operating and coexistence modes.
    ///
    /// On success the common subsystem (and WLAN, when `coex` includes it)
    /// moves to `OpermodeDone`. Enabled Bluetooth, Zigbee and proprietary
    /// protocol domains that `coex` brings up announce their own card ready
    /// afterwards; this returns only once each of them has.
    pub fn wireless_init(&self, opermode: u16, coex: CoexMode) -> DriverResult<()> {
        if self.device_state() < DeviceState::DeviceInitDone {
            return Err(DriverError::WrongState);
        }
        self.wait_card_ready()?;
        let common = self.control_block(Subsystem::Common)?;
        if common.state() != SubsystemState::CardReady {
            return Err(DriverError::WrongState);
        }

        let mode = (u32::from(coex.0) << 16) | u32::from(opermode);
        let payload = mode.to_le_bytes();
        let mut command = Command::new(opcode::OPERMODE, &payload)
            .min_state(SubsystemState::CardReady)
            .timeout(self.config.timeouts.opermode)
            .on_success(Subsystem::Common, SubsystemState::OpermodeDone);
        if coex.includes_wlan() && self.config.is_enabled(Subsystem::Wlan) {
            command = command.on_success(Subsystem::Wlan, SubsystemState::OpermodeDone);
        }
        self.execute(Subsystem::Common, command)?;
        log::debug!("{}: opermode {opermode:#x} coex {:#x} set", self.config.name, coex.0);

        for subsystem in self.protocol_domains(coex) {
            self.wait_protocol_ready(subsystem)?;
        }
        Ok(())
    }

    /// Copies the firmware version string into `buf`, returning its length.
    pub fn get_fw_version(&self, buf: &mut [u8]) -> DriverResult<usize> {
        if buf.is_empty() {
            return Err(DriverError::InvalidParam);
        }
        self.wait_card_ready()?;
        self.execute(
            Subsystem::Common,
            Command::new(opcode::FW_VERSION, &[])
                .min_state(SubsystemState::CardReady)
                .timeout(self.config.timeouts.query)
                .response(buf),
        )
    }

    /// Selects the antenna path and its gains.
    pub fn wireless_antenna(&self, antenna: Antenna, gain_2g: u8, gain_5g: u8) -> DriverResult<()> {
        let payload = [antenna as u8, gain_2g, gain_5g];
        self.config_command(opcode::ANTENNA_SELECT, &payload)
    }

    /// Sends the feature-enable bitmap.
    pub fn send_feature_frame(&self, enables: u32) -> DriverResult<()> {
        self.config_command(opcode::FEATURE_FRAME, &enables.to_le_bytes())
    }

    /// Configures firmware debug prints.
    pub fn common_debug_log(&self, assertion_type: u32, assertion_level: u32) -> DriverResult<()> {
        self.require_opermode()?;
        if assertion_type > MAX_ASSERTION_VALUE || assertion_level > MAX_ASSERTION_VALUE {
            return Err(DriverError::InvalidParam);
        }
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&assertion_type.to_le_bytes());
        payload[4..].copy_from_slice(&assertion_level.to_le_bytes());
        self.config_command(opcode::DEBUG_LOG, &payload)
    }

    /// Switches the active protocol: 0 disables Bluetooth, 1 enables it.
    ///
    /// When disabling, `callback` runs once the firmware reports the switch
    /// done. Enabling takes no callback.
    pub fn switch_proto(&self, mode: u8, callback: Option<SwitchProtoCallback>) -> DriverResult<()> {
        self.require_opermode()?;
        if mode > 1 || (mode == 1 && callback.is_some()) {
            return Err(DriverError::InvalidParam);
        }
        self.callbacks.lock().switch_proto = callback.map(|callback| (u16::from(mode), callback));
        self.config_command(opcode::SWITCH_PROTO, &[mode])
    }

    pub fn set_rtc_timer(&self, time: &RtcTime) -> DriverResult<()> {
        self.config_command(opcode::SET_RTC_TIMER, &time.to_bytes())
    }

    pub fn get_rtc_timer(&self) -> DriverResult<RtcTime> {
        let mut buf = [0u8; RtcTime::WIRE_LEN];
        let len = self.execute(
            Subsystem::Common,
            Command::new(opcode::GET_RTC_TIMER, &[])
                .min_state(SubsystemState::OpermodeDone)
                .timeout(self.config.timeouts.query)
                .response(&mut buf),
        )?;
        RtcTime::from_bytes(&buf[..len])
    }

    /// Reads `buf.len()` bytes of device RAM starting at `addr`.
    pub fn get_ram_log(&self, addr: u32, buf: &mut [u8]) -> DriverResult<usize> {
        self.require_opermode()?;
        if buf.is_empty() {
            return Err(DriverError::InvalidParam);
        }
        let length = u32::try_from(buf.len()).map_err(|_| DriverError::InvalidParam)?;
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&addr.to_le_bytes());
        payload[4..].copy_from_slice(&length.to_le_bytes());
        self.execute(
            Subsystem::Common,
            Command::new(opcode::GET_RAM_DUMP, &payload)
                .min_state(SubsystemState::OpermodeDone)
                .timeout(self.config.timeouts.ram_dump)
                .response(buf),
        )
    }

    /// Asks the firmware to raise an assertion.
    pub fn assert_firmware(&self) -> DriverResult<()> {
        self.config_command(opcode::ASSERT, &[])
    }

    /// Configures a GPIO pin.
    pub fn gpio_pin_init(&self, pin: u8, configuration: u8) -> DriverResult<()> {
        self.gpio(GpioOp::PinInit, pin, configuration, None).map(|_| ())
    }

    pub fn gpio_write_pin(&self, pin: u8, value: bool) -> DriverResult<()> {
        self.gpio(GpioOp::Write, pin, u8::from(value), None).map(|_| ())
    }

    pub fn gpio_read_pin(&self, pin: u8) -> DriverResult<bool> {
        let mut value = [0u8; 1];
        let len = self.gpio(GpioOp::Read, pin, 0, Some(&mut value))?;
        if len != 1 {
            return Err(DriverError::InvalidParam);
        }
        Ok(value[0] != 0)
    }

    /// Sets UART hardware flow control: 0 off, 1 on, 2 on with RTS only.
    pub fn uart_flow_control(&self, mode: u8) -> DriverResult<()> {
        if mode > 2 {
            return Err(DriverError::InvalidParam);
        }
        self.execute(
            Subsystem::Common,
            Command::new(opcode::UART_FLOW_CTRL, &[mode])
                .min_state(SubsystemState::CardReady)
                .timeout(self.config.timeouts.config),
        )
        .map(|_| ())
    }

    /// Soft-resets the device. Every subsystem drops back to `None` and the
    /// firmware announces card ready again.
    pub fn wireless_deinit(&self) -> DriverResult<()> {
        let mut command = Command::new(opcode::SOFT_RESET, &[])
            .min_state(SubsystemState::CardReady)
            .timeout(self.config.timeouts.deinit);
        for subsystem in Subsystem::ALL {
            if self.config.is_enabled(subsystem) {
                command = command.on_success(subsystem, SubsystemState::None);
            }
        }
        self.execute(Subsystem::Common, command)?;
        log::debug!("{}: device soft reset", self.config.name);
        Ok(())
    }

    fn wait_card_ready(&self) -> DriverResult<()> {
        let timeout = self.config.timeouts.card_ready;
        if self.wait_for_state(Subsystem::Common, SubsystemState::CardReady, timeout)? {
            Ok(())
        } else {
            log::warn!("{}: card ready not seen within {timeout:?}", self.config.name);
            Err(DriverError::CardReadyTimeout)
        }
    }

    /// Enabled non-WLAN domains started by `coex`.
    fn protocol_domains(&self, coex: CoexMode) -> Vec<Subsystem> {
        let mut domains = Vec::new();
        if coex.includes_bt() {
            domains.extend([Subsystem::BtClassic, Subsystem::Ble]);
        }
        if coex.includes_zigbee() {
            domains.push(Subsystem::Zigbee);
        }
        if coex.includes_prop_protocol() {
            domains.push(Subsystem::PropProtocol);
        }
        domains.retain(|&subsystem| self.config.is_enabled(subsystem));
        domains
    }

    fn wait_protocol_ready(&self, subsystem: Subsystem) -> DriverResult<()> {
        let timeout = self.config.timeouts.card_ready;
        if self.wait_for_state(subsystem, SubsystemState::OpermodeDone, timeout)? {
            Ok(())
        } else {
            log::warn!("{}: {subsystem} card ready not seen within {timeout:?}", self.config.name);
            Err(DriverError::CardReadyTimeout)
        }
    }

    fn require_opermode(&self) -> DriverResult<()> {
        if self.control_block(Subsystem::Common)?.state() < SubsystemState::OpermodeDone {
            return Err(DriverError::WrongState);
        }
        Ok(())
    }

    fn config_command(&self, opcode: u16, payload: &[u8]) -> DriverResult<()> {
        self.execute(
            Subsystem::Common,
            Command::new(opcode, payload)
                .min_state(SubsystemState::OpermodeDone)
                .timeout(self.config.timeouts.config),
        )
        .map(|_| ())
    }

    fn gpio(&self, op: GpioOp, pin: u8, arg: u8, response: Option<&mut [u8]>) -> DriverResult<usize> {
        let payload = [op as u8, pin, arg];
        let mut command = Command::new(opcode::GPIO_CONFIG, &payload)
            .min_state(SubsystemState::CardReady)
            .timeout(self.config.timeouts.query);
        if let Some(buf) = response {
            command = command.response(buf);
        }
        self.execute(Subsystem::Common, command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtc_time_survives_wire_encoding() {
        let time = RtcTime {
            second: 59,
            minute: 30,
            hour: 12,
            day: 19,
            month: 10,
            year: 2026,
            weekday: 1,
        };
        assert_eq!(RtcTime::from_bytes(&time.to_bytes()).unwrap(), time);
        assert_eq!(RtcTime::from_bytes(&[0; 27]), Err(DriverError::InvalidParam));
    }

    #[test]
    fn coex_modes_select_domains() {
        assert!(CoexMode::WLAN_ONLY.includes_wlan());
        assert!(!CoexMode::WLAN_ONLY.includes_bt());
        assert!(CoexMode::WLAN_BLE.includes_bt());
        assert!(CoexMode::WLAN_DUAL_MODE.includes_wlan());
        assert!(!CoexMode(4).includes_wlan());
    }
}

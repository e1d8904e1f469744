//! Scheduler events and application callbacks.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::DriverError;
use crate::frame::QueueId;
use crate::queue::Channel;
use crate::subsystem::Subsystem;
use crate::sync::Arc;

/// Transport has a frame to read.
pub const RX_EVENT: u32 = 1 << 0;

/// Event bit announcing pending packets on `channel`.
pub const fn tx_event(channel: Channel) -> u32 {
    1 << (1 + channel.index())
}

/// Every tx bit.
pub const TX_EVENTS: u32 = ((1 << Channel::ALL.len()) - 1) << 1;

/// Global event bitmap shared by producers and the scheduler.
#[derive(Debug, Default)]
pub struct EventMap {
    bits: AtomicU32,
}

impl EventMap {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    pub fn raise(&self, bits: u32) {
        self.bits.fetch_or(bits, Ordering::AcqRel);
    }

    /// Clears and returns the bits of `mask` that were set.
    pub fn take(&self, mask: u32) -> u32 {
        self.bits.fetch_and(!mask, Ordering::AcqRel) & mask
    }

    pub fn pending(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.bits.store(0, Ordering::Release);
    }
}

/// A frame from the device that no pending command was waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncEvent {
    pub queue: QueueId,
    pub opcode: u16,
    pub status: u16,
    pub payload: Vec<u8>,
}

/// Invoked from the scheduler for unsolicited frames.
pub type UnknownEventCallback = Arc<dyn Fn(&AsyncEvent) + Send + Sync>;

/// Invoked when a command gives up waiting: subsystem, opcode, error.
pub type WaitTimeoutCallback = Arc<dyn Fn(Subsystem, u16, &DriverError) + Send + Sync>;

/// Invoked when the firmware reports a protocol switch as done: requested
/// mode, Bluetooth-disabled status.
pub type SwitchProtoCallback = Arc<dyn Fn(u16, u8) + Send + Sync>;

/// Registered application callbacks.
///
/// Callbacks run on the scheduler's context and must not issue blocking
/// driver commands.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub unknown_event: Option<UnknownEventCallback>,
    pub wait_timeout: Option<WaitTimeoutCallback>,
    /// Mode of the last `switch_proto` request and its completion handler.
    pub switch_proto: Option<(u16, SwitchProtoCallback)>,
}

impl core::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Callbacks")
            .field("unknown_event", &self.unknown_event.is_some())
            .field("wait_timeout", &self.wait_timeout.is_some())
            .field("switch_proto", &self.switch_proto.as_ref().map(|(mode, _)| mode))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_bits_do_not_overlap_rx() {
        for channel in Channel::ALL {
            assert_eq!(tx_event(channel) & RX_EVENT, 0);
            assert_ne!(tx_event(channel) & TX_EVENTS, 0);
        }
    }

    #[test]
    fn take_clears_only_masked_bits() {
        let events = EventMap::new();
        events.raise(RX_EVENT | tx_event(Channel::Bt));
        assert_eq!(events.take(RX_EVENT), RX_EVENT);
        assert_eq!(events.pending(), tx_event(Channel::Bt));
        assert_eq!(events.take(RX_EVENT), 0);
    }
}

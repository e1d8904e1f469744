//! Host/NWP frame layout.
//!
//! Every frame starts with a 16-byte descriptor:
//!
//! | bytes  | content                                        |
//! |--------|------------------------------------------------|
//! | 0..2   | payload length (12 bits) \| queue number << 12 |
//! | 2..4   | opcode                                         |
//! | 4..12  | reserved                                       |
//! | 12..14 | firmware status                                |
//! | 14..16 | reserved                                       |
//!
//! All fields are little-endian. The payload follows the descriptor.

use crate::error::FrameError;

pub const DESCRIPTOR_LEN: usize = 16;

/// Largest payload the 12-bit length field can describe.
pub const MAX_PAYLOAD: usize = 0x0fff;

/// Queue numbers carried in the descriptor.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueId {
    Common = 0,
    Zigbee = 1,
    Bt = 2,
    Wlan = 4,
    PropProtocol = 8,
}

impl QueueId {
    pub const fn raw(self) -> u8 {
        self as u8
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Common),
            1 => Some(Self::Zigbee),
            2 => Some(Self::Bt),
            4 => Some(Self::Wlan),
            8 => Some(Self::PropProtocol),
            _ => None,
        }
    }
}

/// Request and response opcodes understood by the core.
pub mod opcode {
    pub const OPERMODE: u16 = 0x10;
    pub const ANTENNA_SELECT: u16 = 0x1b;
    pub const SOFT_RESET: u16 = 0x1c;
    pub const DEBUG_LOG: u16 = 0x26;
    pub const GPIO_CONFIG: u16 = 0x28;
    pub const FW_VERSION: u16 = 0x49;
    pub const SWITCH_PROTO: u16 = 0x77;
    pub const CARD_READY: u16 = 0x89;
    pub const GET_RAM_DUMP: u16 = 0x92;
    pub const UART_FLOW_CTRL: u16 = 0xa4;
    pub const FEATURE_FRAME: u16 = 0xc8;
    pub const ASSERT: u16 = 0xe1;
    pub const SET_RTC_TIMER: u16 = 0xe9;
    pub const GET_RTC_TIMER: u16 = 0xf2;

    /// Card-ready events raised on the protocol queues after opermode.
    pub const BT_CARD_READY: u16 = 0x0505;
    pub const ZIGBEE_CARD_READY: u16 = 0x00ff;
    pub const PROP_PROTOCOL_CARD_READY: u16 = 0x0101;
}

/// Decoded frame descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub queue: QueueId,
    pub opcode: u16,
    pub length: u16,
    pub status: u16,
}

impl FrameDescriptor {
    pub fn new(queue: QueueId, opcode: u16, length: usize) -> Result<Self, FrameError> {
        if length > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge(length));
        }
        Ok(Self {
            queue,
            opcode,
            length: length as u16,
            status: 0,
        })
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn encode(&self) -> [u8; DESCRIPTOR_LEN] {
        let mut out = [0u8; DESCRIPTOR_LEN];
        let word = (self.length & 0x0fff) | (u16::from(self.queue.raw()) << 12);
        out[0..2].copy_from_slice(&word.to_le_bytes());
        out[2..4].copy_from_slice(&self.opcode.to_le_bytes());
        out[12..14].copy_from_slice(&self.status.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < DESCRIPTOR_LEN {
            return Err(FrameError::Truncated(bytes.len()));
        }
        let word = u16::from_le_bytes([bytes[0], bytes[1]]);
        let raw_queue = (word >> 12) as u8;
        let queue = QueueId::from_raw(raw_queue).ok_or(FrameError::UnknownQueue(raw_queue))?;
        Ok(Self {
            queue,
            opcode: u16::from_le_bytes([bytes[2], bytes[3]]),
            length: word & 0x0fff,
            status: u16::from_le_bytes([bytes[12], bytes[13]]),
        })
    }
}

/// Writes descriptor and payload into `out`, returning the frame length.
pub fn write_frame(out: &mut [u8], descriptor: &FrameDescriptor, payload: &[u8]) -> Result<usize, FrameError> {
    let total = DESCRIPTOR_LEN + payload.len();
    if payload.len() != usize::from(descriptor.length) {
        return Err(FrameError::LengthMismatch {
            declared: usize::from(descriptor.length),
            actual: payload.len(),
        });
    }
    if total > out.len() {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }
    out[..DESCRIPTOR_LEN].copy_from_slice(&descriptor.encode());
    out[DESCRIPTOR_LEN..total].copy_from_slice(payload);
    Ok(total)
}

/// Builds an owned frame.
pub fn encode_frame(queue: QueueId, opcode: u16, status: u16, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let descriptor = FrameDescriptor::new(queue, opcode, payload.len())?.with_status(status);
    let mut out = vec![0u8; DESCRIPTOR_LEN + payload.len()];
    write_frame(&mut out, &descriptor, payload)?;
    Ok(out)
}

/// Splits a received frame into descriptor and payload.
pub fn parse_frame(bytes: &[u8]) -> Result<(FrameDescriptor, &[u8]), FrameError> {
    let descriptor = FrameDescriptor::decode(bytes)?;
    let body = &bytes[DESCRIPTOR_LEN..];
    let declared = usize::from(descriptor.length);
    if body.len() < declared {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }
    Ok((descriptor, &body[..declared]))
}

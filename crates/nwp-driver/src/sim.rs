//! Simulated NWP firmware.
//!
//! [`SimTransport`] answers common commands the way a booted device would,
//! announces card ready when interrupts are first unmasked, and can be
//! scripted per opcode to stay silent, fail, or reply with a chosen payload.
//! Protocol card-ready frames that follow an operating mode can be held back
//! and released later, as a slow radio core would.
//! Clones share state, so a test keeps one handle while the driver owns the
//! other.

use std::collections::{HashMap, VecDeque};

use crate::error::TransportError;
use crate::frame::{encode_frame, opcode, parse_frame, QueueId};
use crate::sync::{Arc, Mutex};
use crate::transport::Transport;

/// Largest RAM dump the simulator returns.
const MAX_RAM_DUMP: usize = 1024;

/// Scripted reaction to one opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Default firmware behaviour.
    Respond,
    /// Swallow the request.
    Silent,
    /// Empty response carrying this status.
    Status(u16),
    /// Successful response with this payload.
    Payload(Vec<u8>),
}

/// A frame the driver sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub queue: QueueId,
    pub opcode: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct SimState {
    masked: bool,
    booted: bool,
    outbox: VecDeque<Vec<u8>>,
    sent: Vec<SentFrame>,
    replies: HashMap<u16, Reply>,
    firmware_version: Vec<u8>,
    gpio: [u8; 64],
    rtc: Vec<u8>,
    send_failures: usize,
    hold_protocol_ready: bool,
    held: Vec<Vec<u8>>,
}

impl SimState {
    fn push(&mut self, queue: QueueId, opcode: u16, status: u16, payload: &[u8]) {
        match encode_frame(queue, opcode, status, payload) {
            Ok(frame) => self.outbox.push_back(frame),
            Err(err) => log::error!("sim: cannot encode {opcode:#06x}: {err}"),
        }
    }

    fn announce_protocol_ready(&mut self, queue: QueueId, opcode: u16) {
        if self.hold_protocol_ready {
            match encode_frame(queue, opcode, 0, &[]) {
                Ok(frame) => self.held.push(frame),
                Err(err) => log::error!("sim: cannot encode {opcode:#06x}: {err}"),
            }
        } else {
            self.push(queue, opcode, 0, &[]);
        }
    }

    fn respond(&mut self, sent: &SentFrame) {
        let reply = self.replies.get(&sent.opcode).cloned().unwrap_or(Reply::Respond);
        match reply {
            Reply::Silent => {}
            Reply::Status(status) => self.push(sent.queue, sent.opcode, status, &[]),
            Reply::Payload(payload) => self.push(sent.queue, sent.opcode, 0, &payload),
            Reply::Respond => self.default_response(sent),
        }
    }

    fn default_response(&mut self, sent: &SentFrame) {
        let payload = &sent.payload;
        match sent.opcode {
            opcode::OPERMODE => {
                self.push(sent.queue, sent.opcode, 0, &[]);
                let coex = payload
                    .get(2..4)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .unwrap_or(0);
                if coex & 0xc != 0 {
                    self.announce_protocol_ready(QueueId::Bt, opcode::BT_CARD_READY);
                }
                if coex & 0x2 != 0 {
                    self.announce_protocol_ready(QueueId::Zigbee, opcode::ZIGBEE_CARD_READY);
                }
                if coex & 0x10 != 0 {
                    self.announce_protocol_ready(QueueId::PropProtocol, opcode::PROP_PROTOCOL_CARD_READY);
                }
            }
            opcode::FW_VERSION => {
                let version = self.firmware_version.clone();
                self.push(sent.queue, sent.opcode, 0, &version);
            }
            opcode::GPIO_CONFIG => {
                let (op, pin, arg) = match payload.as_slice() {
                    [op, pin, arg, ..] => (*op, usize::from(*pin), *arg),
                    _ => return self.push(sent.queue, sent.opcode, 0x0021, &[]),
                };
                let Some(level) = self.gpio.get_mut(pin) else {
                    return self.push(sent.queue, sent.opcode, 0x0021, &[]);
                };
                match op {
                    1 => {
                        *level = arg;
                        self.push(sent.queue, sent.opcode, 0, &[]);
                    }
                    2 => {
                        let value = *level;
                        self.push(sent.queue, sent.opcode, 0, &[value]);
                    }
                    _ => self.push(sent.queue, sent.opcode, 0, &[]),
                }
            }
            opcode::SET_RTC_TIMER => {
                self.rtc = payload.clone();
                self.push(sent.queue, sent.opcode, 0, &[]);
            }
            opcode::GET_RTC_TIMER => {
                let rtc = self.rtc.clone();
                self.push(sent.queue, sent.opcode, 0, &rtc);
            }
            opcode::GET_RAM_DUMP => {
                let word = |range: std::ops::Range<usize>| {
                    payload
                        .get(range)
                        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                        .unwrap_or(0)
                };
                let addr = word(0..4);
                let len = (word(4..8) as usize).min(MAX_RAM_DUMP);
                let dump: Vec<u8> = (0..len).map(|i| addr.wrapping_add(i as u32) as u8).collect();
                self.push(sent.queue, sent.opcode, 0, &dump);
            }
            opcode::SOFT_RESET => {
                self.push(sent.queue, sent.opcode, 0, &[]);
                self.push(QueueId::Common, opcode::CARD_READY, 0, &[]);
            }
            _ => self.push(sent.queue, sent.opcode, 0, &[]),
        }
    }
}

/// Shared handle to the simulated device.
#[derive(Debug, Clone)]
pub struct SimTransport {
    state: Arc<Mutex<SimState>>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                masked: true,
                booted: false,
                outbox: VecDeque::new(),
                sent: Vec::new(),
                replies: HashMap::new(),
                firmware_version: b"1610.2.4.0.0.36".to_vec(),
                gpio: [0; 64],
                rtc: vec![0; 28],
                send_failures: 0,
                hold_protocol_ready: false,
                held: Vec::new(),
            })),
        }
    }

    /// Sets the string reported for firmware version requests.
    pub fn with_firmware_version(self, version: &[u8]) -> Self {
        self.state.lock().firmware_version = version.to_vec();
        self
    }

    /// Scripts the reaction to `opcode`.
    pub fn set_reply(&self, opcode: u16, reply: Reply) {
        self.state.lock().replies.insert(opcode, reply);
    }

    /// Restores the default reaction to `opcode`.
    pub fn clear_reply(&self, opcode: u16) {
        self.state.lock().replies.remove(&opcode);
    }

    /// Fails the next `count` sends with a bus fault.
    pub fn fail_sends(&self, count: usize) {
        self.state.lock().send_failures = count;
    }

    /// Holds back the Bluetooth, Zigbee and proprietary protocol card-ready
    /// frames that follow an operating mode until
    /// [`release_protocol_ready`](Self::release_protocol_ready).
    pub fn hold_protocol_ready(&self) {
        self.state.lock().hold_protocol_ready = true;
    }

    /// Delivers held card-ready frames and stops holding new ones.
    pub fn release_protocol_ready(&self) {
        let mut state = self.state.lock();
        state.hold_protocol_ready = false;
        let held = std::mem::take(&mut state.held);
        state.outbox.extend(held);
    }

    /// Queues an unsolicited frame from the device.
    pub fn inject(&self, queue: QueueId, opcode: u16, status: u16, payload: &[u8]) {
        self.state.lock().push(queue, opcode, status, payload);
    }

    /// Queues raw bytes as if received from the bus.
    pub fn inject_raw(&self, frame: Vec<u8>) {
        self.state.lock().outbox.push_back(frame);
    }

    /// Every frame the driver sent, oldest first.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.state.lock().sent.clone()
    }

    pub fn sent_opcodes(&self) -> Vec<u16> {
        self.state.lock().sent.iter().map(|frame| frame.opcode).collect()
    }

    pub fn is_masked(&self) -> bool {
        self.state.lock().masked
    }

    /// Frames waiting to be read by the driver.
    pub fn pending_frames(&self) -> usize {
        self.state.lock().outbox.len()
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.send_failures > 0 {
            state.send_failures -= 1;
            return Err(TransportError::Bus("simulated send failure".to_string()));
        }
        let (descriptor, payload) = parse_frame(frame).map_err(|err| TransportError::Bus(err.to_string()))?;
        let sent = SentFrame {
            queue: descriptor.queue,
            opcode: descriptor.opcode,
            payload: payload.to_vec(),
        };
        state.respond(&sent);
        state.sent.push(sent);
        Ok(())
    }

    fn frame_ready(&self) -> bool {
        let state = self.state.lock();
        !state.masked && !state.outbox.is_empty()
    }

    fn receive_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
        let mut state = self.state.lock();
        if state.masked {
            return Ok(None);
        }
        let Some(frame) = state.outbox.pop_front() else {
            return Ok(None);
        };
        if frame.len() > buf.len() {
            return Err(TransportError::FrameTooLarge {
                len: frame.len(),
                capacity: buf.len(),
            });
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(Some(frame.len()))
    }

    fn mask_interrupts(&mut self) {
        self.state.lock().masked = true;
    }

    fn unmask_interrupts(&mut self) {
        let mut state = self.state.lock();
        state.masked = false;
        if !state.booted {
            state.booted = true;
            state.push(QueueId::Common, opcode::CARD_READY, 0, &[]);
        }
    }
}

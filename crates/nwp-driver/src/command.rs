//! Command/response state machine.
//!
//! [`Driver::execute`] is the single path every command takes: state check,
//! in-flight token, packet, enqueue, bounded wait, completion. Response
//! processing ([`Driver::process_frame`]) runs on the scheduler and is the
//! only place a subsystem's state moves forward.

use std::time::{Duration, Instant};

use crate::driver::Driver;
use crate::error::{DriverError, DriverResult};
use crate::event::{tx_event, AsyncEvent};
use crate::frame::{opcode, parse_frame, write_frame, FrameDescriptor, QueueId};
use crate::queue::Channel;
use crate::subsystem::{Completion, DeviceState, Delivery, Subsystem, SubsystemState, Transitions};
use crate::transport::Transport;

/// Wait applied when a command does not set its own timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// One request to the firmware.
#[derive(Debug)]
pub struct Command<'r> {
    opcode: u16,
    payload: &'r [u8],
    min_state: SubsystemState,
    timeout: Duration,
    response: Option<&'r mut [u8]>,
    transitions: Transitions,
}

impl<'r> Command<'r> {
    pub fn new(opcode: u16, payload: &'r [u8]) -> Self {
        Self {
            opcode,
            payload,
            min_state: SubsystemState::None,
            timeout: DEFAULT_TIMEOUT,
            response: None,
            transitions: Transitions::new(),
        }
    }

    /// Lowest subsystem state in which the command may be issued.
    pub fn min_state(mut self, state: SubsystemState) -> Self {
        self.min_state = state;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Buffer that receives the response payload.
    pub fn response(mut self, buf: &'r mut [u8]) -> Self {
        self.response = Some(buf);
        self
    }

    /// State change applied by response processing when the firmware
    /// reports success.
    pub fn on_success(mut self, subsystem: Subsystem, state: SubsystemState) -> Self {
        if self.transitions.push((subsystem, state)).is_err() {
            log::warn!("dropping transition of {subsystem} for opcode {:#06x}", self.opcode);
        }
        self
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }
}

/// Subsystems whose responses travel on `queue`.
fn subsystems_on(queue: QueueId) -> &'static [Subsystem] {
    match queue {
        QueueId::Common => &[Subsystem::Common],
        QueueId::Wlan => &[Subsystem::Wlan],
        QueueId::Bt => &[Subsystem::BtClassic, Subsystem::Ble],
        QueueId::Zigbee => &[Subsystem::Zigbee],
        QueueId::PropProtocol => &[Subsystem::PropProtocol],
    }
}

impl<'a, T: Transport> Driver<'a, T> {
    /// Sends `command` on `subsystem` and waits for its response.
    ///
    /// Returns the number of response bytes copied into the command's
    /// response buffer. The subsystem is released before this returns,
    /// whatever the outcome.
    pub fn execute(&self, subsystem: Subsystem, command: Command<'_>) -> DriverResult<usize> {
        if self.device_state() == DeviceState::None {
            return Err(DriverError::WrongState);
        }
        let cb = self.control_block(subsystem)?;
        if cb.state() < command.min_state {
            return Err(DriverError::WrongState);
        }

        let Command {
            opcode,
            payload,
            timeout,
            response,
            transitions,
            ..
        } = command;

        let token = cb.gate.try_acquire().ok_or(DriverError::WrongState)?;
        let mut packet = cb.pool.allocate().ok_or(DriverError::PacketAllocationFailure)?;

        let channel = subsystem.channel();
        let written = FrameDescriptor::new(channel.queue_id(), opcode, payload.len())
            .and_then(|descriptor| write_frame(packet.buffer_mut(), &descriptor, payload));
        match written.map_err(DriverError::from).and_then(|len| packet.set_len(len).map_err(DriverError::from)) {
            Ok(()) => {}
            Err(err) => {
                log::warn!("{subsystem}: command {opcode:#06x} rejected: {err}");
                self.release_packet(packet);
                return Err(DriverError::InvalidParam);
            }
        }

        let capacity = response.as_ref().map(|buf| buf.len());
        cb.arm(&token, opcode, capacity, transitions);
        if !self.submit(channel, packet) {
            cb.abort();
            let _ = cb.take_completion(&token);
            return Err(DriverError::Aborted);
        }
        log::debug!(
            "{subsystem}: command {opcode:#06x} issued, generation {}",
            token.generation()
        );

        // Posts left over from an earlier command do not end the wait.
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.wait_on(&cb.command_sem, remaining) {
                break;
            }
            if cb.is_complete(&token) || self.device_state() == DeviceState::None {
                break;
            }
            log::trace!("{subsystem}: ignoring wake-up not meant for generation {}", token.generation());
        }
        let completion = cb.take_completion(&token);
        drop(token);

        let completion = match completion {
            Some(completion) => completion,
            None if self.device_state() == DeviceState::None => return Err(DriverError::Aborted),
            None => {
                let err = DriverError::ResponseTimeout;
                log::warn!("{subsystem}: no response to {opcode:#06x} within {timeout:?}");
                cb.set_status(err.code());
                self.report_wait_timeout(subsystem, opcode, &err);
                return Err(err);
            }
        };

        match completion {
            Completion::Aborted { .. } => Err(DriverError::Aborted),
            Completion::Response { status, .. } | Completion::Overflow { status, .. } if status != 0 => {
                cb.set_status(i32::from(status));
                Err(DriverError::Firmware(status))
            }
            Completion::Overflow { needed, .. } => {
                let err = DriverError::InsufficientBuffer {
                    needed,
                    available: capacity.unwrap_or(0),
                };
                cb.set_status(err.code());
                Err(err)
            }
            Completion::Response { payload, .. } => {
                cb.set_status(0);
                if let Some(buf) = response {
                    buf[..payload.len()].copy_from_slice(&payload);
                }
                Ok(payload.len())
            }
        }
    }

    /// Queues a command packet for the scheduler. Returns `false` when the
    /// driver was torn down meanwhile; the channel is then drained again.
    pub(crate) fn submit(&self, channel: Channel, packet: nwp_mem::Packet<'a>) -> bool {
        self.tx_queue(channel).enqueue(packet);
        if self.device_state() == DeviceState::None {
            for packet in self.tx_queue(channel).drain() {
                self.release_packet(packet);
            }
            return false;
        }
        self.notify(tx_event(channel));
        true
    }

    /// Dispatches one received frame.
    ///
    /// A response completes the matching pending command and applies its
    /// state transitions. Card-ready events advance subsystem state. The late
    /// response of a timed-out command is dropped. A protocol-switch report
    /// goes to the handler given to `switch_proto`. Everything else goes to
    /// the unknown-event callback.
    pub fn process_frame(&self, frame: &[u8]) -> DriverResult<()> {
        let (descriptor, payload) = parse_frame(frame)?;
        log::trace!(
            "{}: rx {:?} opcode {:#06x} status {:#06x}, {} bytes",
            self.config.name,
            descriptor.queue,
            descriptor.opcode,
            descriptor.status,
            payload.len()
        );
        let candidates = subsystems_on(descriptor.queue);

        for &subsystem in candidates {
            let Ok(cb) = self.control_block(subsystem) else {
                continue;
            };
            if let Delivery::Matched(transitions) = cb.deliver(descriptor.opcode, descriptor.status, payload) {
                self.apply_transitions(&transitions);
                cb.wake();
                return Ok(());
            }
        }

        if self.handle_card_ready(&descriptor) {
            return Ok(());
        }

        for &subsystem in candidates {
            let Ok(cb) = self.control_block(subsystem) else {
                continue;
            };
            if let Some(generation) = cb.claim_stale(descriptor.opcode) {
                log::warn!(
                    "{subsystem}: dropping late response {:#06x} of generation {generation}",
                    descriptor.opcode
                );
                return Ok(());
            }
        }

        if descriptor.queue == QueueId::Common && descriptor.opcode == opcode::SWITCH_PROTO {
            let switch = self.callbacks.lock().switch_proto.clone();
            if let Some((mode, callback)) = switch {
                callback(mode, payload.first().copied().unwrap_or(0));
                return Ok(());
            }
        }

        let callback = self.callbacks.lock().unknown_event.clone();
        match callback {
            Some(callback) => callback(&AsyncEvent {
                queue: descriptor.queue,
                opcode: descriptor.opcode,
                status: descriptor.status,
                payload: payload.to_vec(),
            }),
            None => log::debug!(
                "{}: unhandled frame {:#06x} on {:?}",
                self.config.name,
                descriptor.opcode,
                descriptor.queue
            ),
        }
        Ok(())
    }

    fn apply_transitions(&self, transitions: &Transitions) {
        for &(subsystem, state) in transitions {
            if let Ok(cb) = self.control_block(subsystem) {
                cb.set_state(state);
            }
        }
    }

    fn handle_card_ready(&self, descriptor: &FrameDescriptor) -> bool {
        const COMMON: &[Subsystem] = &[Subsystem::Common, Subsystem::Wlan];
        const BT: &[Subsystem] = &[Subsystem::BtClassic, Subsystem::Ble];
        const ZIGBEE: &[Subsystem] = &[Subsystem::Zigbee];
        const PROP_PROTOCOL: &[Subsystem] = &[Subsystem::PropProtocol];

        let (targets, state) = match (descriptor.queue, descriptor.opcode) {
            (QueueId::Common, opcode::CARD_READY) => (COMMON, SubsystemState::CardReady),
            (QueueId::Bt, opcode::BT_CARD_READY) => (BT, SubsystemState::OpermodeDone),
            (QueueId::Zigbee, opcode::ZIGBEE_CARD_READY) => (ZIGBEE, SubsystemState::OpermodeDone),
            (QueueId::PropProtocol, opcode::PROP_PROTOCOL_CARD_READY) => (PROP_PROTOCOL, SubsystemState::OpermodeDone),
            _ => return false,
        };

        if descriptor.status != 0 {
            log::error!(
                "{}: card ready on {:?} reported status {:#06x}",
                self.config.name,
                descriptor.queue,
                descriptor.status
            );
            return true;
        }
        for &subsystem in targets {
            if let Ok(cb) = self.control_block(subsystem) {
                cb.advance_to(state);
            }
        }
        true
    }

    fn report_wait_timeout(&self, subsystem: Subsystem, opcode: u16, err: &DriverError) {
        let callback = self.callbacks.lock().wait_timeout.clone();
        if let Some(callback) = callback {
            callback(subsystem, opcode, err);
        }
    }

    /// Waits until `subsystem` reaches `target`, running scheduler rounds in
    /// cooperative mode. Returns `false` on timeout.
    pub(crate) fn wait_for_state(&self, subsystem: Subsystem, target: SubsystemState, timeout: Duration) -> DriverResult<bool> {
        let cb = self.control_block(subsystem)?;
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if self.device_state() == DeviceState::None {
                return Err(DriverError::Aborted);
            }
            if cb.state() >= target {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            self.wait_on(&cb.state_sem, remaining);
        }
    }
}

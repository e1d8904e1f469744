//! Subsystem control blocks.
//!
//! Each protocol domain owns a control block holding its state, last status,
//! transmit pool and the machinery that lets exactly one command be in flight:
//!
//! - [`CommandGate`] hands out an [`InFlight`] token by flipping the busy flag
//!   from ALLOW to IN_USE. Dropping the token flips it back, so every exit
//!   path of a command releases the subsystem.
//! - The response slot records what the in-flight command expects. Response
//!   processing fills the completion and posts the command semaphore once.
//! - A command that gives up waiting leaves a stale record behind, so a late
//!   response can be recognized and dropped instead of being mistaken for an
//!   unsolicited event. The last [`STALE_RECORDS`] timed-out commands are
//!   remembered; an older record is forgotten when a newer one needs room.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU8, Ordering};

use nwp_mem::{PacketPool, PoolId};

use crate::primitives::Semaphore;
use crate::queue::Channel;
use crate::sync::Mutex;

/// Protocol domains sharing the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Subsystem {
    Common,
    Wlan,
    BtClassic,
    Ble,
    Zigbee,
    PropProtocol,
}

impl Subsystem {
    pub const ALL: [Subsystem; 6] = [
        Subsystem::Common,
        Subsystem::Wlan,
        Subsystem::BtClassic,
        Subsystem::Ble,
        Subsystem::Zigbee,
        Subsystem::PropProtocol,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Transmit channel carrying this subsystem's commands.
    pub const fn channel(self) -> Channel {
        match self {
            Subsystem::Common => Channel::Common,
            Subsystem::Wlan => Channel::Wlan,
            Subsystem::BtClassic | Subsystem::Ble => Channel::Bt,
            Subsystem::Zigbee => Channel::Zigbee,
            Subsystem::PropProtocol => Channel::PropProtocol,
        }
    }

    /// Id of the subsystem's transmit pool. Pool 0 is the rx pool.
    pub const fn pool_id(self) -> PoolId {
        PoolId(self as u8 + 1)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Subsystem::Common => "common",
            Subsystem::Wlan => "wlan",
            Subsystem::BtClassic => "bt-classic",
            Subsystem::Ble => "ble",
            Subsystem::Zigbee => "zigbee",
            Subsystem::PropProtocol => "prop-protocol",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered lifecycle of a subsystem.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubsystemState {
    None = 0,
    CardReady = 1,
    OpermodeDone = 2,
    InitDone = 3,
}

impl SubsystemState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::CardReady,
            2 => Self::OpermodeDone,
            3 => Self::InitDone,
            _ => Self::None,
        }
    }
}

/// Lifecycle of the driver as a whole.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceState {
    None = 0,
    DriverInitDone = 1,
    DeviceInitDone = 2,
}

impl DeviceState {
    pub(crate) fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::DriverInitDone,
            2 => Self::DeviceInitDone,
            _ => Self::None,
        }
    }
}

/// Timed-out commands whose late responses are still recognized.
pub const STALE_RECORDS: usize = 4;

/// State changes applied when a command succeeds.
pub type Transitions = heapless::Vec<(Subsystem, SubsystemState), 6>;

/// Busy flag plus request generation counter.
#[derive(Debug, Default)]
pub struct CommandGate {
    busy: AtomicBool,
    generation: AtomicU32,
}

impl CommandGate {
    /// Moves the flag from ALLOW to IN_USE, or returns `None` when a command
    /// is already in flight.
    pub fn try_acquire(&self) -> Option<InFlight<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        Some(InFlight { gate: self, generation })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof that a command owns its subsystem.
#[derive(Debug)]
pub struct InFlight<'g> {
    gate: &'g CommandGate,
    generation: u32,
}

impl InFlight<'_> {
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
struct Pending {
    generation: u32,
    opcode: u16,
    capacity: Option<usize>,
    transitions: Transitions,
}

/// Outcome of one command as seen by the waiting caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Completion {
    Response {
        generation: u32,
        status: u16,
        payload: Vec<u8>,
    },
    /// Payload did not fit the caller's buffer and was not kept.
    Overflow { generation: u32, status: u16, needed: usize },
    Aborted { generation: u32 },
}

impl Completion {
    fn generation(&self) -> u32 {
        match self {
            Completion::Response { generation, .. }
            | Completion::Overflow { generation, .. }
            | Completion::Aborted { generation } => *generation,
        }
    }
}

#[derive(Debug, Default)]
struct ResponseSlot {
    pending: Option<Pending>,
    completion: Option<Completion>,
    /// Generation and opcode of recently timed-out commands, oldest first.
    stale: heapless::Vec<(u32, u16), STALE_RECORDS>,
}

/// What response processing did with a frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Completed the pending command; carries the transitions to apply.
    Matched(Transitions),
    NotExpected,
}

/// Per-subsystem control block.
pub struct ControlBlock<'a> {
    subsystem: Subsystem,
    state: AtomicU8,
    status: AtomicI32,
    pub(crate) gate: CommandGate,
    slot: Mutex<ResponseSlot>,
    pub(crate) command_sem: Semaphore,
    pub(crate) state_sem: Semaphore,
    pub(crate) pool: PacketPool<'a>,
}

impl<'a> ControlBlock<'a> {
    pub(crate) fn new(subsystem: Subsystem, pool: PacketPool<'a>) -> Self {
        Self {
            subsystem,
            state: AtomicU8::new(SubsystemState::None as u8),
            status: AtomicI32::new(0),
            gate: CommandGate::default(),
            slot: Mutex::new(ResponseSlot::default()),
            command_sem: Semaphore::binary(),
            state_sem: Semaphore::binary(),
            pool,
        }
    }

    pub fn subsystem(&self) -> Subsystem {
        self.subsystem
    }

    pub fn state(&self) -> SubsystemState {
        SubsystemState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Status code of the last completed command.
    pub fn status(&self) -> i32 {
        self.status.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn pool(&self) -> &PacketPool<'a> {
        &self.pool
    }

    pub(crate) fn set_state(&self, state: SubsystemState) {
        let previous = SubsystemState::from_raw(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            log::debug!("{}: {previous:?} -> {state:?}", self.subsystem);
        }
        let _ = self.state_sem.signal();
    }

    /// Raises the state to `state` unless it is already at or beyond it.
    pub(crate) fn advance_to(&self, state: SubsystemState) {
        if self.state() < state {
            self.set_state(state);
        }
    }

    pub(crate) fn set_status(&self, status: i32) {
        self.status.store(status, Ordering::Release);
    }

    /// Records what the in-flight command waits for.
    pub(crate) fn arm(&self, token: &InFlight<'_>, opcode: u16, capacity: Option<usize>, transitions: Transitions) {
        let mut slot = self.slot.lock();
        slot.stale.retain(|&(_, stale_opcode)| stale_opcode != opcode);
        slot.completion = None;
        slot.pending = Some(Pending {
            generation: token.generation(),
            opcode,
            capacity,
            transitions,
        });
        self.command_sem.reset();
    }

    /// Hands a response frame to the pending command, if it expects `opcode`.
    ///
    /// The caller wakes the command with [`wake`](Self::wake) once the
    /// returned transitions are applied.
    pub(crate) fn deliver(&self, opcode: u16, status: u16, payload: &[u8]) -> Delivery {
        let mut slot = self.slot.lock();
        match slot.pending.take() {
            Some(pending) if pending.opcode == opcode => {
                let generation = pending.generation;
                let completion = match pending.capacity {
                    Some(capacity) if payload.len() > capacity => Completion::Overflow {
                        generation,
                        status,
                        needed: payload.len(),
                    },
                    Some(_) => Completion::Response {
                        generation,
                        status,
                        payload: payload.to_vec(),
                    },
                    None => Completion::Response {
                        generation,
                        status,
                        payload: Vec::new(),
                    },
                };
                slot.completion = Some(completion);

                if status == 0 {
                    Delivery::Matched(pending.transitions)
                } else {
                    Delivery::Matched(Transitions::new())
                }
            }
            other => {
                slot.pending = other;
                Delivery::NotExpected
            }
        }
    }

    pub(crate) fn wake(&self) {
        let _ = self.command_sem.signal();
    }

    /// Claims a frame as the late response of the oldest timed-out command
    /// with this opcode. Returns that command's generation.
    pub(crate) fn claim_stale(&self, opcode: u16) -> Option<u32> {
        let mut slot = self.slot.lock();
        let index = slot.stale.iter().position(|&(_, stale_opcode)| stale_opcode == opcode)?;
        Some(slot.stale.remove(index).0)
    }

    /// True once `token`'s command has a completion waiting.
    pub(crate) fn is_complete(&self, token: &InFlight<'_>) -> bool {
        matches!(&self.slot.lock().completion, Some(done) if done.generation() == token.generation())
    }

    /// Takes the completion of `token`'s command. When there is none the
    /// command is disarmed and remembered as stale.
    pub(crate) fn take_completion(&self, token: &InFlight<'_>) -> Option<Completion> {
        let mut slot = self.slot.lock();
        match slot.completion.take() {
            Some(done) if done.generation() == token.generation() => Some(done),
            _ => {
                if let Some(pending) = slot.pending.take() {
                    if slot.stale.is_full() {
                        let (generation, opcode) = slot.stale.remove(0);
                        log::debug!(
                            "{}: forgetting timed-out {opcode:#06x} of generation {generation}",
                            self.subsystem
                        );
                    }
                    let _ = slot.stale.push((pending.generation, pending.opcode));
                }
                None
            }
        }
    }

    /// Wakes a waiting command with an abort.
    pub(crate) fn abort(&self) {
        let mut slot = self.slot.lock();
        if let Some(pending) = slot.pending.take() {
            slot.completion = Some(Completion::Aborted {
                generation: pending.generation,
            });
            drop(slot);
            let _ = self.command_sem.signal();
        }
    }

    /// Back to power-on state. Waiters must have been aborted first.
    pub(crate) fn reset(&self) {
        *self.slot.lock() = ResponseSlot::default();
        self.state.store(SubsystemState::None as u8, Ordering::Release);
        self.status.store(0, Ordering::Release);
        let _ = self.state_sem.signal();
    }
}

impl fmt::Debug for ControlBlock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlBlock")
            .field("subsystem", &self.subsystem)
            .field("state", &self.state())
            .field("status", &self.status())
            .field("busy", &self.is_busy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(region: &mut [u8]) -> ControlBlock<'_> {
        let pool = PacketPool::new(Subsystem::Common.pool_id(), region, 32).unwrap();
        ControlBlock::new(Subsystem::Common, pool)
    }

    #[test]
    fn states_are_ordered() {
        assert!(SubsystemState::None < SubsystemState::CardReady);
        assert!(SubsystemState::CardReady < SubsystemState::OpermodeDone);
        assert!(SubsystemState::OpermodeDone < SubsystemState::InitDone);
        assert!(DeviceState::DriverInitDone < DeviceState::DeviceInitDone);
    }

    #[test]
    fn gate_admits_one_command() {
        let gate = CommandGate::default();
        let token = gate.try_acquire().unwrap();
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());
        drop(token);
        assert!(!gate.is_busy());

        let next = gate.try_acquire().unwrap();
        assert_eq!(next.generation(), 2);
    }

    #[test]
    fn response_completes_matching_command_once() {
        let mut region = [0u8; 64];
        let cb = block(&mut region);
        let token = cb.gate.try_acquire().unwrap();
        cb.arm(&token, 0x49, Some(8), Transitions::new());

        assert_eq!(cb.deliver(0x10, 0, b"x"), Delivery::NotExpected);
        assert!(matches!(cb.deliver(0x49, 0, b"1.2"), Delivery::Matched(_)));
        assert_eq!(cb.deliver(0x49, 0, b"1.2"), Delivery::NotExpected);
        assert_eq!(cb.command_sem.count(), 0);

        let done = cb.take_completion(&token).unwrap();
        assert_eq!(
            done,
            Completion::Response {
                generation: token.generation(),
                status: 0,
                payload: b"1.2".to_vec()
            }
        );
    }

    #[test]
    fn oversized_response_keeps_no_payload() {
        let mut region = [0u8; 64];
        let cb = block(&mut region);
        let token = cb.gate.try_acquire().unwrap();
        cb.arm(&token, 0x49, Some(2), Transitions::new());
        cb.deliver(0x49, 0, b"toolong");
        assert!(matches!(
            cb.take_completion(&token),
            Some(Completion::Overflow { needed: 7, .. })
        ));
    }

    #[test]
    fn timed_out_command_leaves_stale_record() {
        let mut region = [0u8; 64];
        let cb = block(&mut region);
        let token = cb.gate.try_acquire().unwrap();
        let generation = token.generation();
        cb.arm(&token, 0x92, None, Transitions::new());
        assert!(cb.take_completion(&token).is_none());
        drop(token);

        assert_eq!(cb.deliver(0x92, 0, &[]), Delivery::NotExpected);
        assert_eq!(cb.claim_stale(0x49), None);
        assert_eq!(cb.claim_stale(0x92), Some(generation));
        assert_eq!(cb.claim_stale(0x92), None);
    }

    fn time_out(cb: &ControlBlock<'_>, opcode: u16) -> u32 {
        let token = cb.gate.try_acquire().unwrap();
        cb.arm(&token, opcode, None, Transitions::new());
        assert!(cb.take_completion(&token).is_none());
        token.generation()
    }

    #[test]
    fn back_to_back_timeouts_are_all_remembered() {
        let mut region = [0u8; 64];
        let cb = block(&mut region);
        let first = time_out(&cb, 0x92);
        let second = time_out(&cb, 0x93);

        assert_eq!(cb.claim_stale(0x92), Some(first));
        assert_eq!(cb.claim_stale(0x93), Some(second));
        assert_eq!(cb.claim_stale(0x92), None);
    }

    #[test]
    fn oldest_stale_record_gives_way() {
        let mut region = [0u8; 64];
        let cb = block(&mut region);
        let generations: Vec<u32> = (0..=STALE_RECORDS as u16).map(|n| time_out(&cb, 0x100 + n)).collect();

        assert_eq!(cb.claim_stale(0x100), None);
        assert_eq!(cb.claim_stale(0x101), Some(generations[1]));
    }

    #[test]
    fn completion_is_visible_only_to_its_command() {
        let mut region = [0u8; 64];
        let cb = block(&mut region);
        let token = cb.gate.try_acquire().unwrap();
        cb.arm(&token, 0x49, None, Transitions::new());
        assert!(!cb.is_complete(&token));

        cb.wake();
        assert!(!cb.is_complete(&token));

        cb.deliver(0x49, 0, &[]);
        assert!(cb.is_complete(&token));
        assert!(cb.take_completion(&token).is_some());
    }

    #[test]
    fn failed_status_skips_transitions() {
        let mut region = [0u8; 64];
        let cb = block(&mut region);
        let token = cb.gate.try_acquire().unwrap();
        let mut transitions = Transitions::new();
        transitions.push((Subsystem::Common, SubsystemState::OpermodeDone)).unwrap();
        cb.arm(&token, 0x10, None, transitions);
        assert_eq!(cb.deliver(0x10, 0x21, &[]), Delivery::Matched(Transitions::new()));
    }

    #[test]
    fn advance_never_moves_backwards() {
        let mut region = [0u8; 64];
        let cb = block(&mut region);
        cb.advance_to(SubsystemState::OpermodeDone);
        cb.advance_to(SubsystemState::CardReady);
        assert_eq!(cb.state(), SubsystemState::OpermodeDone);
    }
}

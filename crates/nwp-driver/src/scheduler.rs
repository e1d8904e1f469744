//! Cooperative scheduler.
//!
//! One scheduler round sweeps the work sources in a fixed priority order:
//!
//! 1. transport events: pending frames are read into rx-pool packets;
//! 2. transmit queues, one packet per channel, in [`Channel::ALL`] order;
//! 3. received frames, handed to response processing.
//!
//! This is the only place where work from different channels is ordered.
//! In [`ScheduleMode::Threaded`] a dedicated thread loops in
//! [`Driver::run_scheduler`]; in [`ScheduleMode::Cooperative`] a caller that
//! waits for a response runs rounds itself through the same wait helper.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use nwp_mem::Packet;

use crate::config::ScheduleMode;
use crate::driver::Driver;
use crate::event::{tx_event, EventMap, RX_EVENT, TX_EVENTS};
use crate::primitives::Semaphore;
use crate::queue::Channel;
use crate::subsystem::DeviceState;
use crate::sync::Mutex;
use crate::transport::Transport;

/// Phase of the current scheduler round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    TransportReady,
    Processing,
}

/// Scheduler control block.
#[derive(Debug)]
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    pub(crate) events: EventMap,
    wake: Semaphore,
    running: AtomicBool,
    /// Held for the duration of one round.
    pub(crate) pump: Mutex<()>,
    rounds: AtomicU64,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SchedulerState::Idle),
            events: EventMap::new(),
            wake: Semaphore::binary(),
            running: AtomicBool::new(true),
            pump: Mutex::new(()),
            rounds: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.lock() = state;
    }

    /// Rounds that found work.
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    pub(crate) fn reset(&self) {
        self.events.clear();
        self.wake.reset();
        self.set_state(SchedulerState::Idle);
    }
}

impl<'a, T: Transport> Driver<'a, T> {
    /// Runs one scheduler round. Returns whether any work was done.
    ///
    /// Returns `false` at once when another caller is mid-round.
    pub fn schedule_once(&self) -> bool {
        let Some(_round) = self.scheduler.pump.try_lock() else {
            return false;
        };
        if self.device_state() == DeviceState::None {
            return false;
        }

        let events = self.scheduler.events.take(RX_EVENT | TX_EVENTS);
        let mut worked = false;

        if events & RX_EVENT != 0 || self.transport.lock().frame_ready() {
            self.scheduler.set_state(SchedulerState::TransportReady);
            worked |= self.pull_frames();
        }

        self.scheduler.set_state(SchedulerState::Processing);
        for channel in Channel::ALL {
            if let Some(packet) = self.tx_queue(channel).dequeue() {
                self.transmit(channel, packet);
                worked = true;
            }
            if !self.tx_queue(channel).is_empty() {
                self.scheduler.events.raise(tx_event(channel));
            }
        }

        while let Some(packet) = self.rx_queue.dequeue() {
            if let Err(err) = self.process_frame(packet.as_bytes()) {
                log::warn!("{}: dropping malformed frame: {err}", self.config.name);
            }
            self.release_packet(packet);
            worked = true;
        }

        self.scheduler.set_state(SchedulerState::Idle);
        if worked {
            self.scheduler.rounds.fetch_add(1, Ordering::Relaxed);
            log::trace!("{}: scheduler round complete", self.config.name);
        }
        worked
    }

    /// Runs rounds until no source has work left.
    pub fn run_until_idle(&self) {
        while self.schedule_once() {}
    }

    /// Scheduler loop for [`ScheduleMode::Threaded`]. Returns after
    /// [`stop_scheduler`](Self::stop_scheduler) or `deinit`.
    pub fn run_scheduler(&self) {
        log::debug!("{}: scheduler thread running", self.config.name);
        while self.scheduler.running.load(Ordering::Acquire) {
            self.run_until_idle();
            let _ = self.scheduler.wake.wait_timeout(self.config.poll_interval);
        }
        log::debug!("{}: scheduler thread stopped", self.config.name);
    }

    pub fn stop_scheduler(&self) {
        self.scheduler.running.store(false, Ordering::Release);
        let _ = self.scheduler.wake.signal();
    }

    /// "Data available" entry point for the bus interrupt.
    pub fn on_interrupt(&self) {
        self.notify(RX_EVENT);
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn notify(&self, bits: u32) {
        self.scheduler.events.raise(bits);
        let _ = self.scheduler.wake.signal();
    }

    /// Waits on `sem` for at most `timeout`, running scheduler rounds while
    /// waiting in cooperative mode.
    pub(crate) fn wait_on(&self, sem: &Semaphore, timeout: Duration) -> bool {
        match self.config.mode {
            ScheduleMode::Threaded => sem.wait_timeout(timeout).is_ok(),
            ScheduleMode::Cooperative => {
                let deadline = Instant::now() + timeout;
                loop {
                    if sem.try_wait() {
                        return true;
                    }
                    if Instant::now() >= deadline {
                        return false;
                    }
                    if !self.schedule_once() {
                        std::thread::yield_now();
                    }
                }
            }
        }
    }

    fn pull_frames(&self) -> bool {
        let mut transport = self.transport.lock();
        let mut pulled = false;
        while transport.frame_ready() {
            let Some(mut packet) = self.rx_pool.allocate() else {
                log::warn!("{}: rx pool exhausted, deferring reads", self.config.name);
                self.scheduler.events.raise(RX_EVENT);
                break;
            };
            match transport.receive_frame(packet.buffer_mut()) {
                Ok(Some(len)) => match packet.set_len(len) {
                    Ok(()) => {
                        self.rx_queue.enqueue(packet);
                        pulled = true;
                    }
                    Err(err) => {
                        log::error!("{}: transport overran rx block: {err}", self.config.name);
                        self.release_packet(packet);
                    }
                },
                Ok(None) => {
                    self.release_packet(packet);
                    break;
                }
                Err(err) => {
                    log::error!("{}: receive failed: {err}", self.config.name);
                    self.release_packet(packet);
                    break;
                }
            }
        }
        pulled
    }

    fn transmit(&self, channel: Channel, packet: Packet<'a>) {
        if let Err(err) = self.transport.lock().send_frame(packet.as_bytes()) {
            log::error!("{}: send on {channel:?} failed: {err}", self.config.name);
        }
        self.release_packet(packet);
    }
}

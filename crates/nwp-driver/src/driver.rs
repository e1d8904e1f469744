//! Driver control block and lifecycle.
//!
//! [`Driver::init`] carves the caller's buffer into the rx pool and one
//! transmit pool per enabled subsystem, in a fixed order:
//!
//! 1. length header
//! 2. rx pool
//! 3. common, WLAN, BT classic, BLE, Zigbee, proprietary protocol pools
//!
//! The driver borrows the buffer for its whole life. [`Driver::deinit`]
//! returns every resource to its power-on state without touching the
//! buffer's ownership; dropping the driver releases the borrow so the same
//! buffer can be handed to `init` again.

use core::sync::atomic::{AtomicU8, Ordering};

use nwp_mem::{Arena, MemoryPlan, PacketPool, PoolId, PoolStats};

use crate::config::DriverConfig;
use crate::error::{DriverError, DriverResult};
use crate::event::Callbacks;
use crate::queue::{Channel, PacketQueue};
use crate::scheduler::Scheduler;
use crate::subsystem::{ControlBlock, DeviceState, Subsystem, SubsystemState};
use crate::sync::{Mutex, MutexGuard};
use crate::transport::Transport;

/// Pool id of the receive pool.
pub const RX_POOL_ID: PoolId = PoolId(0);

/// The driver context. One instance per attached device.
pub struct Driver<'a, T: Transport> {
    pub(crate) config: DriverConfig,
    device_state: AtomicU8,
    pub(crate) transport: Mutex<T>,
    pub(crate) rx_pool: PacketPool<'a>,
    pub(crate) blocks: Vec<Option<ControlBlock<'a>>>,
    pub(crate) tx_queues: [PacketQueue<'a>; 5],
    pub(crate) rx_queue: PacketQueue<'a>,
    pub(crate) scheduler: Scheduler,
    pub(crate) callbacks: Mutex<Callbacks>,
    bytes_used: usize,
}

impl<'a, T: Transport> Driver<'a, T> {
    /// Requirements of `config`, in carving order.
    pub fn memory_plan(config: &DriverConfig) -> MemoryPlan {
        let mut plan = MemoryPlan::new().with("rx", config.rx_pool.region_len());
        for subsystem in Subsystem::ALL {
            if let Some(pool) = config.pool(subsystem) {
                plan.push(subsystem.name(), pool.region_len());
            }
        }
        plan
    }

    /// Bytes `init` needs for `config`, excluding alignment slack.
    pub fn memory_estimate(config: &DriverConfig) -> usize {
        Self::memory_plan(config).required_bytes()
    }

    /// Builds the driver over `buffer`.
    ///
    /// # Parameters
    /// - `buffer`: Caller memory; aligned to 4 bytes and zeroed here
    /// - `config`: Pool geometry, scheduling model and timeouts
    /// - `transport`: Bus driver used for every frame
    ///
    /// Fails with [`DriverError::BufferTooSmall`] before touching any state
    /// when the buffer cannot hold every pool.
    pub fn init(buffer: &'a mut [u8], config: DriverConfig, transport: T) -> DriverResult<Self> {
        config.validate()?;
        let plan = Self::memory_plan(&config);
        let mut arena = Arena::new(buffer)?;
        let mut regions = arena.allocate(&plan)?.into_iter();

        let rx_region = regions.next().ok_or(DriverError::InvalidParam)?;
        let rx_pool = PacketPool::new(RX_POOL_ID, rx_region.into_bytes(), config.rx_pool.block_len)?;

        let mut blocks = Vec::with_capacity(Subsystem::ALL.len());
        for subsystem in Subsystem::ALL {
            let block = match config.pool(subsystem) {
                Some(pool_config) => {
                    let region = regions.next().ok_or(DriverError::InvalidParam)?;
                    let pool = PacketPool::new(subsystem.pool_id(), region.into_bytes(), pool_config.block_len)?;
                    Some(ControlBlock::new(subsystem, pool))
                }
                None => None,
            };
            blocks.push(block);
        }

        let bytes_used = arena.used();
        log::debug!(
            "{}: driver initialised, {bytes_used} of {} bytes used, {} spare",
            config.name,
            arena.capacity(),
            arena.remaining()
        );

        Ok(Self {
            config,
            device_state: AtomicU8::new(DeviceState::DriverInitDone as u8),
            transport: Mutex::new(transport),
            rx_pool,
            blocks,
            tx_queues: Default::default(),
            rx_queue: PacketQueue::new(),
            scheduler: Scheduler::new(),
            callbacks: Mutex::new(Callbacks::default()),
            bytes_used,
        })
    }

    /// Brings the device up: unmasks transport interrupts so the firmware's
    /// card-ready frame can arrive.
    pub fn device_init(&self) -> DriverResult<()> {
        if self.device_state() != DeviceState::DriverInitDone {
            return Err(DriverError::WrongState);
        }
        self.transport.lock().unmask_interrupts();
        self.set_device_state(DeviceState::DeviceInitDone);
        self.on_interrupt();
        log::debug!("{}: device initialised", self.config.name);
        Ok(())
    }

    /// Tears the driver down to its power-on state.
    ///
    /// Masks interrupts, stops the scheduler, returns every queued packet to
    /// its pool, aborts waiting commands and resets every state to `None`.
    pub fn deinit(&self) -> DriverResult<()> {
        if self.device_state() < DeviceState::DriverInitDone {
            return Err(DriverError::WrongState);
        }
        self.transport.lock().mask_interrupts();
        self.set_device_state(DeviceState::None);
        self.stop_scheduler();

        // Wait out a scheduler round in progress.
        let round = self.scheduler.pump.lock();
        for queue in self.tx_queues.iter().chain(core::iter::once(&self.rx_queue)) {
            for packet in queue.drain() {
                self.release_packet(packet);
            }
        }
        for block in self.blocks.iter().flatten() {
            block.abort();
            block.reset();
        }
        self.scheduler.reset();
        drop(round);

        log::debug!("{}: driver deinitialised", self.config.name);
        Ok(())
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Bytes of the caller buffer in use, header included.
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub fn device_state(&self) -> DeviceState {
        DeviceState::from_raw(self.device_state.load(Ordering::Acquire))
    }

    fn set_device_state(&self, state: DeviceState) {
        self.device_state.store(state as u8, Ordering::Release);
    }

    /// Control block of `subsystem`.
    pub fn control_block(&self, subsystem: Subsystem) -> DriverResult<&ControlBlock<'a>> {
        self.blocks
            .get(subsystem.index())
            .and_then(Option::as_ref)
            .ok_or(DriverError::SubsystemDisabled(subsystem))
    }

    /// State of `subsystem`, `None` when it is disabled.
    pub fn subsystem_state(&self, subsystem: Subsystem) -> Option<SubsystemState> {
        self.control_block(subsystem).ok().map(ControlBlock::state)
    }

    pub fn pool_stats(&self, subsystem: Subsystem) -> DriverResult<PoolStats> {
        Ok(self.control_block(subsystem)?.pool().stats())
    }

    pub fn rx_pool_stats(&self) -> PoolStats {
        self.rx_pool.stats()
    }

    /// Locks the transport, e.g. to inspect a test double.
    pub fn transport(&self) -> MutexGuard<'_, T> {
        self.transport.lock()
    }

    pub(crate) fn tx_queue(&self, channel: Channel) -> &PacketQueue<'a> {
        &self.tx_queues[channel.index()]
    }

    pub(crate) fn pool_by_id(&self, id: PoolId) -> Option<&PacketPool<'a>> {
        if id == RX_POOL_ID {
            return Some(&self.rx_pool);
        }
        self.blocks
            .iter()
            .flatten()
            .map(ControlBlock::pool)
            .find(|pool| pool.id() == id)
    }

    /// Gives a packet back to the pool it came from.
    pub(crate) fn release_packet(&self, packet: nwp_mem::Packet<'a>) {
        let id = packet.pool_id();
        match self.pool_by_id(id).map(|pool| pool.free(packet)) {
            Some(Ok(())) => {}
            Some(Err(_)) | None => log::error!("{}: no pool accepts packets of {id}", self.config.name),
        }
    }

    /// Registers the handler for unsolicited frames.
    pub fn register_unknown_event_callback<F>(&self, callback: F)
    where
        F: Fn(&crate::event::AsyncEvent) + Send + Sync + 'static,
    {
        self.callbacks.lock().unknown_event = Some(crate::sync::Arc::new(callback));
    }

    /// Registers the handler invoked when a command stops waiting.
    pub fn register_wait_timeout_callback<F>(&self, callback: F)
    where
        F: Fn(Subsystem, u16, &DriverError) + Send + Sync + 'static,
    {
        self.callbacks.lock().wait_timeout = Some(crate::sync::Arc::new(callback));
    }
}

impl<T: Transport> core::fmt::Debug for Driver<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.config.name)
            .field("device_state", &self.device_state())
            .field("bytes_used", &self.bytes_used)
            .field("blocks", &self.blocks)
            .finish()
    }
}

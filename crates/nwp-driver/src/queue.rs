//! Packet queues.
//!
//! Each transmit channel has its own FIFO, and received frames wait in a
//! single rx queue until the scheduler processes them. A queue's lock is held
//! only for the push or pop itself.

use std::collections::VecDeque;

use nwp_mem::Packet;

use crate::frame::QueueId;
use crate::sync::Mutex;

/// Transmit channels in scheduler priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Common,
    Wlan,
    Bt,
    Zigbee,
    PropProtocol,
}

impl Channel {
    /// Sweep order of the scheduler.
    pub const ALL: [Channel; 5] = [
        Channel::Common,
        Channel::Wlan,
        Channel::Bt,
        Channel::Zigbee,
        Channel::PropProtocol,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn queue_id(self) -> QueueId {
        match self {
            Channel::Common => QueueId::Common,
            Channel::Wlan => QueueId::Wlan,
            Channel::Bt => QueueId::Bt,
            Channel::Zigbee => QueueId::Zigbee,
            Channel::PropProtocol => QueueId::PropProtocol,
        }
    }
}

/// FIFO of packets.
pub struct PacketQueue<'a> {
    packets: Mutex<VecDeque<Packet<'a>>>,
}

impl<'a> PacketQueue<'a> {
    pub fn new() -> Self {
        Self {
            packets: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a packet at the tail.
    pub fn enqueue(&self, packet: Packet<'a>) {
        self.packets.lock().push_back(packet);
    }

    /// Removes the packet at the head.
    pub fn dequeue(&self) -> Option<Packet<'a>> {
        self.packets.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }

    /// Empties the queue, returning its packets in FIFO order.
    pub fn drain(&self) -> Vec<Packet<'a>> {
        self.packets.lock().drain(..).collect()
    }
}

impl Default for PacketQueue<'_> {
    fn default() -> Self {
        Self::new()
    }
}

//! # NWP memory management
//!
//! Deterministic memory for the NWP host driver. A single caller-supplied
//! buffer is carved once at start-up ([`arena`]) into fixed-size packet pools
//! ([`pool`]). Nothing here grows after construction.

use thiserror::Error;

pub mod arena;
pub mod pool;

pub use arena::{align_up, Arena, MemoryPlan, Region, Requirement, ALIGN, HEADER_LEN};
pub use pool::{Packet, PacketPool};

/// Identifies the pool a packet was carved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub u8);

impl core::fmt::Display for PoolId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// Errors raised while carving memory or handling packets.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    #[error("block size must be non-zero")]
    InvalidBlockSize,
    #[error("buffer too small: {required} bytes required, {available} available")]
    BufferTooSmall { required: usize, available: usize },
    #[error("payload too large: {len} bytes for a {capacity}-byte block")]
    PayloadTooLarge { len: usize, capacity: usize },
}

/// Pool statistics for debugging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of blocks in the pool
    pub total_blocks: usize,
    /// Number of free blocks currently available
    pub free_blocks: usize,
    /// Number of blocks currently in use
    pub used_blocks: usize,
    /// Minimum number of free blocks ever reached
    pub min_free_blocks: usize,
    /// Allocation attempts that found the pool empty
    pub failed_allocs: usize,
}

impl PoolStats {
    pub const fn new(total_blocks: usize) -> Self {
        Self {
            total_blocks,
            free_blocks: total_blocks,
            used_blocks: 0,
            min_free_blocks: total_blocks,
            failed_allocs: 0,
        }
    }

    pub fn on_alloc(&mut self) {
        self.used_blocks += 1;
        self.free_blocks -= 1;
        if self.free_blocks < self.min_free_blocks {
            self.min_free_blocks = self.free_blocks;
        }
    }

    pub fn on_alloc_failed(&mut self) {
        self.failed_allocs += 1;
    }

    pub fn on_dealloc(&mut self) {
        if self.used_blocks > 0 {
            self.used_blocks -= 1;
            self.free_blocks += 1;
        }
    }

    /// True when every block is handed out.
    pub const fn is_exhausted(&self) -> bool {
        self.free_blocks == 0
    }

    /// True when no block is handed out.
    pub const fn is_idle(&self) -> bool {
        self.used_blocks == 0
    }

    /// Utilization as a percentage (0-100).
    pub fn utilization(&self) -> u8 {
        if self.total_blocks == 0 {
            0
        } else {
            ((self.used_blocks * 100) / self.total_blocks) as u8
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_track_watermark() {
        let mut stats = PoolStats::new(4);
        stats.on_alloc();
        stats.on_alloc();
        stats.on_dealloc();
        assert_eq!(stats.free_blocks, 3);
        assert_eq!(stats.used_blocks, 1);
        assert_eq!(stats.min_free_blocks, 2);
        assert_eq!(stats.utilization(), 25);
    }

    #[test]
    fn dealloc_on_idle_pool_is_ignored() {
        let mut stats = PoolStats::new(2);
        stats.on_dealloc();
        assert!(stats.is_idle());
        assert_eq!(stats.free_blocks, 2);
    }
}

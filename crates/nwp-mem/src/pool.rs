//! Fixed-block packet pools.
//!
//! A pool slices one region into equally sized blocks and keeps the free ones
//! on a stack. Allocation never blocks: an empty pool simply yields `None`.
//! Every mutation happens inside `critical_section::with`, so a pool may be
//! shared between thread context and an interrupt handler.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::{MemError, PoolId, PoolStats};

/// A block handed out by a [`PacketPool`].
///
/// The packet owns its block until it is given back with
/// [`PacketPool::free`], which consumes it.
#[derive(Debug)]
pub struct Packet<'a> {
    block: &'a mut [u8],
    len: usize,
    pool: PoolId,
}

impl<'a> Packet<'a> {
    /// Pool this packet must be returned to.
    pub fn pool_id(&self) -> PoolId {
        self.pool
    }

    /// Size of the underlying block.
    pub fn capacity(&self) -> usize {
        self.block.len()
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Marks the first `len` bytes of the block as valid.
    pub fn set_len(&mut self, len: usize) -> Result<(), MemError> {
        if len > self.block.len() {
            return Err(MemError::PayloadTooLarge {
                len,
                capacity: self.block.len(),
            });
        }
        self.len = len;
        Ok(())
    }

    /// Replaces the packet contents with `data`.
    pub fn fill(&mut self, data: &[u8]) -> Result<(), MemError> {
        self.set_len(data.len())?;
        self.block[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Valid bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.block[..self.len]
    }

    /// The whole block, for writers that set the length afterwards.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.block
    }

    /// Start address of the block.
    pub fn as_ptr(&self) -> *const u8 {
        self.block.as_ptr()
    }
}

struct PoolInner<'a> {
    free: Vec<&'a mut [u8]>,
    stats: PoolStats,
}

/// Fixed-size block allocator over a borrowed region.
pub struct PacketPool<'a> {
    id: PoolId,
    block_size: usize,
    inner: Mutex<RefCell<PoolInner<'a>>>,
}

impl<'a> PacketPool<'a> {
    /// Partitions `region` into `region.len() / block_size` blocks.
    ///
    /// # Parameters
    /// - `id`: Tag stamped on every packet from this pool
    /// - `region`: Backing memory, borrowed for the pool's lifetime
    /// - `block_size`: Size of each block in bytes
    pub fn new(id: PoolId, region: &'a mut [u8], block_size: usize) -> Result<Self, MemError> {
        if block_size == 0 {
            return Err(MemError::InvalidBlockSize);
        }
        let available = region.len();
        let mut free: Vec<&'a mut [u8]> = region.chunks_exact_mut(block_size).collect();
        if free.is_empty() {
            return Err(MemError::BufferTooSmall {
                required: block_size,
                available,
            });
        }
        // Lowest address is handed out first.
        free.reverse();
        let stats = PoolStats::new(free.len());
        log::trace!("{id}: {} blocks of {block_size} bytes", free.len());

        Ok(Self {
            id,
            block_size,
            inner: Mutex::new(RefCell::new(PoolInner { free, stats })),
        })
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of blocks.
    pub fn capacity(&self) -> usize {
        self.stats().total_blocks
    }

    /// Number of free blocks.
    pub fn available(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow(cs).borrow().free.len())
    }

    /// Takes a block off the free list, or `None` when the pool is exhausted.
    pub fn allocate(&self) -> Option<Packet<'a>> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow(cs).borrow_mut();
            match inner.free.pop() {
                Some(block) => {
                    inner.stats.on_alloc();
                    Some(Packet {
                        block,
                        len: 0,
                        pool: self.id,
                    })
                }
                None => {
                    inner.stats.on_alloc_failed();
                    None
                }
            }
        })
    }

    /// Returns a packet's block to the free list.
    ///
    /// A packet from another pool is handed back untouched in `Err`.
    pub fn free(&self, packet: Packet<'a>) -> Result<(), Packet<'a>> {
        if packet.pool != self.id {
            return Err(packet);
        }
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow(cs).borrow_mut();
            inner.free.push(packet.block);
            inner.stats.on_dealloc();
        });
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        critical_section::with(|cs| self.inner.borrow(cs).borrow().stats)
    }
}

impl core::fmt::Debug for PacketPool<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PacketPool")
            .field("id", &self.id)
            .field("block_size", &self.block_size)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_region_into_whole_blocks() {
        let mut region = [0u8; 100];
        let pool = PacketPool::new(PoolId(1), &mut region, 32).unwrap();
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn rejects_zero_block_size() {
        let mut region = [0u8; 16];
        assert_eq!(
            PacketPool::new(PoolId(1), &mut region, 0).err(),
            Some(MemError::InvalidBlockSize)
        );
    }

    #[test]
    fn rejects_region_smaller_than_one_block() {
        let mut region = [0u8; 16];
        let err = PacketPool::new(PoolId(1), &mut region, 32).err();
        assert_eq!(
            err,
            Some(MemError::BufferTooSmall {
                required: 32,
                available: 16
            })
        );
    }

    #[test]
    fn exhausted_pool_counts_failure() {
        let mut region = [0u8; 8];
        let pool = PacketPool::new(PoolId(3), &mut region, 8).unwrap();
        let held = pool.allocate().unwrap();
        assert!(pool.allocate().is_none());
        assert_eq!(pool.stats().failed_allocs, 1);
        pool.free(held).unwrap();
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn foreign_packet_is_handed_back() {
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        let pool_a = PacketPool::new(PoolId(1), &mut a, 16).unwrap();
        let pool_b = PacketPool::new(PoolId(2), &mut b, 16).unwrap();

        let packet = pool_a.allocate().unwrap();
        let packet = pool_b.free(packet).unwrap_err();
        assert_eq!(pool_b.available(), 1);
        pool_a.free(packet).unwrap();
        assert_eq!(pool_a.available(), 1);
    }

    #[test]
    fn fill_respects_block_capacity() {
        let mut region = [0u8; 8];
        let pool = PacketPool::new(PoolId(1), &mut region, 8).unwrap();
        let mut packet = pool.allocate().unwrap();
        packet.fill(&[1, 2, 3]).unwrap();
        assert_eq!(packet.as_bytes(), &[1, 2, 3]);
        assert_eq!(
            packet.fill(&[0; 9]),
            Err(MemError::PayloadTooLarge {
                len: 9,
                capacity: 8
            })
        );
        pool.free(packet).unwrap();
    }
}

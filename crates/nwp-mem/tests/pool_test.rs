//! Pool behaviour across longer allocate/free sequences.

use nwp_mem::{Arena, MemoryPlan, Packet, PacketPool, PoolId};

#[test]
fn two_block_pool_scenario() {
    let mut region = [0u8; 128];
    let pool = PacketPool::new(PoolId(1), &mut region, 64).unwrap();

    let first = pool.allocate().expect("first block");
    let second = pool.allocate().expect("second block");
    assert_ne!(first.as_ptr(), second.as_ptr());
    let distance = (second.as_ptr() as isize - first.as_ptr() as isize).unsigned_abs();
    assert!(distance >= 64);

    assert!(pool.allocate().is_none());
    assert!(pool.stats().is_exhausted());

    let first_addr = first.as_ptr();
    pool.free(first).unwrap();
    assert!(!pool.stats().is_exhausted());
    let again = pool.allocate().expect("freed block is reusable");
    assert_eq!(again.as_ptr(), first_addr);

    pool.free(again).unwrap();
    pool.free(second).unwrap();
    assert_eq!(pool.available(), 2);
}

#[test]
fn free_count_tracks_outstanding_blocks() {
    const BLOCKS: usize = 6;
    let mut region = [0u8; BLOCKS * 32];
    let pool = PacketPool::new(PoolId(2), &mut region, 32).unwrap();

    let mut held: Vec<Packet<'_>> = Vec::new();
    let mut seed: u32 = 0x1234_5678;
    for _ in 0..500 {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let allocate = (seed >> 16) & 1 == 0;
        if allocate {
            match pool.allocate() {
                Some(packet) => held.push(packet),
                None => assert_eq!(held.len(), BLOCKS),
            }
        } else if !held.is_empty() {
            let index = (seed as usize >> 8) % held.len();
            pool.free(held.swap_remove(index)).unwrap();
        }

        assert!(held.len() <= BLOCKS);
        assert_eq!(pool.available(), BLOCKS - held.len());
        let stats = pool.stats();
        assert_eq!(stats.used_blocks, held.len());
        assert_eq!(stats.free_blocks + stats.used_blocks, BLOCKS);
    }

    for packet in held.drain(..) {
        pool.free(packet).unwrap();
    }
    assert!(pool.stats().is_idle());
}

#[test]
fn pools_carved_from_one_buffer_do_not_overlap() {
    let mut buffer = vec![0u8; 512];
    let mut arena = Arena::new(&mut buffer).unwrap();
    let plan = MemoryPlan::new().with("rx", 4 * 32).with("tx", 2 * 64);
    let mut regions = arena.allocate(&plan).unwrap().into_iter();

    let rx = PacketPool::new(PoolId(0), regions.next().unwrap().into_bytes(), 32).unwrap();
    let tx = PacketPool::new(PoolId(1), regions.next().unwrap().into_bytes(), 64).unwrap();

    let mut spans = Vec::new();
    let mut held_rx = Vec::new();
    let mut held_tx = Vec::new();
    while let Some(packet) = rx.allocate() {
        spans.push((packet.as_ptr() as usize, packet.capacity()));
        held_rx.push(packet);
    }
    while let Some(packet) = tx.allocate() {
        spans.push((packet.as_ptr() as usize, packet.capacity()));
        held_tx.push(packet);
    }
    assert_eq!(spans.len(), 6);

    spans.sort();
    for pair in spans.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0);
    }

    for packet in held_rx {
        rx.free(packet).unwrap();
    }
    for packet in held_tx {
        tx.free(packet).unwrap();
    }
}

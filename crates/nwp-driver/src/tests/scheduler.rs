use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{capture_logs, logged, queue_frame, ready_driver};
use crate::error::DriverError;
use crate::frame::{encode_frame, QueueId};
use crate::scheduler::SchedulerState;
use crate::sim::SimTransport;
use crate::subsystem::Subsystem;

fn sent_since(sim: &SimTransport, mark: usize) -> Vec<u16> {
    sim.sent_opcodes().split_off(mark)
}

fn count_unknown(driver: &crate::driver::Driver<'_, SimTransport>) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    driver.register_unknown_event_callback(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    count
}

#[test]
fn common_channel_is_served_before_wlan() {
    let mut memory = vec![0u8; 4096];
    let sim = SimTransport::new();
    let driver = ready_driver(&mut memory, &sim);
    driver.run_until_idle();
    let mark = sim.sent().len();

    queue_frame(&driver, Subsystem::Wlan, 0x0011);
    queue_frame(&driver, Subsystem::Ble, 0x0033);
    queue_frame(&driver, Subsystem::Common, 0x0022);
    assert!(driver.schedule_once());

    assert_eq!(sent_since(&sim, mark), vec![0x0022, 0x0011, 0x0033]);
}

#[test]
fn each_round_sends_at_most_one_packet_per_channel() {
    let mut memory = vec![0u8; 4096];
    let sim = SimTransport::new();
    let driver = ready_driver(&mut memory, &sim);
    driver.run_until_idle();
    let mark = sim.sent().len();

    queue_frame(&driver, Subsystem::Wlan, 0x0011);
    queue_frame(&driver, Subsystem::Wlan, 0x0012);
    queue_frame(&driver, Subsystem::Common, 0x0022);

    assert!(driver.schedule_once());
    assert_eq!(sent_since(&sim, mark), vec![0x0022, 0x0011]);

    assert!(driver.schedule_once());
    assert_eq!(sent_since(&sim, mark), vec![0x0022, 0x0011, 0x0012]);
    assert_eq!(driver.pool_stats(Subsystem::Wlan).unwrap().free_blocks, 2);
}

#[test]
fn idle_round_reports_no_work() {
    let mut memory = vec![0u8; 4096];
    let sim = SimTransport::new();
    let driver = ready_driver(&mut memory, &sim);

    driver.run_until_idle();
    let rounds = driver.scheduler().rounds();
    assert!(rounds > 0);

    assert!(!driver.schedule_once());
    assert_eq!(driver.scheduler_state(), SchedulerState::Idle);
    assert_eq!(driver.scheduler().rounds(), rounds);
}

#[test]
fn exhausted_rx_pool_defers_reads() {
    capture_logs();
    let mut memory = vec![0u8; 4096];
    let sim = SimTransport::new();
    let driver = ready_driver(&mut memory, &sim);
    driver.run_until_idle();
    let unknown = count_unknown(&driver);

    for n in 0..6u16 {
        sim.inject(QueueId::Wlan, 0x0100 + n, 0, &[n as u8; 8]);
    }
    driver.on_interrupt();

    assert!(driver.schedule_once());
    assert_eq!(unknown.load(Ordering::SeqCst), 4);
    assert_eq!(sim.pending_frames(), 2);
    assert!(logged("rx pool exhausted"));

    driver.run_until_idle();
    assert_eq!(unknown.load(Ordering::SeqCst), 6);
    assert_eq!(driver.rx_pool_stats().free_blocks, 4);
}

#[test]
fn malformed_frames_are_dropped() {
    let mut memory = vec![0u8; 4096];
    let sim = SimTransport::new();
    let driver = ready_driver(&mut memory, &sim);
    driver.run_until_idle();
    let unknown = count_unknown(&driver);

    sim.inject_raw(vec![0u8; 8]);
    let mut bad_queue = encode_frame(QueueId::Wlan, 0x0042, 0, &[]).unwrap();
    bad_queue[1] = 0xf0;
    sim.inject_raw(bad_queue);
    sim.inject(QueueId::Wlan, 0x0043, 0, &[]);
    driver.run_until_idle();

    assert_eq!(unknown.load(Ordering::SeqCst), 1);
    assert_eq!(driver.rx_pool_stats().free_blocks, 4);
    assert_eq!(sim.pending_frames(), 0);
}

#[test]
fn failed_send_surfaces_as_timeout() {
    let mut memory = vec![0u8; 4096];
    let sim = SimTransport::new();
    let driver = ready_driver(&mut memory, &sim);
    let mark = sim.sent().len();

    sim.fail_sends(1);
    assert_eq!(driver.assert_firmware(), Err(DriverError::ResponseTimeout));
    assert_eq!(sim.sent().len(), mark);
    assert_eq!(driver.pool_stats(Subsystem::Common).unwrap().free_blocks, 2);

    assert!(driver.assert_firmware().is_ok());
}

//! Integration tests for the threaded scheduling model: a dedicated thread
//! runs the scheduler while callers block on their commands.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nwp_driver::frame::opcode;
use nwp_driver::{
    Command, CoexMode, DeviceState, Driver, DriverConfig, DriverError, QueueId, Reply, ScheduleMode, SimTransport,
    Subsystem, SubsystemState, Timeouts,
};

fn threaded_config(timeout: Duration) -> DriverConfig {
    DriverConfig::builder()
        .name("threaded")
        .mode(ScheduleMode::Threaded)
        .timeouts(Timeouts::uniform(timeout))
        .poll_interval(Duration::from_millis(2))
        .build()
}

#[test]
fn commands_complete_with_scheduler_thread() {
    let mut memory = vec![0u8; 32 * 1024];
    let sim = SimTransport::new();
    let driver = Driver::init(&mut memory, threaded_config(Duration::from_secs(2)), sim.clone()).unwrap();

    thread::scope(|s| {
        s.spawn(|| driver.run_scheduler());

        driver.device_init().unwrap();
        driver.wireless_init(0, CoexMode::WLAN_BLE).unwrap();

        let mut version = [0u8; 32];
        let len = driver.get_fw_version(&mut version).unwrap();
        assert_eq!(&version[..len], b"1610.2.4.0.0.36");

        driver.stop_scheduler();
    });

    assert_eq!(driver.subsystem_state(Subsystem::Wlan), Some(SubsystemState::OpermodeDone));
}

#[test]
fn subsystems_run_commands_concurrently() {
    let mut memory = vec![0u8; 32 * 1024];
    let sim = SimTransport::new();
    let driver = Driver::init(&mut memory, threaded_config(Duration::from_secs(2)), sim.clone()).unwrap();

    thread::scope(|s| {
        s.spawn(|| driver.run_scheduler());
        driver.device_init().unwrap();
        driver.wireless_init(0, CoexMode::WLAN_BLE).unwrap();

        let workers: Vec<_> = [Subsystem::Common, Subsystem::Wlan, Subsystem::Ble]
            .into_iter()
            .map(|subsystem| {
                let driver = &driver;
                s.spawn(move || {
                    for n in 0..20u16 {
                        let payload = n.to_le_bytes();
                        let result = match subsystem {
                            Subsystem::Common => driver.assert_firmware().map(|_| 0),
                            other => driver.execute(other, Command::new(0x0300 + n, &payload)),
                        };
                        assert_eq!(result, Ok(0), "{subsystem} command {n}");
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        driver.stop_scheduler();
    });

    let sent = sim.sent_opcodes();
    assert_eq!(sent.iter().filter(|op| **op == opcode::ASSERT).count(), 20);
    assert_eq!(sent.len(), 1 + 60);
    for subsystem in [Subsystem::Common, Subsystem::Wlan, Subsystem::Ble] {
        assert!(!driver.control_block(subsystem).unwrap().is_busy());
        assert_eq!(driver.pool_stats(subsystem).unwrap().free_blocks, 2);
    }
}

#[test]
fn wireless_init_returns_after_delayed_bluetooth_card_ready() {
    let mut memory = vec![0u8; 32 * 1024];
    let sim = SimTransport::new();
    let driver = Driver::init(&mut memory, threaded_config(Duration::from_secs(2)), sim.clone()).unwrap();
    sim.hold_protocol_ready();

    thread::scope(|s| {
        s.spawn(|| driver.run_scheduler());
        driver.device_init().unwrap();

        let device = sim.clone();
        s.spawn(move || {
            while !device.sent_opcodes().contains(&opcode::OPERMODE) {
                thread::sleep(Duration::from_millis(1));
            }
            thread::sleep(Duration::from_millis(50));
            device.release_protocol_ready();
        });

        driver.wireless_init(0, CoexMode::WLAN_BLE).unwrap();
        assert_eq!(driver.subsystem_state(Subsystem::Ble), Some(SubsystemState::OpermodeDone));
        assert_eq!(driver.subsystem_state(Subsystem::BtClassic), Some(SubsystemState::OpermodeDone));
        assert_eq!(driver.execute(Subsystem::Ble, Command::new(0x0340, &[])), Ok(0));

        driver.stop_scheduler();
    });
}

#[test]
fn timed_out_command_waits_its_full_timeout() {
    let mut memory = vec![0u8; 32 * 1024];
    let sim = SimTransport::new();
    let driver = Driver::init(&mut memory, threaded_config(Duration::from_secs(2)), sim.clone()).unwrap();
    sim.set_reply(0x0351, Reply::Silent);

    let unknown = Arc::new(AtomicUsize::new(0));
    {
        let unknown = Arc::clone(&unknown);
        driver.register_unknown_event_callback(move |_| {
            unknown.fetch_add(1, Ordering::SeqCst);
        });
    }

    thread::scope(|s| {
        s.spawn(|| driver.run_scheduler());
        driver.device_init().unwrap();
        driver.wireless_init(0, CoexMode::WLAN_ONLY).unwrap();

        let timeout = Duration::from_millis(200);
        let started = Instant::now();
        let result = driver.execute(Subsystem::Wlan, Command::new(0x0351, &[]).timeout(timeout));
        let waited = started.elapsed();
        assert_eq!(result, Err(DriverError::ResponseTimeout));
        assert!(waited >= timeout, "returned after {waited:?}");
        assert!(!driver.control_block(Subsystem::Wlan).unwrap().is_busy());

        // The late response is dropped and the next command is unaffected.
        sim.inject(QueueId::Wlan, 0x0351, 0, &[]);
        assert_eq!(driver.execute(Subsystem::Wlan, Command::new(0x0352, &[])), Ok(0));

        driver.stop_scheduler();
    });

    assert_eq!(unknown.load(Ordering::SeqCst), 0);
}

#[test]
fn deinit_aborts_a_waiting_command() {
    let mut memory = vec![0u8; 32 * 1024];
    let sim = SimTransport::new();
    let driver = Driver::init(&mut memory, threaded_config(Duration::from_secs(5)), sim.clone()).unwrap();
    sim.set_reply(opcode::ASSERT, Reply::Silent);

    thread::scope(|s| {
        s.spawn(|| driver.run_scheduler());
        driver.device_init().unwrap();
        driver.wireless_init(0, CoexMode::WLAN_ONLY).unwrap();

        let waiter = s.spawn(|| {
            let started = Instant::now();
            (driver.assert_firmware(), started.elapsed())
        });

        while !sim.sent_opcodes().contains(&opcode::ASSERT) {
            thread::sleep(Duration::from_millis(1));
        }
        driver.deinit().unwrap();

        let (result, waited) = waiter.join().unwrap();
        assert_eq!(result, Err(DriverError::Aborted));
        assert!(waited < Duration::from_secs(5));
    });

    assert_eq!(driver.device_state(), DeviceState::None);
    assert!(sim.is_masked());
}

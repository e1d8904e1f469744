use std::time::Duration;

use once_cell::sync::Lazy;

use crate::config::{DriverConfig, PoolConfig, Timeouts};
use crate::driver::Driver;
use crate::frame::encode_frame;
use crate::sim::SimTransport;
use crate::subsystem::Subsystem;
use crate::sync::Mutex;
use crate::CoexMode;

mod scheduler;

/// Records every log line so tests can look for specific messages.
struct CaptureLogger {
    lines: Mutex<Vec<String>>,
}

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        self.lines.lock().push(format!("{} {}", record.level(), record.args()));
    }

    fn flush(&self) {}
}

static LOGGER: Lazy<CaptureLogger> = Lazy::new(|| CaptureLogger {
    lines: Mutex::new(Vec::new()),
});

fn capture_logs() {
    if log::set_logger(&*LOGGER).is_ok() {
        log::set_max_level(log::LevelFilter::Trace);
    }
}

fn logged(fragment: &str) -> bool {
    LOGGER.lines.lock().iter().any(|line| line.contains(fragment))
}

fn small_config() -> DriverConfig {
    DriverConfig::builder()
        .name("test")
        .only(&[Subsystem::Wlan, Subsystem::Ble])
        .rx_pool(PoolConfig::new(4, 128))
        .pool(Subsystem::Common, PoolConfig::new(2, 64))
        .pool(Subsystem::Wlan, PoolConfig::new(2, 64))
        .pool(Subsystem::Ble, PoolConfig::new(2, 64))
        .timeouts(Timeouts::uniform(Duration::from_millis(200)))
        .build()
}

/// Driver with the device up and opermode done.
fn ready_driver<'a>(memory: &'a mut [u8], sim: &SimTransport) -> Driver<'a, SimTransport> {
    let driver = Driver::init(memory, small_config(), sim.clone()).unwrap();
    driver.device_init().unwrap();
    driver.wireless_init(0, CoexMode::WLAN_BLE).unwrap();
    driver
}

/// Puts a raw frame on `subsystem`'s channel without waiting for a reply.
fn queue_frame(driver: &Driver<'_, SimTransport>, subsystem: Subsystem, opcode: u16) {
    let pool = driver.control_block(subsystem).unwrap().pool();
    let mut packet = pool.allocate().unwrap();
    let frame = encode_frame(subsystem.channel().queue_id(), opcode, 0, &[]).unwrap();
    packet.fill(&frame).unwrap();
    driver.tx_queue(subsystem.channel()).enqueue(packet);
}

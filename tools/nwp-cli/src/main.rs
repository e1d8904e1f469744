use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use clap::{Parser, Subcommand};
use nwp_driver::{
    Antenna, CoexMode, Driver, DriverConfig, RtcTime, ScheduleMode, SimTransport, Subsystem, DRIVER_VERSION,
};

mod logger;
mod report;

use report::{hex_dump, Report};

/// Extra bytes so the driver can align the start of a heap buffer.
const ALIGN_SLACK: usize = 4;

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive the NWP host driver against a simulated device")]
struct Opts {
    /// Driver configuration as JSON.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run the scheduler on its own thread.
    #[arg(long)]
    threaded: bool,

    /// Coexistence mode sent with the operating mode.
    #[arg(long, default_value_t = 0, value_parser = parse_u16)]
    coex: u16,

    /// Print one JSON object per result.
    #[arg(long)]
    json: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Driver and firmware versions.
    Version,
    /// Memory plan and pool occupancy.
    Memory,
    #[command(flatten)]
    Device(DeviceCmd),
}

/// Commands that need the operating mode set.
#[derive(Subcommand, Debug)]
enum DeviceCmd {
    /// Read device RAM.
    RamDump {
        #[arg(long, value_parser = parse_u32)]
        addr: u32,
        #[arg(long, default_value_t = 64)]
        len: usize,
    },
    /// Read or drive a GPIO pin.
    Gpio {
        #[command(subcommand)]
        op: GpioCmd,
    },
    /// Read the device RTC, optionally setting it first.
    Rtc {
        /// "YYYY-MM-DD HH:MM:SS", or "now".
        #[arg(long)]
        set: Option<String>,
    },
    /// Select the antenna path.
    Antenna {
        #[arg(long)]
        external: bool,
        #[arg(long, default_value_t = 0)]
        gain_2g: u8,
        #[arg(long, default_value_t = 0)]
        gain_5g: u8,
    },
}

#[derive(Subcommand, Debug)]
enum GpioCmd {
    Read { pin: u8 },
    Write { pin: u8, level: u8 },
}

fn parse_u32(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|err| format!("invalid number {text:?}: {err}"))
}

fn parse_u16(text: &str) -> Result<u16, String> {
    let value = parse_u32(text)?;
    u16::try_from(value).map_err(|_| format!("{text} does not fit in 16 bits"))
}

fn load_config(path: Option<&Path>) -> Result<DriverConfig> {
    let Some(path) = path else {
        return Ok(DriverConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn rtc_time(text: &str) -> Result<RtcTime> {
    let when = if text == "now" {
        Local::now().naive_local()
    } else {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
            .with_context(|| format!("invalid time {text:?}"))?
    };
    Ok(RtcTime {
        second: when.second(),
        minute: when.minute(),
        hour: when.hour(),
        day: when.day(),
        month: when.month(),
        year: u32::try_from(when.year()).context("year before 0")?,
        weekday: when.weekday().num_days_from_sunday(),
    })
}

fn rtc_string(time: &RtcTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        time.year, time.month, time.day, time.hour, time.minute, time.second
    )
}

fn memory_report(driver: &Driver<'_, SimTransport>) -> Report {
    let mut report = Report::new("memory").field("bytes used", driver.bytes_used());
    let rx = driver.rx_pool_stats();
    report = report.field("rx", format!("{}/{} free", rx.free_blocks, rx.total_blocks));
    for subsystem in Subsystem::ALL {
        if let Ok(stats) = driver.pool_stats(subsystem) {
            let mut line = format!("{}/{} free, min {}", stats.free_blocks, stats.total_blocks, stats.min_free_blocks);
            if stats.is_exhausted() {
                line.push_str(", exhausted");
            }
            report = report.field(subsystem.name(), line);
        }
    }
    report
}

fn run(driver: &Driver<'_, SimTransport>, opts: &Opts) -> Result<Report> {
    match &opts.command {
        Cmd::Memory => Ok(memory_report(driver)),
        Cmd::Version => {
            driver.device_init().context("device init")?;
            let mut version = [0u8; 64];
            let len = driver.get_fw_version(&mut version).context("firmware version")?;
            Ok(Report::new("version")
                .field("driver", DRIVER_VERSION)
                .field("firmware", String::from_utf8_lossy(&version[..len]).into_owned()))
        }
        Cmd::Device(command) => {
            driver.device_init().context("device init")?;
            driver
                .wireless_init(0, CoexMode(opts.coex))
                .context("operating mode")?;
            run_device(driver, command)
        }
    }
}

fn run_device(driver: &Driver<'_, SimTransport>, command: &DeviceCmd) -> Result<Report> {
    let report = match command {
        DeviceCmd::RamDump { addr, len } => {
            let mut buf = vec![0u8; *len];
            let read = driver.get_ram_log(*addr, &mut buf).context("ram dump")?;
            Report::new("ram-dump")
                .field("addr", format!("{addr:#010x}"))
                .field("len", read)
                .field("data", hex_dump(*addr, &buf[..read]))
        }
        DeviceCmd::Gpio { op: GpioCmd::Read { pin } } => {
            let level = driver.gpio_read_pin(*pin).context("gpio read")?;
            Report::new("gpio").field("pin", *pin).field("level", level)
        }
        DeviceCmd::Gpio {
            op: GpioCmd::Write { pin, level },
        } => {
            driver.gpio_write_pin(*pin, *level != 0).context("gpio write")?;
            Report::new("gpio").field("pin", *pin).field("level", *level != 0)
        }
        DeviceCmd::Rtc { set } => {
            if let Some(when) = set {
                driver.set_rtc_timer(&rtc_time(when)?).context("rtc set")?;
            }
            let time = driver.get_rtc_timer().context("rtc get")?;
            Report::new("rtc").field("time", rtc_string(&time))
        }
        DeviceCmd::Antenna {
            external,
            gain_2g,
            gain_5g,
        } => {
            let antenna = if *external { Antenna::External } else { Antenna::Internal };
            driver
                .wireless_antenna(antenna, *gain_2g, *gain_5g)
                .context("antenna select")?;
            Report::new("antenna")
                .field("path", format!("{antenna:?}").to_lowercase())
                .field("gain 2.4 GHz", *gain_2g)
                .field("gain 5 GHz", *gain_5g)
        }
    };
    Ok(report)
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    logger::init(opts.verbose).context("installing logger")?;

    let mut config = load_config(opts.config.as_deref())?;
    if opts.threaded {
        config.mode = ScheduleMode::Threaded;
    }
    let mut memory = vec![0u8; Driver::<SimTransport>::memory_estimate(&config) + ALIGN_SLACK];
    let driver = Driver::init(&mut memory, config, SimTransport::new()).context("driver init")?;

    let report = match driver.config().mode {
        ScheduleMode::Cooperative => run(&driver, &opts),
        ScheduleMode::Threaded => thread::scope(|s| {
            s.spawn(|| driver.run_scheduler());
            let report = run(&driver, &opts);
            driver.stop_scheduler();
            report
        }),
    };

    // Tear down before reporting so a failed command still releases the device.
    let deinit = driver.deinit();
    report?.print(opts.json);
    deinit.context("driver deinit")?;
    Ok(())
}

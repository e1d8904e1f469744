//! Terminal logger: local timestamp, coloured level, target, message.

use chrono::Local;
use colored::Colorize;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

struct CliLogger {
    level: LevelFilter,
}

impl Log for CliLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = match record.level() {
            Level::Error => "ERROR".bright_red().bold(),
            Level::Warn => "WARN ".yellow(),
            Level::Info => "INFO ".green(),
            Level::Debug => "DEBUG".bright_blue(),
            Level::Trace => "TRACE".dimmed(),
        };
        let stamp = Local::now().format("%H:%M:%S%.3f").to_string();
        eprintln!("{} {} {} {}", stamp.dimmed(), level, record.target().dimmed(), record.args());
    }

    fn flush(&self) {}
}

/// Maps `-v` repetitions to a level filter.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub fn init(verbosity: u8) -> Result<(), SetLoggerError> {
    let level = level_for(verbosity);
    log::set_boxed_logger(Box::new(CliLogger { level }))?;
    log::set_max_level(level);
    Ok(())
}

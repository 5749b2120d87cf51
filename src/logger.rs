use colored::Colorize;
use log::{Level, Log, Metadata, Record};

pub static LOGGER: Logger = Logger;

/// Diagnostic-stream logger: progress lines go out bare, everything else
/// gets a colored severity prefix.
pub struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let prefix = match record.level() {
            Level::Info => {
                eprintln!("{}", record.args());
                return;
            }
            Level::Error => "error:".bold().red(),
            Level::Warn => "warning:".bold().yellow(),
            Level::Debug => "debug:".bold().blue(),
            Level::Trace => "trace:".bold().purple(),
        };
        eprintln!("{prefix} {}", record.args());
    }

    fn flush(&self) {}
}

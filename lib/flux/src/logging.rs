use sloggers::file::FileLoggerBuilder;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::Build;
use std::path::Path;

pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};
pub use sloggers::types::Severity;
pub use sloggers::Error;

/// Builds the process logger. With no log file the output goes to stdout,
/// otherwise lines are appended to the supplied file.
pub fn init<P: AsRef<Path>>(level: Severity, logfile: Option<P>) -> Result<Logger, Error> {
    match logfile {
        Some(path) => {
            let mut builder = FileLoggerBuilder::new(path);
            builder.level(level);
            builder.build()
        }
        None => {
            let mut builder = TerminalLoggerBuilder::new();
            builder.level(level);
            builder.destination(Destination::Stdout);
            builder.build()
        }
    }
}

/// A logger that drops everything. Used by tests and as a placeholder.
pub fn null() -> Logger {
    Logger::root(Discard, o!())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_logger_builds() {
        let log = init::<&str>(Severity::Warning, None).unwrap();
        warn!(log, "logger constructed");
    }

    #[test]
    fn test_null_logger_discards() {
        let log = null();
        debug!(log, "dropped"; "value" => 1);
    }
}

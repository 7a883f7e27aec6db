//! `log` backend.
//!
//! Records are formatted straight into a board-provided sink, usually the
//! debug UART, without allocating. The sink must not log.

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record};
use spin::Once;

use crate::error::{EngineError, EngineResult};

/// Byte sink for log output.
pub type LogSink = fn(&str);

/// Logger writing `[LEVEL] message` lines to a sink.
pub struct SerialLogger {
    sink: Once<LogSink>,
}

static LOGGER: SerialLogger = SerialLogger::new();

struct SinkWriter(LogSink);

impl Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        (self.0)(s);
        Ok(())
    }
}

impl SerialLogger {
    pub const fn new() -> Self {
        SerialLogger { sink: Once::new() }
    }

    fn emit(&self, sink: LogSink, record: &Record) {
        let mut out = SinkWriter(sink);
        let _ = write!(out, "[{}] {}\r\n", record.level(), record.args());
    }
}

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.sink.get().is_some() && metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = self.sink.get() {
            self.emit(*sink, record);
        }
    }

    fn flush(&self) {}
}

/// Install the logger. Fails if any logger is already installed.
pub fn init(sink: LogSink, level: LevelFilter) -> EngineResult<()> {
    LOGGER.sink.call_once(|| sink);
    log::set_logger(&LOGGER).map_err(|_| EngineError::Logger)?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use spin::Mutex;

    static CAPTURED: Mutex<String> = Mutex::new(String::new());

    fn capture(s: &str) {
        CAPTURED.lock().push_str(s);
    }

    #[test]
    fn test_record_format() {
        let logger = SerialLogger::new();
        logger.emit(
            capture,
            &Record::builder()
                .level(log::Level::Warn)
                .args(format_args!("[IRQ] overrun"))
                .build(),
        );
        assert_eq!(CAPTURED.lock().as_str(), "[WARN] [IRQ] overrun\r\n");
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init(capture, LevelFilter::Off);
        assert_eq!(init(capture, LevelFilter::Off), Err(EngineError::Logger));
    }
}

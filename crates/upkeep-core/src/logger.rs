//! Injected logging seam.
//!
//! Components receive an `Arc<dyn Logger>` instead of reaching for a global
//! logger, so hosts decide where updater output goes: [`LogFacade`] forwards
//! to the `log` crate, [`BufferLogger`] keeps a tail for display and
//! assertions, [`NoOpLogger`] drops everything.

use std::collections::VecDeque;
use std::fmt::{self, Arguments};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Single-letter tag used in rendered log lines.
    #[must_use]
    pub fn tag(self) -> char {
        match self {
            Self::Debug => 'D',
            Self::Info => 'I',
            Self::Warn => 'W',
            Self::Error => 'E',
        }
    }
}

pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, args: Arguments<'_>);

    fn debug(&self, args: Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }

    fn info(&self, args: Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    fn warn(&self, args: Arguments<'_>) {
        self.log(LogLevel::Warn, args);
    }

    fn error(&self, args: Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {
        $logger.debug(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {
        $logger.info(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {
        $logger.warn(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {
        $logger.error(format_args!($($arg)*))
    };
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    #[inline]
    fn log(&self, _level: LogLevel, _args: Arguments<'_>) {}
}

/// Forwards to the `log` crate under the `upkeep` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFacade;

impl Logger for LogFacade {
    fn log(&self, level: LogLevel, args: Arguments<'_>) {
        let level = match level {
            LogLevel::Debug => ::log::Level::Debug,
            LogLevel::Info => ::log::Level::Info,
            LogLevel::Warn => ::log::Level::Warn,
            LogLevel::Error => ::log::Level::Error,
        };
        ::log::log!(target: "upkeep", level, "{args}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level.tag(), self.message)
    }
}

/// Keeps the most recent `capacity` lines in memory.
pub struct BufferLogger {
    capacity: usize,
    lines: Mutex<VecDeque<LogLine>>,
}

impl BufferLogger {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .any(|line| line.level == level && line.message.contains(needle))
    }
}

impl Default for BufferLogger {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Logger for BufferLogger {
    fn log(&self, level: LogLevel, args: Arguments<'_>) {
        let mut lines = self
            .lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(LogLine {
            level,
            message: args.to_string(),
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{BufferLogger, LogLevel, Logger, NoOpLogger};

    #[test]
    fn buffer_logger_keeps_recent_lines() {
        let logger = BufferLogger::new(2);
        log_info!(logger, "first {}", 1);
        log_warn!(logger, "second");
        log_error!(logger, "third");

        let lines = logger.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].to_string(), "[W] second");
        assert_eq!(lines[1].to_string(), "[E] third");
        assert!(logger.contains(LogLevel::Error, "thi"));
        assert!(!logger.contains(LogLevel::Info, "first"));
    }

    #[test]
    fn loggers_work_as_trait_objects() {
        let loggers: Vec<Arc<dyn Logger>> = vec![Arc::new(NoOpLogger), Arc::new(BufferLogger::default())];
        for logger in loggers {
            log_debug!(logger, "debug {}", "message");
        }
    }

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
    }
}

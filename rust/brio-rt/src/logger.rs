//! VM diagnostic logging: a plain level enum and a stderr side channel.
//! Not semantically load-bearing.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    #[default]
    None,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::None => "none",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(LogLevel::None),
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!(
                "invalid log level '{}' (expected none|error|warn|info|debug|trace)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VmLogger {
    level: LogLevel,
}

impl VmLogger {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::None && self.level >= level
    }

    pub fn log(&self, level: LogLevel, message: impl FnOnce() -> String) {
        if self.enabled(level) {
            eprintln!("[vm:{}] {}", level, message());
        }
    }

    pub fn info(&self, message: impl FnOnce() -> String) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: impl FnOnce() -> String) {
        self.log(LogLevel::Debug, message);
    }

    pub fn trace(&self, message: impl FnOnce() -> String) {
        self.log(LogLevel::Trace, message);
    }
}

// src/logging.rs
//! Process-wide leveled logging to stderr
//!
//! The level is a single atomic shared by every engine in the process;
//! `EngineConfig::log_level` sets it when an engine is built. Messages carry
//! the emitting module:
//!
//! ```text
//! [quarry DEBUG quarry_core::aggregation] stage 0 $match on 12 documents
//! ```

use crate::error::QuarryError;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// A query failed to compile or a pipeline aborted
    Error = 0,
    /// Input that still produced a result, e.g. `$sample` of an empty collection
    Warn = 1,
    /// Engine construction and operator registration
    Info = 2,
    /// One line per pipeline stage, `$group` partition and `$lookup` index counts
    Debug = 3,
    /// Stage output sizes and compiled query clause counts
    Trace = 4,
}

const LEVELS: [LogLevel; 5] = [
    LogLevel::Error,
    LogLevel::Warn,
    LogLevel::Info,
    LogLevel::Debug,
    LogLevel::Trace,
];

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LEVELS
            .iter()
            .copied()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| QuarryError::Validation(format!("unknown log level: {}", s)))
    }
}

static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);

pub fn set_log_level(level: LogLevel) {
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn get_log_level() -> LogLevel {
    LEVELS
        .get(LEVEL.load(Ordering::Relaxed) as usize)
        .copied()
        .unwrap_or(LogLevel::Warn)
}

#[inline]
pub fn should_log(level: LogLevel) -> bool {
    level <= get_log_level()
}

#[cfg(test)]
thread_local! {
    static CAPTURED: std::cell::RefCell<Option<Vec<(LogLevel, String)>>> =
        const { std::cell::RefCell::new(None) };
}

/// Run `f` and return every message it logged on this thread, whatever the
/// global level
#[cfg(test)]
pub(crate) fn capture<F: FnOnce()>(f: F) -> Vec<(LogLevel, String)> {
    CAPTURED.with(|c| *c.borrow_mut() = Some(Vec::new()));
    f();
    CAPTURED.with(|c| c.borrow_mut().take()).unwrap_or_default()
}

#[doc(hidden)]
pub fn log_message(level: LogLevel, module: &str, message: &str) {
    #[cfg(test)]
    {
        let captured = CAPTURED.with(|c| match c.borrow_mut().as_mut() {
            Some(log) => {
                log.push((level, message.to_string()));
                true
            }
            None => false,
        });
        if captured {
            return;
        }
    }
    if should_log(level) {
        eprintln!("[quarry {} {}] {}", level, module, message);
    }
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_message($crate::logging::LogLevel::Error, module_path!(), &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_message($crate::logging::LogLevel::Warn, module_path!(), &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_message($crate::logging::LogLevel::Info, module_path!(), &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_message($crate::logging::LogLevel::Debug, module_path!(), &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::logging::log_message($crate::logging::LogLevel::Trace, module_path!(), &format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::value::Value;
    use serde_json::json;

    fn levels(log: &[(LogLevel, String)], level: LogLevel) -> Vec<&str> {
        log.iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.as_str())
            .collect()
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(" TrAcE ".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!(matches!("verbose".parse::<LogLevel>(), Err(QuarryError::Validation(_))));
        assert_eq!(LogLevel::Debug.to_string(), "DEBUG");
        assert!(LogLevel::Error < LogLevel::Trace);
    }

    #[test]
    fn test_pipeline_logs_each_stage() {
        let log = capture(|| {
            let engine = Engine::new();
            let docs = vec![Value::from(json!({"a": 1})), Value::from(json!({"a": 2}))];
            let out = engine.aggregate(docs, &Value::from(json!([{"$match": {"a": 2}}, {"$count": "n"}])));
            assert!(out.is_ok());
        });
        let debug = levels(&log, LogLevel::Debug);
        assert!(debug.iter().any(|m| m.contains("$match on 2 documents")));
        assert!(debug.iter().any(|m| m.contains("$count on 1 documents")));
        assert!(levels(&log, LogLevel::Trace)
            .iter()
            .any(|m| m.contains("$count produced 1 documents")));
        assert!(levels(&log, LogLevel::Error).is_empty());
    }

    #[test]
    fn test_failures_are_logged_as_errors() {
        let log = capture(|| {
            let engine = Engine::new();
            assert!(engine.query(json!({"a": {"$near": 1}})).is_err());
            let bad = engine.aggregate(vec![Value::from(json!({"t": 3}))], &Value::from(json!([{"$unwind": "$t"}])));
            assert!(bad.is_err());
        });
        let errors = levels(&log, LogLevel::Error);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("$near"));
        assert!(errors[1].contains("$unwind"));
    }

    #[test]
    fn test_query_compile_traces_clause_count() {
        let log = capture(|| {
            let engine = Engine::new();
            assert!(engine.query(json!({"a": 1, "$or": [{"b": 2}, {"c": 3}]})).is_ok());
        });
        assert!(levels(&log, LogLevel::Trace)
            .iter()
            .any(|m| m.contains("2 top-level clauses")));
    }
}

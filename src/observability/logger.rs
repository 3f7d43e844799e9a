//! Structured JSON logger
//!
//! - One line per event
//! - `event` and `severity` first, remaining fields sorted by key
//! - Synchronous; a failed write is dropped, never reported to the caller

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};

use serde_json::Value;

use super::events::Event;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Per-poll detail
    Trace = 0,
    /// Normal lifecycle
    Info = 1,
    /// Recoverable problems
    Warn = 2,
    /// Operation failures surfaced to a caller
    Error = 3,
}

impl Severity {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Severity::Trace,
            1 => Severity::Info,
            2 => Severity::Warn,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static MIN_SEVERITY: AtomicU8 = AtomicU8::new(Severity::Info as u8);

/// Process-wide JSON logger writing to stderr
pub struct Logger;

impl Logger {
    /// Drop events below `severity`
    pub fn set_min_severity(severity: Severity) {
        MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
    }

    pub fn min_severity() -> Severity {
        Severity::from_u8(MIN_SEVERITY.load(Ordering::Relaxed))
    }

    /// Log an event with the given severity and fields
    pub fn log(severity: Severity, event: Event, fields: &[(&str, &str)]) {
        if severity < Self::min_severity() {
            return;
        }
        Self::write_line(severity, event, fields, &mut io::stderr());
    }

    fn write_line<W: Write>(severity: Severity, event: Event, fields: &[(&str, &str)], writer: &mut W) {
        let line = Self::render(severity, event, fields);
        // One write per line so concurrent tasks don't interleave.
        let _ = writer.write_all(line.as_bytes());
        let _ = writer.flush();
    }

    fn render(severity: Severity, event: Event, fields: &[(&str, &str)]) -> String {
        let mut sorted: Vec<_> = fields.to_vec();
        sorted.sort_by_key(|(k, _)| *k);

        let mut out = String::with_capacity(128);
        out.push_str("{\"event\":");
        out.push_str(&quote(event.as_str()));
        out.push_str(",\"severity\":");
        out.push_str(&quote(severity.as_str()));
        for (key, value) in sorted {
            out.push(',');
            out.push_str(&quote(key));
            out.push(':');
            out.push_str(&quote(value));
        }
        out.push_str("}\n");
        out
    }

    pub fn trace(event: Event, fields: &[(&str, &str)]) {
        Self::log(Severity::Trace, event, fields);
    }

    pub fn info(event: Event, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    pub fn warn(event: Event, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    pub fn error(event: Event, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }
}

fn quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

#[cfg(test)]
pub fn capture_log(severity: Severity, event: Event, fields: &[(&str, &str)]) -> String {
    let mut buffer = Vec::new();
    Logger::write_line(severity, event, fields, &mut buffer);
    String::from_utf8(buffer).unwrap()
}

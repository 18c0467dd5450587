//! Structured JSON logger
//!
//! - One line per event
//! - `event` first, `severity` second, remaining keys sorted
//! - Synchronous, no buffering
//! - WARN and above go to stderr, the rest to stdout
//!
//! Tests can capture lines emitted on their own thread with [`capture`].

use std::cell::RefCell;
use std::fmt;
use std::io::{self, Write};

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info = 0,
    /// Recoverable, e.g. a skipped sync poll
    Warn = 1,
    Error = 2,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

thread_local! {
    static CAPTURE: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

/// Run `f` and return its result together with every log line it emitted
/// on the current thread. Captured lines are not written to stdout/stderr.
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, Vec<String>) {
    let previous = CAPTURE.with(|c| c.borrow_mut().replace(Vec::new()));
    let result = f();
    let lines = CAPTURE
        .with(|c| std::mem::replace(&mut *c.borrow_mut(), previous))
        .unwrap_or_default();
    (result, lines)
}

/// Structured logger.
pub struct Logger;

impl Logger {
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        let line = Self::format_line(severity, event, fields);

        let captured = CAPTURE.with(|c| match c.borrow_mut().as_mut() {
            Some(lines) => {
                lines.push(line.clone());
                true
            }
            None => false,
        });
        if captured {
            return;
        }

        // One write call per line; a failed log write is never an error.
        let _ = if severity >= Severity::Warn {
            io::stderr().lock().write_all(line.as_bytes())
        } else {
            io::stdout().lock().write_all(line.as_bytes())
        };
    }

    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }

    /// Render one log line, newline terminated.
    pub fn format_line(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(64 + fields.len() * 24);
        out.push_str("{\"event\":");
        push_json_str(&mut out, event);
        out.push_str(",\"severity\":");
        push_json_str(&mut out, severity.as_str());

        let mut sorted: Vec<&(&str, &str)> = fields.iter().collect();
        sorted.sort_by_key(|(k, _)| *k);
        for (key, value) in sorted {
            out.push(',');
            push_json_str(&mut out, key);
            out.push(':');
            push_json_str(&mut out, value);
        }

        out.push_str("}\n");
        out
    }
}

fn push_json_str(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_is_valid_json() {
        let line = Logger::format_line(
            Severity::Info,
            "SLOT_INVALIDATED",
            &[("slot", "lsub4_slot"), ("reason", "inactive_timeout")],
        );
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["event"], "SLOT_INVALIDATED");
        assert_eq!(parsed["severity"], "INFO");
        assert_eq!(parsed["slot"], "lsub4_slot");
        assert_eq!(parsed["reason"], "inactive_timeout");
    }

    #[test]
    fn test_field_order_is_deterministic() {
        let a = Logger::format_line(Severity::Info, "E", &[("zeta", "1"), ("alpha", "2")]);
        let b = Logger::format_line(Severity::Info, "E", &[("alpha", "2"), ("zeta", "1")]);
        assert_eq!(a, b);
        assert!(a.find("\"event\"").unwrap() < a.find("\"severity\"").unwrap());
        assert!(a.find("alpha").unwrap() < a.find("zeta").unwrap());
    }

    #[test]
    fn test_escaping() {
        let line = Logger::format_line(Severity::Warn, "E", &[("msg", "a \"b\"\nc\u{1}")]);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["msg"], "a \"b\"\nc\u{1}");
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_capture_collects_lines() {
        let ((), lines) = capture(|| {
            Logger::info("ONE", &[]);
            Logger::warn("TWO", &[("k", "v")]);
        });
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"ONE\""));
        assert!(lines[1].contains("\"WARN\""));
    }

    #[test]
    fn test_nested_capture_restores_outer() {
        let ((), outer) = capture(|| {
            Logger::info("OUTER", &[]);
            let ((), inner) = capture(|| Logger::info("INNER", &[]));
            assert_eq!(inner.len(), 1);
        });
        assert_eq!(outer.len(), 1);
        assert!(outer[0].contains("OUTER"));
    }
}

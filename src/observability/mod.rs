//! Observability subsystem
//!
//! - Structured JSON logging, one line per event
//! - Typed lifecycle events
//! - Monotonic counters
//!
//! Observability is read-only: it never changes slot state, and a failed
//! log write is never an error.

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{capture, Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log a lifecycle event with fields.
///
/// Warning events go out at WARN, everything else at INFO.
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_warning() {
        Severity::Warn
    } else {
        Severity::Info
    };
    Logger::log(severity, event.as_str(), fields);
}

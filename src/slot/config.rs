//! Slot Configuration
//!
//! Each node reads its own values. `inactive_timeout` on a standby only
//! governs the standby's locally created slots; mirrored failover slots
//! follow the primary's decision.
//!
//! Durations are written as `<n>` (seconds) or `<n><unit>` with unit one of
//! `ms`, `s`, `min`, `h`, `d`. Surrounding whitespace is trimmed.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use super::errors::{SlotError, SlotResult};

/// Default interval between two sync polls.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on a single sync transport call.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Slot lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotConfig {
    /// Inactivity allowed before a slot is invalidated. Zero disables.
    pub inactive_timeout: Duration,

    /// Standby only: interval between sync polls.
    pub sync_interval: Duration,

    /// Standby only: bound on one fetch from the primary.
    pub sync_timeout: Duration,
}

impl SlotConfig {
    /// Configuration with the timeout check disabled.
    pub fn disabled() -> Self {
        Self {
            inactive_timeout: Duration::ZERO,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }

    pub fn with_inactive_timeout(inactive_timeout: Duration) -> Self {
        Self {
            inactive_timeout,
            ..Self::disabled()
        }
    }

    /// Build from textual settings.
    pub fn parse(inactive_timeout: &str, sync_interval: &str, sync_timeout: &str) -> SlotResult<Self> {
        let config = Self {
            inactive_timeout: parse_duration(inactive_timeout)?,
            sync_interval: parse_duration(sync_interval)?,
            sync_timeout: parse_duration(sync_timeout)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Whether the inactivity check runs at all on this node.
    pub fn timeout_enabled(&self) -> bool {
        !self.inactive_timeout.is_zero()
    }

    pub fn validate(&self) -> SlotResult<()> {
        if self.sync_interval.is_zero() {
            return Err(SlotError::configuration("sync_interval must be > 0"));
        }
        if self.sync_timeout.is_zero() {
            return Err(SlotError::configuration("sync_timeout must be > 0"));
        }
        Ok(())
    }
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+)\s*(ms|s|min|h|d)?$").expect("duration pattern is valid")
    })
}

/// Parse a duration setting such as `1s`, `500ms`, `2min` or `0`.
pub fn parse_duration(input: &str) -> SlotResult<Duration> {
    let trimmed = input.trim();
    let caps = duration_pattern().captures(trimmed).ok_or_else(|| {
        SlotError::configuration(format!("invalid duration '{}'", input))
    })?;

    let amount: u64 = caps[1]
        .parse()
        .map_err(|e| SlotError::configuration(format!("invalid duration '{}': {}", input, e)))?;

    let unit_secs = |secs: u64| {
        amount
            .checked_mul(secs)
            .map(Duration::from_secs)
            .ok_or_else(|| SlotError::configuration(format!("duration '{}' overflows", input)))
    };

    match caps.get(2).map(|m| m.as_str()) {
        Some("ms") => Ok(Duration::from_millis(amount)),
        None | Some("s") => unit_secs(1),
        Some("min") => unit_secs(60),
        Some("h") => unit_secs(3600),
        Some("d") => unit_secs(86400),
        Some(other) => Err(SlotError::configuration(format!(
            "unknown duration unit '{}'",
            other
        ))),
    }
}

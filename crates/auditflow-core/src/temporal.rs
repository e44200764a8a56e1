//! # Temporal Types — UTC Epoch Timestamps and the Clock
//!
//! `Timestamp` is a UTC instant truncated to seconds. The record store keeps
//! dates as epoch seconds, so that is also the serialized form: a timestamp
//! round-trips through JSON and SQL as a plain `i64`.
//!
//! Date-gated workflow rules never call `Utc::now()` directly. They read the
//! current instant through a [`Clock`], which is injected into the lifecycle
//! engine and the scanner.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A UTC timestamp, truncated to seconds precision.
///
/// # Construction
///
/// - [`Timestamp::now()`]: current UTC time, truncated.
/// - [`Timestamp::from_utc()`]: from a `DateTime<Utc>`, truncating sub-seconds.
/// - [`Timestamp::from_epoch_secs()`]: from stored epoch seconds.
/// - [`Timestamp::parse()`]: from an RFC 3339 string with `Z` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp from the current UTC time, truncated to seconds.
    pub fn now() -> Self {
        Self(truncate_to_seconds(Utc::now()))
    }

    /// Create a timestamp from a `chrono::DateTime<Utc>`, truncating sub-seconds.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(truncate_to_seconds(dt))
    }

    /// Create a timestamp from a Unix epoch timestamp (seconds).
    pub fn from_epoch_secs(secs: i64) -> Result<Self, CoreError> {
        DateTime::from_timestamp(secs, 0)
            .map(Self)
            .ok_or_else(|| CoreError::InvalidTimestamp(format!("epoch seconds out of range: {secs}")))
    }

    /// Parse an RFC 3339 timestamp. Only the `Z` suffix is accepted.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if !s.ends_with('Z') {
            return Err(CoreError::InvalidTimestamp(format!(
                "timestamp must use Z suffix (UTC only), got: {s:?}"
            )));
        }
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| CoreError::InvalidTimestamp(format!("{s:?}: {e}")))?;
        Ok(Self(truncate_to_seconds(dt.with_timezone(&Utc))))
    }

    /// Shift the timestamp by a signed number of seconds.
    ///
    /// Saturates at the representable range instead of failing; the workflow
    /// only ever shifts by days.
    pub fn offset_secs(&self, secs: i64) -> Self {
        let shifted = Duration::try_seconds(secs)
            .and_then(|d| self.0.checked_add_signed(d))
            .unwrap_or(if secs < 0 {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            });
        Self(truncate_to_seconds(shifted))
    }

    /// Access the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Returns the Unix epoch timestamp in seconds.
    pub fn epoch_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// Render as ISO8601 with Z suffix (e.g., `2026-01-15T12:00:00Z`).
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.epoch_secs()
    }
}

impl TryFrom<i64> for Timestamp {
    type Error = CoreError;

    fn try_from(secs: i64) -> Result<Self, Self::Error> {
        Self::from_epoch_secs(secs)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

// ─── Clock ───────────────────────────────────────────────────────────

/// Source of "now" for date-gated rules.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// The current instant.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A manually driven clock for deterministic tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    epoch_secs: AtomicI64,
}

impl FixedClock {
    /// Create a clock frozen at `at`.
    pub fn new(at: Timestamp) -> Self {
        Self {
            epoch_secs: AtomicI64::new(at.epoch_secs()),
        }
    }

    /// Move the clock to `at`.
    pub fn set(&self, at: Timestamp) {
        self.epoch_secs.store(at.epoch_secs(), Ordering::SeqCst);
    }

    /// Move the clock forward (or backward) by `secs`.
    pub fn advance_secs(&self, secs: i64) {
        let next = self.now().offset_secs(secs);
        self.set(next);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        let secs = self.epoch_secs.load(Ordering::SeqCst);
        // Only values produced by `Timestamp::epoch_secs` are ever stored.
        Timestamp::from_epoch_secs(secs).unwrap_or_else(|_| Timestamp::now())
    }
}

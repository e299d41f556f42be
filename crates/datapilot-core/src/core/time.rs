// crates/datapilot-core/src/core/time.rs
// ============================================================================
// Module: DataPilot Time Model
// Description: Canonical UTC timestamps and injectable clocks.
// Purpose: Provide deterministic, replayable time values across DataPilot records.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! All persisted times are UTC and serialize as RFC 3339 with sub-second
//! precision. The deterministic runtime never reads wall-clock time directly;
//! callers inject a [`Clock`] so tests can pin a fixed base and dry-run
//! record timestamps replay byte-identically.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical UTC timestamp used in DataPilot entities and ledgers.
///
/// # Invariants
/// - Always UTC; the wire form is RFC 3339.
/// - Ordering follows the underlying instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl Timestamp {
    /// The unix epoch.
    pub const UNIX_EPOCH: Self = Self(OffsetDateTime::UNIX_EPOCH);

    /// Creates a timestamp from an `OffsetDateTime`, normalised to UTC.
    #[must_use]
    pub fn new(instant: OffsetDateTime) -> Self {
        Self(instant.to_offset(time::UtcOffset::UTC))
    }

    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub fn from_unix_millis(millis: i64) -> Option<Self> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
            .ok()
            .map(Self::new)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub fn as_unix_millis(&self) -> i64 {
        i64::try_from(self.0.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
    }

    /// Returns a timestamp offset forward by whole milliseconds.
    #[must_use]
    pub fn plus_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(Duration::milliseconds(millis)))
    }

    /// Formats the timestamp as an RFC 3339 string.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0.format(&Rfc3339).unwrap_or_else(|_| self.0.unix_timestamp().to_string())
    }

    /// Parses an RFC 3339 string into a timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`TimeParseError`] when the input is not valid RFC 3339.
    pub fn parse_rfc3339(input: &str) -> Result<Self, TimeParseError> {
        OffsetDateTime::parse(input, &Rfc3339)
            .map(Self::new)
            .map_err(|err| TimeParseError(err.to_string()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

/// Error raised when parsing an RFC 3339 timestamp fails.
#[derive(Debug, thiserror::Error)]
#[error("invalid rfc3339 timestamp: {0}")]
pub struct TimeParseError(String);

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Injectable time source for services and the dry-run executor.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Timestamp;
}

impl Clock for std::sync::Arc<dyn Clock> {
    fn now(&self) -> Timestamp {
        self.as_ref().now()
    }
}

/// Wall-clock implementation backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(OffsetDateTime::now_utc())
    }
}

/// Fixed clock returning a pinned instant, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    /// The pinned instant returned by every `now` call.
    base: Timestamp,
}

impl FixedClock {
    /// Creates a fixed clock pinned at `base`.
    #[must_use]
    pub const fn new(base: Timestamp) -> Self {
        Self {
            base,
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.base
    }
}

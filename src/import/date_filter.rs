//! Date-range quota filter
//!
//! Drops rows whose creation timestamp falls outside the window the
//! server's quota permits, so they are never uploaded. This is a
//! bandwidth optimization, not a security boundary: the server
//! re-checks quota for every event it receives.

use chrono::{NaiveDate, NaiveDateTime};

/// Timestamp format used by source-platform exports, UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Allowed `[earliest, latest]` window at day granularity.
///
/// `earliest` is taken at start-of-day and `latest` at end-of-day,
/// both UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    earliest: NaiveDateTime,
    latest: NaiveDateTime,
}

impl DateWindow {
    pub fn new(earliest: NaiveDate, latest: NaiveDate) -> Self {
        Self {
            earliest: earliest.and_hms_opt(0, 0, 0).unwrap_or_default(),
            latest: latest.and_hms_opt(23, 59, 59).unwrap_or_default(),
        }
    }

    /// Parse a window from `yyyy-MM-dd` strings, as delivered by the
    /// start-import response.
    pub fn from_strings(earliest: &str, latest: &str) -> Option<Self> {
        let earliest = NaiveDate::parse_from_str(earliest, "%Y-%m-%d").ok()?;
        let latest = NaiveDate::parse_from_str(latest, "%Y-%m-%d").ok()?;
        Some(Self::new(earliest, latest))
    }

    /// Whether a `yyyy-MM-dd HH:mm:ss` timestamp falls inside the
    /// window. Malformed timestamps are rejected, never an error.
    pub fn accepts(&self, timestamp: &str) -> bool {
        match NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT) {
            Ok(ts) => ts >= self.earliest && ts <= self.latest,
            Err(_) => false,
        }
    }
}

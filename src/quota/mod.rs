//! Monthly event quota tracking
//!
//! An organization may hold a bounded number of events per calendar
//! month, over a fixed trailing window of months ending at the current
//! month. Admission for an event depends only on which month its
//! timestamp falls into. A tracker is a value scoped to one request:
//! it is seeded from a single consistent read of the store and its
//! decrements are request-local, never shared across requests.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime};

/// One calendar month, orderable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn from_datetime(ts: &NaiveDateTime) -> Self {
        Self::from_date(ts.date())
    }

    /// `"yyyy-MM"`, matching the grouping label the store reports.
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    pub fn parse_label(label: &str) -> Option<Self> {
        let (year, month) = label.split_once('-')?;
        let year = year.parse::<i32>().ok()?;
        let month = month.parse::<u32>().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }
        Some(Self { year, month })
    }

    pub fn prev(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// First day of the month.
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }
}

/// Counts for user-facing quota messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSummary {
    pub months_at_capacity: usize,
    pub total_months: usize,
}

impl QuotaSummary {
    pub fn message(&self) -> String {
        format!(
            "{} of {} months in the import window are at capacity",
            self.months_at_capacity, self.total_months
        )
    }
}

/// Per-request admission decisions over the trailing month window.
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    /// Remaining capacity per tracked month
    remaining: BTreeMap<MonthKey, i64>,
}

impl QuotaTracker {
    /// Build a tracker for the `window_months` calendar months ending
    /// at `current`, seeding each month's remaining capacity from the
    /// used counts (`"yyyy-MM"` label -> count) read from the store.
    pub fn new(
        current: NaiveDate,
        window_months: u32,
        monthly_capacity: i64,
        used: &[(String, i64)],
    ) -> Self {
        let mut used_by_month: BTreeMap<MonthKey, i64> = BTreeMap::new();
        for (label, count) in used {
            if let Some(key) = MonthKey::parse_label(label) {
                *used_by_month.entry(key).or_insert(0) += count;
            }
        }

        let mut remaining = BTreeMap::new();
        let mut month = MonthKey::from_date(current);
        for _ in 0..window_months.max(1) {
            let used = used_by_month.get(&month).copied().unwrap_or(0);
            remaining.insert(month, (monthly_capacity - used).max(0));
            month = month.prev();
        }

        Self { remaining }
    }

    /// Oldest tracked month's first day; the earliest date an imported
    /// event may carry.
    pub fn earliest_allowed(&self) -> Option<NaiveDate> {
        self.remaining.keys().next().map(|key| key.first_day())
    }

    /// Decide admission for one event and account for it.
    ///
    /// Events whose month is outside the window are rejected. Within a
    /// request, admitted events consume capacity, so exhaustion partway
    /// through a batch is respected for the rest of that batch.
    pub fn can_import(&mut self, timestamp: &NaiveDateTime) -> bool {
        let key = MonthKey::from_datetime(timestamp);
        match self.remaining.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn summary(&self) -> QuotaSummary {
        QuotaSummary {
            months_at_capacity: self.remaining.values().filter(|r| **r <= 0).count(),
            total_months: self.remaining.len(),
        }
    }
}

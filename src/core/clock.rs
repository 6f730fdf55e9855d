//! Academy clock and month bucketing.
//!
//! All "now" readings and month boundaries go through an [`AcademyClock`] that is
//! passed in explicitly. Months are bucketed in the academy's local offset, so a
//! session ending at 23:30 UTC on the last day of a month can belong to the next
//! month for an academy east of UTC.

use crate::errors::{Error, Result};
use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, Utc};
use std::sync::{Mutex, PoisonError};

/// Source of the current instant and the academy's timezone.
pub trait AcademyClock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// The academy's UTC offset.
    fn timezone(&self) -> FixedOffset;

    /// First day of the academy-local month containing `instant`.
    fn month_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        month_start(instant, self.timezone())
    }

    /// First day of the current academy-local month.
    fn current_month(&self) -> NaiveDate {
        self.month_of(self.now())
    }
}

/// Wall clock in the academy's offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    timezone: FixedOffset,
}

impl SystemClock {
    /// Creates a wall clock for the given academy offset.
    #[must_use]
    pub const fn new(timezone: FixedOffset) -> Self {
        Self { timezone }
    }
}

impl AcademyClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn timezone(&self) -> FixedOffset {
        self.timezone
    }
}

/// Manually driven clock for replays and tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
    timezone: FixedOffset,
}

impl FixedClock {
    /// Creates a clock frozen at `now`.
    #[must_use]
    pub const fn new(now: DateTime<Utc>, timezone: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            timezone,
        }
    }

    /// Moves the clock to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = instant;
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl AcademyClock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timezone(&self) -> FixedOffset {
        self.timezone
    }
}

/// First day of the month containing `instant`, in the given offset.
#[must_use]
pub fn month_start(instant: DateTime<Utc>, timezone: FixedOffset) -> NaiveDate {
    let local = instant.with_timezone(&timezone).date_naive();
    normalize_month(local)
}

/// Truncates a date to the first day of its month.
#[must_use]
pub fn normalize_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First day of the month before `month`.
#[must_use]
pub fn previous_month(month: NaiveDate) -> NaiveDate {
    normalize_month(month)
        .checked_sub_months(Months::new(1))
        .unwrap_or(month)
}

/// Parses a `YYYY-MM` month into its first day.
pub fn parse_month(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{}-01", value.trim()), "%Y-%m-%d").map_err(|e| {
        Error::Validation {
            message: format!("invalid month {value:?}, expected YYYY-MM: {e}"),
        }
    })
}

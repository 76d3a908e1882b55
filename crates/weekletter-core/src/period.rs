use std::fmt;

use chrono::{Datelike, Local, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WeekletterError};

/// Addressing unit for a week letter: ISO-8601 week number and ISO week-year.
///
/// The year is the ISO week-year, which differs from the calendar year for
/// dates around New Year (2024-12-30 belongs to week 1 of 2025).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub week: u32,
    pub year: i32,
}

impl Period {
    /// Build a period, rejecting week numbers the ISO calendar does not have
    /// for `year` (week 53 only exists in long years).
    pub fn new(week: u32, year: i32) -> Result<Self> {
        if NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).is_none() {
            return Err(WeekletterError::InvalidPeriod { week, year });
        }
        Ok(Self { week, year })
    }

    /// Canonical period containing `date`.
    pub fn from_date(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        Self {
            week: iso.week(),
            year: iso.year(),
        }
    }

    /// Period containing today's local date.
    pub fn current() -> Self {
        Self::from_date(Local::now().date_naive())
    }

    /// Monday of this period.
    pub fn monday(&self) -> Option<NaiveDate> {
        NaiveDate::from_isoywd_opt(self.year, self.week, Weekday::Mon)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "week {}/{}", self.week, self.year)
    }
}

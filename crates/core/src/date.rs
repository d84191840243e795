//! Calendar date output type (spec §3, §6: "UTC calendar date with year ≥
//! 1000; callers must not assume any time-of-day").

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateError {
    #[error("year {0} is before the minimum supported year 1000")]
    YearTooSmall(i32),
}

/// A validated calendar date, time-of-day free. The only fallible
/// construction in the data model (spec §7, ambient error-handling note).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtcDate(NaiveDate);

impl UtcDate {
    pub fn new(date: NaiveDate) -> Result<Self, DateError> {
        if date.year() < 1000 {
            return Err(DateError::YearTooSmall(date.year()));
        }
        Ok(Self(date))
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).and_then(|d| Self::new(d).ok())
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }

    pub fn inner(&self) -> NaiveDate {
        self.0
    }
}

impl std::fmt::Display for UtcDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_years_before_1000() {
        let d = NaiveDate::from_ymd_opt(999, 1, 1).unwrap();
        assert_eq!(UtcDate::new(d), Err(DateError::YearTooSmall(999)));
    }

    #[test]
    fn accepts_modern_dates() {
        let d = UtcDate::from_ymd(2024, 3, 15).unwrap();
        assert_eq!(d.year(), 2024);
        assert_eq!(d.month(), 3);
        assert_eq!(d.day(), 15);
    }

    #[test]
    fn from_ymd_rejects_invalid_calendar_date() {
        assert!(UtcDate::from_ymd(2024, 2, 30).is_none());
    }

    #[test]
    fn display_is_iso() {
        let d = UtcDate::from_ymd(2024, 3, 5).unwrap();
        assert_eq!(d.to_string(), "2024-03-05");
    }
}

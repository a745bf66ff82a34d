//! Month keys.
//!
//! A [`MonthKey`] is the `"YYYY-MM"` string used to scope transactions,
//! income sources and allocations to one budgeting period. It is always
//! derivable from a timestamp and every inbound record is re-derived at the
//! normalization boundary, so a record's `month` can never disagree with
//! its `date`.

use crate::errors::{Error, Result};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// One calendar month, e.g. `2026-03`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    /// Constructs a month key, validating the month number.
    ///
    /// # Errors
    /// Returns [`Error::InvalidMonth`] when `month` is outside `1..=12`.
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if (1..=12).contains(&month) {
            Ok(Self { year, month })
        } else {
            Err(Error::InvalidMonth {
                value: format!("{year:04}-{month:02}"),
            })
        }
    }

    /// Derives the month key from a timestamp's calendar fields.
    #[must_use]
    pub fn from_datetime(date: &DateTime<Utc>) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The calendar year.
    #[must_use]
    pub const fn year(self) -> i32 {
        self.year
    }

    /// The month number, `1..=12`.
    #[must_use]
    pub const fn month(self) -> u32 {
        self.month
    }

    /// The following month.
    #[must_use]
    pub const fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// The preceding month.
    #[must_use]
    pub const fn prev(self) -> Self {
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

    /// The first day of the month.
    #[must_use]
    pub fn first_day(self) -> NaiveDate {
        // new() validated the month number, so this cannot fail
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(self.year, 1, 1).unwrap_or_default())
    }

    /// A timestamp safely inside the month, used to date generated
    /// transactions (funding and contributions) within their period.
    #[must_use]
    pub fn start_datetime(self) -> DateTime<Utc> {
        match Utc.from_local_datetime(&self.first_day().and_hms_opt(12, 0, 0).unwrap_or_default())
        {
            chrono::LocalResult::Single(dt) => dt,
            _ => Utc::now(),
        }
    }

    /// Whether the timestamp falls inside this month.
    #[must_use]
    pub fn contains(self, date: &DateTime<Utc>) -> bool {
        Self::from_datetime(date) == self
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidMonth {
            value: s.to_string(),
        };
        let (year_part, month_part) = s.split_once('-').ok_or_else(invalid)?;
        if year_part.len() != 4 || month_part.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year_part.parse().map_err(|_| invalid())?;
        let month: u32 = month_part.parse().map_err(|_| invalid())?;
        Self::new(year, month).map_err(|_| invalid())
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_and_display_round_trip() {
        let key: MonthKey = "2026-03".parse().unwrap();
        assert_eq!(key.year(), 2026);
        assert_eq!(key.month(), 3);
        assert_eq!(key.to_string(), "2026-03");
    }

    #[test]
    fn test_parse_rejects_bad_keys() {
        assert!("2026-13".parse::<MonthKey>().is_err());
        assert!("2026-00".parse::<MonthKey>().is_err());
        assert!("2026-3".parse::<MonthKey>().is_err());
        assert!("26-03".parse::<MonthKey>().is_err());
        assert!("march".parse::<MonthKey>().is_err());
    }

    #[test]
    fn test_next_and_prev_cross_year_boundary() {
        let december: MonthKey = "2025-12".parse().unwrap();
        assert_eq!(december.next().to_string(), "2026-01");
        let january: MonthKey = "2026-01".parse().unwrap();
        assert_eq!(january.prev().to_string(), "2025-12");
    }

    #[test]
    fn test_ordering_follows_calendar() {
        let a: MonthKey = "2025-12".parse().unwrap();
        let b: MonthKey = "2026-01".parse().unwrap();
        let c: MonthKey = "2026-02".parse().unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_from_datetime_zero_pads() {
        let date = Utc.with_ymd_and_hms(2026, 3, 7, 9, 30, 0).unwrap();
        let key = MonthKey::from_datetime(&date);
        assert_eq!(key.to_string(), "2026-03");
        assert!(key.contains(&date));
    }

    #[test]
    fn test_start_datetime_is_inside_month() {
        let key: MonthKey = "2026-02".parse().unwrap();
        assert!(key.contains(&key.start_datetime()));
    }

    #[test]
    fn test_serde_as_string() {
        let key: MonthKey = "2026-03".parse().unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"2026-03\"");
        let parsed: MonthKey = serde_json::from_str("\"2026-03\"").unwrap();
        assert_eq!(parsed, key);
    }
}

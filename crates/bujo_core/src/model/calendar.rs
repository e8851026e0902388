//! Calendar arithmetic used by migration gating and archival.
//!
//! # Responsibility
//! - Derive day boundaries from local wall-clock timestamps.
//! - Model calendar months with year rollover and stable naming.
//!
//! # Invariants
//! - All timestamps are local wall-clock `NaiveDateTime`; no timezone math.
//! - `end_of_day` is inclusive (last millisecond of the day).
//! - `YearMonth::previous` of January is December of the prior year.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt::{Display, Formatter};

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Returns midnight of the calendar day containing `value`.
pub fn start_of_day(value: NaiveDateTime) -> NaiveDateTime {
    value.date().and_time(NaiveTime::MIN)
}

/// Returns the last representable millisecond of `value`'s calendar day.
pub fn end_of_day(value: NaiveDateTime) -> NaiveDateTime {
    start_of_day(value) + Duration::days(1) - Duration::milliseconds(1)
}

/// One calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// Builds a month from raw parts, rejecting month numbers outside 1..=12.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// Month containing the given day.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    pub fn previous(self) -> Self {
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

    pub fn next(self) -> Self {
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

    /// English month name, e.g. `December`.
    pub fn month_name(self) -> &'static str {
        MONTH_NAMES[(self.month - 1) as usize]
    }

    /// Checkpoint key in `{year}-{month}` form with an unpadded month.
    pub fn key(self) -> String {
        format!("{}-{}", self.year, self.month)
    }

    /// Archive collection name in `{year}/{MonthName}` form.
    pub fn archive_name(self) -> String {
        format!("{}/{}", self.year, self.month_name())
    }

    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// Half-open `[start, end)` bounds covering the whole month.
    ///
    /// Returns `None` only for years outside chrono's representable range.
    pub fn bounds(self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let start = self.first_day()?.and_time(NaiveTime::MIN);
        let end = self.next().first_day()?.and_time(NaiveTime::MIN);
        Some((start, end))
    }
}

impl Display for YearMonth {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

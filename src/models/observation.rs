use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A single dated scalar observation of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub observed_at: NaiveDateTime,
    pub value: f64,
}

impl Observation {
    pub fn new(observed_at: NaiveDateTime, value: f64) -> Self {
        Self { observed_at, value }
    }
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Build a range, swapping the bounds if given in reverse.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Start of the first day, as a timestamp.
    pub fn start_datetime(&self) -> NaiveDateTime {
        self.start.and_hms_opt(0, 0, 0).unwrap_or_default()
    }

    /// First instant after the last day.
    pub fn end_datetime_exclusive(&self) -> NaiveDateTime {
        (self.end + Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
    }

    /// The range moved back by `hours`, widened to whole days.
    ///
    /// Input series are loaded over this window so that a lagged input
    /// observation can still pair with an output inside the requested range.
    /// `None` when the start would fall outside the calendar.
    pub fn shifted_back(&self, hours: i64) -> Option<Self> {
        let days = hours.max(0).saturating_add(23) / 24;
        let start = self.start.checked_sub_signed(Duration::try_days(days)?)?;
        Some(Self { start, end: self.end })
    }
}

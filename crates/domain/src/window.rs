//! Rental windows and half-open time intervals.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when building a time window.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    /// The window ends at or before it starts.
    #[error("window must end after it starts ({start} .. {end})")]
    Empty {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// The local time does not exist in the timezone (DST spring-forward gap).
    #[error("local time {local} does not exist in {timezone}")]
    NonexistentLocalTime { local: NaiveDateTime, timezone: Tz },
}

/// A half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window, rejecting `end <= start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if end <= start {
            return Err(WindowError::Empty { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Half-open intersection: `[a,b)` and `[c,d)` overlap iff `a < d && c < b`.
    ///
    /// Back-to-back windows sharing a boundary instant do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns the window grown by `before` at the start and `after` at the end.
    pub fn expand(&self, before: Duration, after: Duration) -> TimeWindow {
        TimeWindow {
            start: self.start - before,
            end: self.end + after,
        }
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} .. {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// A rental window as the customer expresses it: a local date, start and
/// end times, and the business's IANA timezone.
///
/// `end_date` covers overnight or multi-day rentals; when absent the window
/// ends on `date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalWindow {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub timezone: Tz,
}

impl RentalWindow {
    /// Creates a same-day rental window.
    pub fn new(date: NaiveDate, start_time: NaiveTime, end_time: NaiveTime, timezone: Tz) -> Self {
        Self {
            date,
            start_time,
            end_time,
            end_date: None,
            timezone,
        }
    }

    /// Sets a different end date for multi-day rentals.
    pub fn ending_on(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    /// Converts the local window to a UTC interval.
    ///
    /// Ambiguous local times (DST fall-back) resolve to the earliest instant.
    pub fn to_utc(&self) -> Result<TimeWindow, WindowError> {
        let start = localize(self.date.and_time(self.start_time), self.timezone)?;
        let end_date = self.end_date.unwrap_or(self.date);
        let end = localize(end_date.and_time(self.end_time), self.timezone)?;
        TimeWindow::new(start, end)
    }
}

fn localize(local: NaiveDateTime, timezone: Tz) -> Result<DateTime<Utc>, WindowError> {
    timezone
        .from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or(WindowError::NonexistentLocalTime { local, timezone })
}

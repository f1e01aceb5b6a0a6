//! HTTP route handlers.

pub mod availability;
pub mod bookings;
pub mod health;
pub mod holds;
pub mod metrics;
pub mod stream;
pub mod webhooks;

use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use domain::RentalWindow;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

/// A rental window as clients send it: local date and wall-clock times in
/// an IANA timezone.
#[derive(Debug, Deserialize)]
pub struct WindowParams {
    pub date: NaiveDate,
    pub start: String,
    pub end: String,
    /// Last day of an overnight or multi-day rental.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub timezone: String,
}

impl WindowParams {
    pub fn to_window(&self) -> Result<RentalWindow, ApiError> {
        let timezone: Tz = self
            .timezone
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("Unknown timezone: {}", self.timezone)))?;
        let mut window = RentalWindow::new(
            self.date,
            parse_time(&self.start)?,
            parse_time(&self.end)?,
            timezone,
        );
        window.end_date = self.end_date;
        Ok(window)
    }
}

/// Accepts `HH:MM` and `HH:MM:SS`.
fn parse_time(raw: &str) -> Result<NaiveTime, ApiError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| ApiError::BadRequest(format!("Invalid time '{raw}', expected HH:MM")))
}

/// Parses a path segment into one of the typed ids.
pub(crate) fn parse_id<T: From<Uuid>>(raw: &str, kind: &str) -> Result<T, ApiError> {
    Uuid::parse_str(raw)
        .map(T::from)
        .map_err(|e| ApiError::BadRequest(format!("Invalid {kind} id: {e}")))
}

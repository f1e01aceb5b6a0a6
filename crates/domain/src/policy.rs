//! Per-business booking rules.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MIN_NOTICE_HOURS: u32 = 24;
pub const DEFAULT_MAX_NOTICE_HOURS: u32 = 2160;

/// Buffers, notice window, tax and deposit settings for one business.
///
/// A business without stored settings uses [`BusinessPolicy::default`]:
/// no buffers, 24h to 2160h notice, no tax, no deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessPolicy {
    /// Setup time reserved before each rental starts.
    pub buffer_before_minutes: u32,
    /// Teardown time reserved after each rental ends.
    pub buffer_after_minutes: u32,
    pub min_notice_hours: u32,
    pub max_notice_hours: u32,
    /// Sales tax in basis points (825 = 8.25%).
    pub tax_rate_bps: u32,
    /// Upfront share of the total charged at checkout, if any.
    pub deposit_percent: Option<u8>,
}

impl Default for BusinessPolicy {
    fn default() -> Self {
        Self {
            buffer_before_minutes: 0,
            buffer_after_minutes: 0,
            min_notice_hours: DEFAULT_MIN_NOTICE_HOURS,
            max_notice_hours: DEFAULT_MAX_NOTICE_HOURS,
            tax_rate_bps: 0,
            deposit_percent: None,
        }
    }
}

impl BusinessPolicy {
    /// Sets both buffers in whole hours, saturating at `u32::MAX` minutes.
    pub fn with_buffer_hours(mut self, before: u32, after: u32) -> Self {
        self.buffer_before_minutes = before.saturating_mul(60);
        self.buffer_after_minutes = after.saturating_mul(60);
        self
    }

    pub fn with_notice_hours(mut self, min: u32, max: u32) -> Self {
        self.min_notice_hours = min;
        self.max_notice_hours = max;
        self
    }

    pub fn with_tax_rate_bps(mut self, bps: u32) -> Self {
        self.tax_rate_bps = bps;
        self
    }

    pub fn with_deposit_percent(mut self, percent: u8) -> Self {
        self.deposit_percent = Some(percent.min(100));
        self
    }

    pub fn buffer_before(&self) -> Duration {
        Duration::minutes(i64::from(self.buffer_before_minutes))
    }

    pub fn buffer_after(&self) -> Duration {
        Duration::minutes(i64::from(self.buffer_after_minutes))
    }

    /// Checks that `start` lies inside the notice window relative to `now`.
    ///
    /// Both bounds are inclusive. Violations are reported, never clamped.
    pub fn check_notice(
        &self,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), NoticeViolation> {
        let earliest = now + Duration::hours(i64::from(self.min_notice_hours));
        let latest = now + Duration::hours(i64::from(self.max_notice_hours));

        if start < earliest {
            return Err(NoticeViolation::TooSoon {
                min_notice_hours: self.min_notice_hours,
                earliest,
            });
        }
        if start > latest {
            return Err(NoticeViolation::TooFar {
                max_notice_hours: self.max_notice_hours,
                latest,
            });
        }
        Ok(())
    }
}

/// A requested start that falls outside the business's notice window.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum NoticeViolation {
    #[error("bookings require at least {min_notice_hours}h notice (earliest start {earliest})")]
    TooSoon {
        min_notice_hours: u32,
        earliest: DateTime<Utc>,
    },

    #[error("bookings can be made at most {max_notice_hours}h ahead (latest start {latest})")]
    TooFar {
        max_notice_hours: u32,
        latest: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn defaults_match_documented_values() {
        let policy = BusinessPolicy::default();
        assert_eq!(policy.buffer_before(), Duration::zero());
        assert_eq!(policy.buffer_after(), Duration::zero());
        assert_eq!(policy.min_notice_hours, 24);
        assert_eq!(policy.max_notice_hours, 2160);
        assert_eq!(policy.deposit_percent, None);
    }

    #[test]
    fn buffer_hours_saturate_instead_of_overflowing() {
        let policy = BusinessPolicy::default().with_buffer_hours(u32::MAX, 2);
        assert_eq!(policy.buffer_before_minutes, u32::MAX);
        assert_eq!(policy.buffer_after(), Duration::hours(2));
    }

    #[test]
    fn notice_bounds_are_inclusive() {
        let policy = BusinessPolicy::default();
        assert!(policy.check_notice(now() + Duration::hours(24), now()).is_ok());
        assert!(policy.check_notice(now() + Duration::hours(2160), now()).is_ok());
    }

    #[test]
    fn too_soon_is_reported() {
        let policy = BusinessPolicy::default();
        let err = policy
            .check_notice(now() + Duration::hours(23), now())
            .unwrap_err();
        assert!(matches!(err, NoticeViolation::TooSoon { min_notice_hours: 24, .. }));
    }

    #[test]
    fn too_far_is_reported() {
        let policy = BusinessPolicy::default().with_notice_hours(0, 48);
        let err = policy
            .check_notice(now() + Duration::hours(49), now())
            .unwrap_err();
        assert!(matches!(err, NoticeViolation::TooFar { max_notice_hours: 48, .. }));
    }

    #[test]
    fn buffer_hours_are_stored_as_minutes() {
        let policy = BusinessPolicy::default().with_buffer_hours(2, 3);
        assert_eq!(policy.buffer_before_minutes, 120);
        assert_eq!(policy.buffer_after(), Duration::hours(3));
    }
}

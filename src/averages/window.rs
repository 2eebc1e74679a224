//! Trailing window boundaries aligned to calendar midnights

use super::error::AveragesError;
use chrono::{DateTime, Days, FixedOffset, Months, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Day,
    Week,
    Month,
}

impl Window {
    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Day => "day",
            Window::Week => "week",
            Window::Month => "month",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "day" => Some(Window::Day),
            "week" => Some(Window::Week),
            "month" => Some(Window::Month),
            _ => None,
        }
    }

    /// Shortest first. Consumers rely on this order for display.
    pub fn all() -> [Window; 3] {
        [Window::Day, Window::Week, Window::Month]
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window starts and the bucket anchor for one value of "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    pub now: DateTime<Utc>,
    pub anchor: DateTime<Utc>,
    day_start: DateTime<Utc>,
    week_start: DateTime<Utc>,
    month_start: DateTime<Utc>,
}

impl WindowPlan {
    pub fn start(&self, window: Window) -> DateTime<Utc> {
        match window {
            Window::Day => self.day_start,
            Window::Week => self.week_start,
            Window::Month => self.month_start,
        }
    }
}

/// Computes window starts in a fixed-offset calendar.
///
/// Every start is a local midnight: the previous day, seven days back, and
/// one calendar month back (clamped to the shorter month, so 31 March
/// becomes 28/29 February). Nothing is cached because "now" moves.
///
/// The offset never changes, so there are no daylight-saving rules: in a
/// zone that observes DST, midnights computed with the standard offset are
/// an hour off for the part of the year when summer time applies. Pick the
/// offset in effect for the period being reported.
#[derive(Debug, Clone, Copy)]
pub struct WindowCalculator {
    calendar: FixedOffset,
}

impl WindowCalculator {
    pub fn new(calendar: FixedOffset) -> Self {
        Self { calendar }
    }

    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }

    pub fn calendar(&self) -> FixedOffset {
        self.calendar
    }

    pub fn window_start(
        &self,
        window: Window,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, AveragesError> {
        let today = self.local_date(now);
        let start_day = match window {
            Window::Day => today.checked_sub_days(Days::new(1)),
            Window::Week => today.checked_sub_days(Days::new(7)),
            Window::Month => today.checked_sub_months(Months::new(1)),
        }
        .ok_or_else(|| {
            AveragesError::InvariantViolation(format!(
                "calendar cannot step back one {} from {}",
                window, today
            ))
        })?;

        self.midnight(start_day)
    }

    /// Most recent local midnight at or before `now`.
    pub fn anchor(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, AveragesError> {
        self.midnight(self.local_date(now))
    }

    pub fn plan(&self, now: DateTime<Utc>) -> Result<WindowPlan, AveragesError> {
        Ok(WindowPlan {
            now,
            anchor: self.anchor(now)?,
            day_start: self.window_start(Window::Day, now)?,
            week_start: self.window_start(Window::Week, now)?,
            month_start: self.window_start(Window::Month, now)?,
        })
    }

    fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.calendar).date_naive()
    }

    fn midnight(&self, day: NaiveDate) -> Result<DateTime<Utc>, AveragesError> {
        self.calendar
            .from_local_datetime(&day.and_time(NaiveTime::MIN))
            .single()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| {
                AveragesError::InvariantViolation(format!("no unique midnight on {}", day))
            })
    }
}

impl Default for WindowCalculator {
    fn default() -> Self {
        Self::utc()
    }
}

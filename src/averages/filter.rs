//! Range filters handed to the data source

use super::error::AveragesError;
use chrono::{DateTime, Utc};

/// Inclusive start, exclusive end. `end == None` means "up to the present,
/// including samples that arrive later".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeFilter {
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
}

impl RangeFilter {
    /// Open-ended filter from a window start. The start must not lie in the
    /// future.
    pub fn since(window_start: DateTime<Utc>, now: DateTime<Utc>) -> Result<Self, AveragesError> {
        if window_start > now {
            return Err(AveragesError::InvariantViolation(format!(
                "window start {} is after now {}",
                window_start, now
            )));
        }

        Ok(Self {
            start: window_start,
            end: None,
        })
    }

    /// Closed-open filter `[start, end)`.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, AveragesError> {
        if start >= end {
            return Err(AveragesError::InvariantViolation(format!(
                "range start {} is not before end {}",
                start, end
            )));
        }

        Ok(Self {
            start,
            end: Some(end),
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.end
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && self.end.map_or(true, |end| timestamp < end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 4, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_since_is_open_ended() {
        let filter = RangeFilter::since(ts(9, 0), ts(10, 12)).unwrap();

        assert_eq!(filter.start(), ts(9, 0));
        assert_eq!(filter.end(), None);
        assert!(filter.contains(ts(9, 0)));
        assert!(filter.contains(ts(10, 12)));
        // Samples arriving after the filter was built still match
        assert!(filter.contains(ts(20, 0)));
        assert!(!filter.contains(ts(8, 23)));
    }

    #[test]
    fn test_since_rejects_future_start() {
        let err = RangeFilter::since(ts(11, 0), ts(10, 12)).unwrap_err();
        assert!(matches!(err, AveragesError::InvariantViolation(_)));
    }

    #[test]
    fn test_between_excludes_end() {
        let filter = RangeFilter::between(ts(3, 0), ts(4, 0)).unwrap();

        assert!(filter.contains(ts(3, 23)));
        assert!(!filter.contains(ts(4, 0)));
        assert!(RangeFilter::between(ts(4, 0), ts(4, 0)).is_err());
    }
}

//! Data source contract for range-filtered statistics queries
//!
//! A source answers one statistics request with an initial bucketed
//! collection, then keeps pushing recomputed collections through the
//! returned update stream until the subscription is cancelled.

pub mod sqlite_store;

pub use sqlite_store::SqliteSampleStore;

use crate::averages::RangeFilter;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum SourceError {
    Database(rusqlite::Error),
    Unauthorized(String),
    InvalidSample(String),
    Unavailable(String),
}

impl From<rusqlite::Error> for SourceError {
    fn from(err: rusqlite::Error) -> Self {
        SourceError::Database(err)
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Database(e) => write!(f, "Database error: {}", e),
            SourceError::Unauthorized(metric) => write!(f, "Not authorized to read: {}", metric),
            SourceError::InvalidSample(msg) => write!(f, "Invalid sample: {}", msg),
            SourceError::Unavailable(msg) => write!(f, "Data source unavailable: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// Mean-per-bucket statistics request.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsRequest {
    pub metric_id: String,
    pub filter: RangeFilter,
    pub anchor: DateTime<Utc>,
    pub bucket: Duration,
}

impl StatisticsRequest {
    /// Calendar-day buckets counted from `anchor`.
    pub fn daily_mean(metric_id: &str, filter: RangeFilter, anchor: DateTime<Utc>) -> Self {
        Self {
            metric_id: metric_id.to_string(),
            filter,
            anchor,
            bucket: Duration::days(1),
        }
    }
}

/// Sum and count of the samples in `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketStatistics {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub sum: f64,
    pub count: u64,
}

impl BucketStatistics {
    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticsCollection {
    pub buckets: Vec<BucketStatistics>,
}

impl StatisticsCollection {
    pub fn new(buckets: Vec<BucketStatistics>) -> Self {
        Self { buckets }
    }

    /// Collapse every bucket into one sample-weighted mean.
    pub fn overall_average(&self) -> Option<f64> {
        let (sum, count) = self
            .buckets
            .iter()
            .fold((0.0, 0u64), |(sum, count), b| (sum + b.sum, count + b.count));

        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}

/// Recomputed statistics pushed after new matching samples were ingested.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsUpdate {
    pub metric_id: String,
    pub collection: StatisticsCollection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Initial answer plus the live update stream of one request.
#[derive(Debug)]
pub struct LiveStatistics {
    pub handle: SubscriptionHandle,
    pub initial: StatisticsCollection,
    pub updates: mpsc::UnboundedReceiver<StatisticsUpdate>,
}

#[async_trait]
pub trait HealthDataSource: Send + Sync {
    /// Whether read access to `metric_id` has been granted
    async fn request_read_access(&self, metric_id: &str) -> Result<bool, SourceError>;

    /// Run a statistics request and keep it subscribed for updates
    async fn execute(&self, request: StatisticsRequest) -> Result<LiveStatistics, SourceError>;

    /// Stop delivering updates for a subscription. Unknown handles are ignored.
    fn cancel(&self, handle: SubscriptionHandle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bucket(day: u32, sum: f64, count: u64) -> BucketStatistics {
        let start = Utc.with_ymd_and_hms(2023, 4, day, 0, 0, 0).unwrap();
        BucketStatistics {
            start,
            end: start + Duration::days(1),
            sum,
            count,
        }
    }

    #[test]
    fn test_overall_average_weights_by_sample_count() {
        // Day 1: three samples averaging 1.0, day 2: one sample of 2.0
        let collection = StatisticsCollection::new(vec![bucket(1, 3.0, 3), bucket(2, 2.0, 1)]);

        assert_eq!(collection.overall_average(), Some(1.25));
        assert_eq!(collection.buckets[0].average(), Some(1.0));
    }

    #[test]
    fn test_empty_collection_has_no_average() {
        assert_eq!(StatisticsCollection::default().overall_average(), None);
        assert_eq!(
            StatisticsCollection::new(vec![bucket(1, 0.0, 0)]).overall_average(),
            None
        );
    }
}

//! One window's statistics query and its live-update subscription

use super::error::AveragesError;
use super::filter::RangeFilter;
use super::types::{AggregateResult, MetricSpec};
use super::window::Window;
use crate::source::{
    HealthDataSource, LiveStatistics, StatisticsCollection, StatisticsRequest, SubscriptionHandle,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Timestamp function (swapped for a fixed clock in tests)
pub type NowFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> NowFn {
    Arc::new(Utc::now)
}

/// Daily-mean query for a single window.
///
/// `run` delivers the initial mean once, then keeps forwarding recomputed
/// means for as long as the returned [`LiveQuery`] is held.
pub struct AggregationQuery {
    window: Window,
    metric: MetricSpec,
    filter: RangeFilter,
    anchor: DateTime<Utc>,
    now_fn: NowFn,
}

/// Active subscription of a query that completed its initial round.
pub struct LiveQuery {
    window: Window,
    handle: SubscriptionHandle,
    forwarder: JoinHandle<()>,
}

impl LiveQuery {
    pub fn window(&self) -> Window {
        self.window
    }

    /// Cancel the subscription at the source and stop forwarding updates
    pub fn release(self, source: &dyn HealthDataSource) {
        source.cancel(self.handle);
        self.forwarder.abort();
        log::debug!("Released {} subscription {:?}", self.window, self.handle);
    }
}

impl AggregationQuery {
    pub fn new(
        window: Window,
        metric: MetricSpec,
        filter: RangeFilter,
        anchor: DateTime<Utc>,
        now_fn: NowFn,
    ) -> Self {
        Self {
            window,
            metric,
            filter,
            anchor,
            now_fn,
        }
    }

    pub fn window(&self) -> Window {
        self.window
    }

    fn to_result(&self, collection: &StatisticsCollection) -> AggregateResult {
        AggregateResult {
            window: self.window,
            range_start: self.filter.start(),
            range_end: (self.now_fn)(),
            average: collection
                .overall_average()
                .map(|mean| self.metric.unit().convert(mean)),
        }
    }

    /// Issue the query, deliver the initial result, then subscribe.
    ///
    /// On failure nothing is delivered; the error only tells the caller
    /// which window went quiet.
    pub async fn run<I, U>(
        self,
        source: Arc<dyn HealthDataSource>,
        on_initial: I,
        on_update: U,
    ) -> Result<LiveQuery, AveragesError>
    where
        I: FnOnce(AggregateResult),
        U: Fn(AggregateResult) + Send + 'static,
    {
        let request =
            StatisticsRequest::daily_mean(self.metric.identifier(), self.filter, self.anchor);

        let LiveStatistics {
            handle,
            initial,
            mut updates,
        } = source
            .execute(request)
            .await
            .map_err(|e| AveragesError::QueryFailed {
                window: self.window,
                reason: e.to_string(),
            })?;

        on_initial(self.to_result(&initial));

        let window = self.window;
        let forwarder = tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                // Ignore updates for a quantity this query is not tracking
                if update.metric_id != self.metric.identifier() {
                    log::debug!(
                        "Ignoring {} update for {} on {} query",
                        update.metric_id,
                        self.window,
                        self.metric.identifier()
                    );
                    continue;
                }
                on_update(self.to_result(&update.collection));
            }
        });

        Ok(LiveQuery {
            window,
            handle,
            forwarder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::averages::{Sample, SpeedUnit};
    use crate::source::SqliteSampleStore;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 4, day, hour, 0, 0).unwrap()
    }

    fn fixed_clock() -> NowFn {
        Arc::new(|| ts(10, 12))
    }

    fn day_query(metric: MetricSpec) -> AggregationQuery {
        AggregationQuery::new(
            Window::Day,
            metric,
            RangeFilter::since(ts(9, 0), ts(10, 12)).unwrap(),
            ts(10, 0),
            fixed_clock(),
        )
    }

    #[tokio::test]
    async fn test_initial_then_updates() {
        let store = Arc::new(SqliteSampleStore::open_in_memory().unwrap());
        store.grant_read_access("walking_speed");
        store.insert_sample("walking_speed", Sample::new(ts(9, 8), 1.2)).unwrap();

        let initial = Arc::new(Mutex::new(None));
        let initial_slot = initial.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let live = day_query(MetricSpec::walking_speed())
            .run(
                store.clone(),
                move |r| *initial_slot.lock().unwrap() = Some(r),
                move |r| {
                    let _ = tx.send(r);
                },
            )
            .await
            .unwrap();

        let first = initial.lock().unwrap().clone().unwrap();
        assert_eq!(first.window, Window::Day);
        assert_eq!(first.range_start, ts(9, 0));
        assert_eq!(first.range_end, ts(10, 12));
        assert_eq!(first.average, Some(1.2));

        store.insert_sample("walking_speed", Sample::new(ts(10, 9), 1.4)).unwrap();
        let update = rx.recv().await.unwrap();
        assert!((update.average.unwrap() - 1.3).abs() < 1e-9);

        live.release(store.as_ref());
        assert_eq!(store.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_average_reported_in_configured_unit() {
        let store = Arc::new(SqliteSampleStore::open_in_memory().unwrap());
        store.grant_read_access("walking_speed");
        store.insert_sample("walking_speed", Sample::new(ts(9, 8), 1.0)).unwrap();

        let metric = MetricSpec::new("walking_speed", "km/h").unwrap();
        assert_eq!(metric.unit(), SpeedUnit::KilometersPerHour);

        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        day_query(metric)
            .run(store, move |r| *slot.lock().unwrap() = r.average, |_| {})
            .await
            .unwrap();

        let average = seen.lock().unwrap().unwrap();
        assert!((average - 3.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_query_delivers_nothing() {
        // No read access granted
        let store = Arc::new(SqliteSampleStore::open_in_memory().unwrap());
        let delivered = Arc::new(Mutex::new(false));
        let flag = delivered.clone();

        let err = day_query(MetricSpec::walking_speed())
            .run(store, move |_| *flag.lock().unwrap() = true, |_| {})
            .await
            .err()
            .unwrap();

        assert!(matches!(err, AveragesError::QueryFailed { window: Window::Day, .. }));
        assert!(!*delivered.lock().unwrap());
    }

    #[tokio::test]
    async fn test_empty_window_has_no_average() {
        let store = Arc::new(SqliteSampleStore::open_in_memory().unwrap());
        store.grant_read_access("walking_speed");

        let seen = Arc::new(Mutex::new(Some(0.0)));
        let slot = seen.clone();
        day_query(MetricSpec::walking_speed())
            .run(store, move |r| *slot.lock().unwrap() = r.average, |_| {})
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), None);
    }
}

//! Aggregation coordinator - fans out one query per window and keeps the
//! latest result of each
//!
//! Every refresh opens a new epoch. Callbacks are tagged with the epoch and
//! window they were issued for; anything arriving for an older epoch is
//! counted and dropped without touching the result map or the sink.
//!
//! ```text
//! Idle ──refresh──▶ Querying(3) ──initial/failure──▶ Querying(2) … ──▶ Idle
//!   ▲                    │ refresh: new epoch, old subscriptions released
//!   └──── detach ───▶ Detached (results cleared, callbacks become no-ops)
//! ```

use super::error::AveragesError;
use super::filter::RangeFilter;
use super::query::{system_clock, AggregationQuery, LiveQuery, NowFn};
use super::sink::ResultSink;
use super::types::{AggregateResult, MetricSpec};
use super::window::{Window, WindowCalculator, WindowPlan};
use crate::source::HealthDataSource;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Querying { outstanding: usize },
    Detached,
}

/// Counters exposed for diagnostics and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub epoch: u64,
    pub delivered: u64,
    pub stale_dropped: u64,
    pub failed_queries: u64,
}

struct CoordinatorState {
    epoch: u64,
    phase: Phase,
    results: HashMap<Window, AggregateResult>,
    live: Vec<LiveQuery>,
    stats: CoordinatorStats,
}

impl CoordinatorState {
    fn new() -> Self {
        Self {
            epoch: 0,
            phase: Phase::Idle,
            results: HashMap::new(),
            live: Vec::new(),
            stats: CoordinatorStats::default(),
        }
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.stats.epoch = self.epoch;
        self.epoch
    }

    fn complete_one(&mut self) {
        if let Phase::Querying { outstanding } = self.phase {
            self.phase = if outstanding <= 1 {
                Phase::Idle
            } else {
                Phase::Querying {
                    outstanding: outstanding - 1,
                }
            };
        }
    }
}

type SharedState = Arc<Mutex<CoordinatorState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, CoordinatorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryKind {
    Initial,
    Update,
}

/// Callback target of one (epoch, window) pair
#[derive(Clone)]
struct Delivery {
    state: SharedState,
    sink: Arc<dyn ResultSink>,
    epoch: u64,
    window: Window,
}

impl Delivery {
    fn deliver(&self, result: AggregateResult, kind: DeliveryKind) {
        let mut state = lock(&self.state);

        if state.epoch != self.epoch {
            state.stats.stale_dropped += 1;
            let stale = AveragesError::StaleDelivery {
                epoch: self.epoch,
                current: state.epoch,
                window: self.window,
            };
            log::debug!("Dropped {:?} delivery: {}", kind, stale);
            return;
        }

        self.sink.on_data_changed(self.window, &result);
        state.results.insert(self.window, result);
        state.stats.delivered += 1;
        if kind == DeliveryKind::Initial {
            state.complete_one();
        }
    }
}

/// Keeps day/week/month averages of one metric current.
///
/// The metric and its reporting unit come from [`MetricSpec`]; the data
/// source and sink are shared trait objects so the same coordinator runs
/// against SQLite in production and scripted sources in tests.
pub struct AggregationCoordinator {
    metric: MetricSpec,
    source: Arc<dyn HealthDataSource>,
    sink: Arc<dyn ResultSink>,
    calculator: WindowCalculator,
    now_fn: NowFn,
    state: SharedState,
}

impl AggregationCoordinator {
    pub fn new(
        metric: MetricSpec,
        source: Arc<dyn HealthDataSource>,
        sink: Arc<dyn ResultSink>,
        calculator: WindowCalculator,
    ) -> Self {
        Self::new_with_clock(metric, source, sink, calculator, system_clock())
    }

    /// Create a coordinator with a custom timestamp function
    pub fn new_with_clock(
        metric: MetricSpec,
        source: Arc<dyn HealthDataSource>,
        sink: Arc<dyn ResultSink>,
        calculator: WindowCalculator,
        now_fn: NowFn,
    ) -> Self {
        Self {
            metric,
            source,
            sink,
            calculator,
            now_fn,
            state: Arc::new(Mutex::new(CoordinatorState::new())),
        }
    }

    pub fn metric(&self) -> &MetricSpec {
        &self.metric
    }

    /// Start a new refresh cycle and wait for every window's initial round.
    ///
    /// Returns the new epoch. Only a missing read grant (or a broken window
    /// calculation) fails the whole refresh; a failed window query is
    /// logged, counted, and leaves that window's previous value in place.
    pub async fn refresh(&self) -> Result<u64, AveragesError> {
        let metric_id = self.metric.identifier();

        let granted = match self.source.request_read_access(metric_id).await {
            Ok(granted) => granted,
            Err(e) => {
                log::warn!("⚠️  Read access check failed for {}: {}", metric_id, e);
                false
            }
        };
        if !granted {
            log::info!("🔒 Read access for {} not granted, nothing to refresh", metric_id);
            return Err(AveragesError::AccessDenied {
                metric: metric_id.to_string(),
            });
        }

        let now = (self.now_fn)();
        let plan = self.calculator.plan(now)?;
        let day = self.query(Window::Day, &plan)?;
        let week = self.query(Window::Week, &plan)?;
        let month = self.query(Window::Month, &plan)?;

        let (epoch, superseded) = {
            let mut state = lock(&self.state);
            let epoch = state.next_epoch();
            state.phase = Phase::Querying { outstanding: 3 };
            (epoch, std::mem::take(&mut state.live))
        };
        self.release_all(superseded);

        log::info!(
            "🔄 Refresh epoch {} for {} (anchor {})",
            epoch,
            metric_id,
            plan.anchor
        );

        let (day, week, month) = tokio::join!(
            self.launch(day, epoch),
            self.launch(week, epoch),
            self.launch(month, epoch),
        );
        let launched: Vec<LiveQuery> = [day, week, month].into_iter().flatten().collect();

        let leftover = {
            let mut state = lock(&self.state);
            if state.epoch == epoch {
                state.live.extend(launched);
                Vec::new()
            } else {
                launched
            }
        };
        if !leftover.is_empty() {
            log::debug!(
                "Epoch {} superseded mid-refresh, releasing {} subscriptions",
                epoch,
                leftover.len()
            );
            self.release_all(leftover);
        }

        Ok(epoch)
    }

    /// Release every subscription and clear the results. Deliveries still in
    /// flight become no-ops. A later `refresh` starts over.
    pub fn detach(&self) {
        let released = {
            let mut state = lock(&self.state);
            state.next_epoch();
            state.phase = Phase::Detached;
            state.results.clear();
            std::mem::take(&mut state.live)
        };

        let count = released.len();
        self.release_all(released);
        log::info!(
            "👋 Detached {} averages, released {} subscriptions",
            self.metric.identifier(),
            count
        );
    }

    /// Current entries, ordered day, week, month
    pub fn results(&self) -> Vec<AggregateResult> {
        let state = lock(&self.state);
        Window::all()
            .iter()
            .filter_map(|window| state.results.get(window).cloned())
            .collect()
    }

    pub fn result(&self, window: Window) -> Option<AggregateResult> {
        lock(&self.state).results.get(&window).cloned()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.state).phase
    }

    pub fn stats(&self) -> CoordinatorStats {
        lock(&self.state).stats
    }

    pub fn live_subscriptions(&self) -> usize {
        lock(&self.state).live.len()
    }

    fn query(&self, window: Window, plan: &WindowPlan) -> Result<AggregationQuery, AveragesError> {
        let filter = RangeFilter::since(plan.start(window), plan.now)?;
        Ok(AggregationQuery::new(
            window,
            self.metric.clone(),
            filter,
            plan.anchor,
            self.now_fn.clone(),
        ))
    }

    fn delivery(&self, epoch: u64, window: Window) -> Delivery {
        Delivery {
            state: self.state.clone(),
            sink: self.sink.clone(),
            epoch,
            window,
        }
    }

    async fn launch(&self, query: AggregationQuery, epoch: u64) -> Option<LiveQuery> {
        let window = query.window();
        let initial = self.delivery(epoch, window);
        let update = initial.clone();

        let outcome = query
            .run(
                self.source.clone(),
                move |result| initial.deliver(result, DeliveryKind::Initial),
                move |result| update.deliver(result, DeliveryKind::Update),
            )
            .await;

        match outcome {
            Ok(live) => Some(live),
            Err(e) => {
                log::warn!("⚠️  {} (keeping previous value)", e);
                let mut state = lock(&self.state);
                if state.epoch == epoch {
                    state.stats.failed_queries += 1;
                    state.complete_one();
                }
                None
            }
        }
    }

    fn release_all(&self, queries: Vec<LiveQuery>) {
        for query in queries {
            query.release(self.source.as_ref());
        }
    }
}

impl Drop for AggregationCoordinator {
    fn drop(&mut self) {
        let live = std::mem::take(&mut lock(&self.state).live);
        self.release_all(live);
    }
}

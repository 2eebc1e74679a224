//! SQLite-backed sample store with live statistics subscriptions
//!
//! Samples are kept in a single `samples` table keyed by metric. Every
//! `execute` registers a subscription; inserts recompute the statistics of
//! each subscription whose filter matches one of the new samples and push
//! the result down its channel.

use super::{
    BucketStatistics, HealthDataSource, LiveStatistics, SourceError, StatisticsCollection,
    StatisticsRequest, StatisticsUpdate, SubscriptionHandle,
};
use crate::averages::Sample;
use async_trait::async_trait;
use chrono::Duration;
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS samples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        metric TEXT NOT NULL,
        timestamp_ms INTEGER NOT NULL,
        value REAL NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_samples_metric_ts ON samples (metric, timestamp_ms);
";

struct Subscription {
    request: StatisticsRequest,
    tx: mpsc::UnboundedSender<StatisticsUpdate>,
}

pub struct SqliteSampleStore {
    conn: Mutex<Connection>,
    granted: Mutex<HashSet<String>>,
    subscriptions: Mutex<HashMap<SubscriptionHandle, Subscription>>,
    next_handle: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SqliteSampleStore {
    /// Open (or create) a store on disk in WAL mode
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let conn = Connection::open(db_path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        log::info!("📊 Opened sample store: {}", db_path.as_ref().display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, SourceError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, SourceError> {
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
            granted: Mutex::new(HashSet::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    pub fn grant_read_access(&self, metric_id: &str) {
        lock(&self.granted).insert(metric_id.to_string());
        log::info!("🔓 Read access granted: {}", metric_id);
    }

    pub fn revoke_read_access(&self, metric_id: &str) {
        lock(&self.granted).remove(metric_id);
        log::info!("🔒 Read access revoked: {}", metric_id);
    }

    fn is_granted(&self, metric_id: &str) -> bool {
        lock(&self.granted).contains(metric_id)
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.subscriptions).len()
    }

    /// Insert one sample. Returns how many live subscriptions were updated.
    pub fn insert_sample(&self, metric_id: &str, sample: Sample) -> Result<usize, SourceError> {
        self.insert_samples(metric_id, &[sample])
    }

    /// Insert a batch in one transaction. Each affected subscription gets a
    /// single update for the whole batch.
    pub fn insert_samples(&self, metric_id: &str, samples: &[Sample]) -> Result<usize, SourceError> {
        if let Some(bad) = samples.iter().find(|s| !s.value.is_finite()) {
            return Err(SourceError::InvalidSample(format!(
                "non-finite value {} at {}",
                bad.value, bad.timestamp
            )));
        }
        if samples.is_empty() {
            return Ok(0);
        }

        {
            let mut conn = lock(&self.conn);
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO samples (metric, timestamp_ms, value) VALUES (?1, ?2, ?3)",
                )?;
                for sample in samples {
                    stmt.execute(params![
                        metric_id,
                        sample.timestamp.timestamp_millis(),
                        sample.value
                    ])?;
                }
            }
            tx.commit()?;
        }

        log::debug!("📥 Stored {} samples for {}", samples.len(), metric_id);
        Ok(self.notify(metric_id, samples))
    }

    fn notify(&self, metric_id: &str, samples: &[Sample]) -> usize {
        let targets: Vec<_> = lock(&self.subscriptions)
            .iter()
            .filter(|(_, sub)| {
                sub.request.metric_id == metric_id
                    && samples.iter().any(|s| sub.request.filter.contains(s.timestamp))
            })
            .map(|(handle, sub)| (*handle, sub.request.clone(), sub.tx.clone()))
            .collect();

        let mut notified = 0;
        let mut closed = Vec::new();

        for (handle, request, tx) in targets {
            let collection = match self.compute(&request) {
                Ok(collection) => collection,
                Err(e) => {
                    log::warn!("⚠️  Failed to recompute subscription {:?}: {}", handle, e);
                    continue;
                }
            };

            let update = StatisticsUpdate {
                metric_id: request.metric_id,
                collection,
            };
            if tx.send(update).is_err() {
                closed.push(handle);
            } else {
                notified += 1;
            }
        }

        if !closed.is_empty() {
            let mut subscriptions = lock(&self.subscriptions);
            for handle in &closed {
                subscriptions.remove(handle);
            }
            log::debug!("Pruned {} closed subscriptions", closed.len());
        }

        notified
    }

    fn compute(&self, request: &StatisticsRequest) -> Result<StatisticsCollection, SourceError> {
        let bucket_ms = request.bucket.num_milliseconds().max(1);
        let anchor_ms = request.anchor.timestamp_millis();
        let start_ms = request.filter.start().timestamp_millis();
        let end_ms = request.filter.end().map(|end| end.timestamp_millis());

        let conn = lock(&self.conn);
        let mut stmt = conn.prepare_cached(
            "SELECT timestamp_ms, value FROM samples
             WHERE metric = ?1
               AND timestamp_ms >= ?2
               AND (?3 IS NULL OR timestamp_ms < ?3)
             ORDER BY timestamp_ms ASC",
        )?;
        let rows = stmt.query_map(params![request.metric_id, start_ms, end_ms], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?;

        // Floor division keeps samples before the anchor in negative buckets
        let mut buckets: BTreeMap<i64, (f64, u64)> = BTreeMap::new();
        for row in rows {
            let (timestamp_ms, value) = row?;
            let entry = buckets
                .entry((timestamp_ms - anchor_ms).div_euclid(bucket_ms))
                .or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }

        let buckets = buckets
            .into_iter()
            .map(|(index, (sum, count))| {
                let start = request.anchor + Duration::milliseconds(index * bucket_ms);
                BucketStatistics {
                    start,
                    end: start + request.bucket,
                    sum,
                    count,
                }
            })
            .collect();

        Ok(StatisticsCollection::new(buckets))
    }
}

#[async_trait]
impl HealthDataSource for SqliteSampleStore {
    async fn request_read_access(&self, metric_id: &str) -> Result<bool, SourceError> {
        Ok(self.is_granted(metric_id))
    }

    async fn execute(&self, request: StatisticsRequest) -> Result<LiveStatistics, SourceError> {
        if !self.is_granted(&request.metric_id) {
            return Err(SourceError::Unauthorized(request.metric_id));
        }

        // Register before computing so no insert can fall between the two
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (tx, updates) = mpsc::unbounded_channel();
        lock(&self.subscriptions).insert(
            handle,
            Subscription {
                request: request.clone(),
                tx,
            },
        );

        let initial = match self.compute(&request) {
            Ok(initial) => initial,
            Err(e) => {
                lock(&self.subscriptions).remove(&handle);
                return Err(e);
            }
        };

        log::debug!(
            "Subscription {:?} opened for {} from {}",
            handle,
            request.metric_id,
            request.filter.start()
        );

        Ok(LiveStatistics {
            handle,
            initial,
            updates,
        })
    }

    fn cancel(&self, handle: SubscriptionHandle) {
        if lock(&self.subscriptions).remove(&handle).is_some() {
            log::debug!("Subscription {:?} cancelled", handle);
        }
    }
}

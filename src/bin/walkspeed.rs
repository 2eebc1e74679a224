//! Walking Speed Averages - trailing day/week/month averages with live updates
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin walkspeed -- --import samples.jsonl
//! ```
//!
//! Samples are JSONL lines (`{"timestamp":"2023-04-09T08:00:00Z","value":1.2}`,
//! value in m/s). Lines piped into stdin while running are stored
//! immediately and update every window they fall into.
//!
//! ## Environment Variables
//!
//! - WALKSPEED_DB_PATH - SQLite database path (default: data/walkspeed.db)
//! - WALKSPEED_METRIC - Metric identifier (default: walking_speed)
//! - WALKSPEED_UNIT - Reporting unit: m/s, km/h, mph (default: m/s)
//! - WALKSPEED_UTC_OFFSET_MINUTES - Calendar offset for midnights (default: 0)
//! - WALKSPEED_REFRESH_INTERVAL_SECS - Full refresh interval (default: 300)
//! - WALKSPEED_GRANT_READ - Grant read access at startup (default: true)
//! - WALKSPEED_OUTPUT - log or jsonl (default: log)
//! - RUST_LOG - Logging level (optional, default: info)

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, Duration};
use walkspeed::averages::{
    AggregationCoordinator, AveragesError, JsonlSink, LogSink, MetricSpec, ResultSink, Sample,
    WindowCalculator,
};
use walkspeed::config::{Config, OutputFormat};
use walkspeed::source::SqliteSampleStore;

fn parse_import_from_args() -> Option<PathBuf> {
    let args: Vec<String> = env::args().collect();
    args.iter()
        .position(|x| x == "--import")
        .and_then(|idx| args.get(idx + 1))
        .map(PathBuf::from)
}

fn import_samples(
    store: &SqliteSampleStore,
    metric_id: &str,
    path: &Path,
) -> Result<usize, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    let mut samples = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match Sample::from_jsonl(line) {
            Ok(sample) => samples.push(sample),
            Err(e) => log::warn!("Skipping line {} of {}: {}", line_no + 1, path.display(), e),
        }
    }

    store.insert_samples(metric_id, &samples)?;
    Ok(samples.len())
}

async fn refresh(coordinator: &AggregationCoordinator) {
    match coordinator.refresh().await {
        Ok(epoch) => log::debug!("Refresh epoch {} complete", epoch),
        Err(AveragesError::AccessDenied { metric }) => {
            log::info!("No read access for {}, waiting for the next cycle", metric)
        }
        Err(e) => log::error!("❌ Refresh failed: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    let metric = MetricSpec::new(&config.metric_id, &config.unit)?;

    log::info!("🚀 Starting walking speed averages");
    log::info!("   Database: {}", config.db_path);
    log::info!("   Metric: {} ({})", metric.identifier(), metric.unit());
    log::info!("   Calendar offset: {} min", config.utc_offset_minutes);
    log::info!("   Refresh interval: {}s", config.refresh_interval_secs);

    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let store = Arc::new(SqliteSampleStore::open(&config.db_path)?);
    if config.grant_read {
        store.grant_read_access(metric.identifier());
    }

    if let Some(path) = parse_import_from_args() {
        let count = import_samples(&store, metric.identifier(), &path)?;
        log::info!("📥 Imported {} samples from {}", count, path.display());
    }

    let sink: Arc<dyn ResultSink> = match config.output {
        OutputFormat::Log => Arc::new(LogSink::new(metric.unit())),
        OutputFormat::Jsonl => Arc::new(JsonlSink::new(std::io::stdout())),
    };

    let coordinator = AggregationCoordinator::new(
        metric.clone(),
        store.clone(),
        sink,
        WindowCalculator::new(config.calendar()?),
    );

    let mut refresh_ticker = interval(Duration::from_secs(config.refresh_interval_secs));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    log::info!("✅ Running - pipe JSONL samples into stdin, Ctrl-C to stop");

    loop {
        tokio::select! {
            // First tick fires immediately
            _ = refresh_ticker.tick() => {
                refresh(&coordinator).await;
            }

            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match Sample::from_jsonl(&line) {
                        Ok(sample) => match store.insert_sample(metric.identifier(), sample) {
                            Ok(notified) => log::debug!("Sample stored, {} windows updating", notified),
                            Err(e) => log::warn!("⚠️  Sample rejected: {}", e),
                        },
                        Err(e) => log::warn!("Failed to parse sample: {} ({})", line, e),
                    },
                    Ok(None) => {
                        log::info!("stdin closed, live ingestion stopped");
                        stdin_open = false;
                    }
                    Err(e) => {
                        log::error!("stdin error: {}", e);
                        stdin_open = false;
                    }
                }
            }

            _ = &mut shutdown => {
                log::info!("Shutting down");
                break;
            }
        }
    }

    coordinator.detach();
    let stats = coordinator.stats();
    log::info!(
        "📊 {} epochs, {} deliveries, {} stale dropped, {} failed queries",
        stats.epoch,
        stats.delivered,
        stats.stale_dropped,
        stats.failed_queries
    );

    Ok(())
}

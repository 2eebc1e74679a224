//! Rolling Averages Core - windowed aggregation with live updates
//!
//! # Architecture
//!
//! ```text
//! WindowCalculator (day/week/month starts + anchor midnight)
//!     ↓
//! RangeFilter::since (open-ended [start, +∞) filter)
//!     ↓
//! AggregationQuery (daily-mean statistics, collapsed to one mean)
//!     ↓
//! AggregationCoordinator (upsert by window, discard stale epochs)
//!     ↓
//! ResultSink
//! ```
//!
//! The coordinator never owns a thread. Every delivery arrives from the data
//! source's update stream, is checked against the current epoch, and either
//! replaces the window's entry and notifies the sink, or is dropped.

pub mod coordinator;
pub mod error;
pub mod filter;
pub mod query;
pub mod sink;
pub mod types;
pub mod window;

pub use coordinator::{AggregationCoordinator, CoordinatorStats, Phase};
pub use error::AveragesError;
pub use filter::RangeFilter;
pub use query::{system_clock, AggregationQuery, LiveQuery, NowFn};
pub use sink::{ChannelSink, JsonlSink, LogSink, ResultSink};
pub use types::{AggregateResult, MetricSpec, Sample, SpeedUnit, WALKING_SPEED};
pub use window::{Window, WindowCalculator, WindowPlan};

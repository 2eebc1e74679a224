//! Trailing day/week/month averages of a single health metric (walking speed).
//!
//! The crate is split the same way the data flows:
//!
//! ```text
//! HealthDataSource (SQLite store or any other backend)
//!     ↓
//! AggregationQuery (one per window, initial result + live updates)
//!     ↓
//! AggregationCoordinator (per-window result map, epoch tagging)
//!     ↓
//! ResultSink (log, JSONL, channel)
//! ```

pub mod averages;
pub mod config;
pub mod source;

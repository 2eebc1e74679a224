//! Error taxonomy for the averaging core

use super::window::Window;

#[derive(Debug, Clone, PartialEq)]
pub enum AveragesError {
    /// Read access to the metric has not been granted. No query was issued.
    AccessDenied { metric: String },
    /// The data source rejected or failed one window's query.
    QueryFailed { window: Window, reason: String },
    /// A delivery arrived for a superseded epoch and was discarded.
    StaleDelivery { epoch: u64, current: u64, window: Window },
    /// A programming-contract failure (bad window start, bad metric config).
    InvariantViolation(String),
}

impl std::fmt::Display for AveragesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AveragesError::AccessDenied { metric } => {
                write!(f, "Read access not granted for metric: {}", metric)
            }
            AveragesError::QueryFailed { window, reason } => {
                write!(f, "Query failed for {} window: {}", window, reason)
            }
            AveragesError::StaleDelivery { epoch, current, window } => write!(
                f,
                "Stale delivery for {} window (epoch {}, current {})",
                window, epoch, current
            ),
            AveragesError::InvariantViolation(msg) => write!(f, "Invariant violation: {}", msg),
        }
    }
}

impl std::error::Error for AveragesError {}

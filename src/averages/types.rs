//! Samples, per-window results and the metric configuration

use super::error::AveragesError;
use super::window::Window;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;

/// Default metric identifier for walking speed samples.
pub const WALKING_SPEED: &str = "walking_speed";

/// A single timestamped measurement, stored in metres per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Parse a Sample from a JSONL line
    pub fn from_jsonl(line: &str) -> Result<Self, Box<dyn Error>> {
        let sample: Sample = serde_json::from_str(line)?;
        Ok(sample)
    }
}

/// Latest mean for one window. `average` is `None` when the window holds no
/// samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub window: Window,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedUnit {
    #[serde(rename = "m/s")]
    MetersPerSecond,
    #[serde(rename = "km/h")]
    KilometersPerHour,
    #[serde(rename = "mph")]
    MilesPerHour,
}

impl SpeedUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeedUnit::MetersPerSecond => "m/s",
            SpeedUnit::KilometersPerHour => "km/h",
            SpeedUnit::MilesPerHour => "mph",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "m/s" => Some(SpeedUnit::MetersPerSecond),
            "km/h" => Some(SpeedUnit::KilometersPerHour),
            "mph" | "mi/hr" => Some(SpeedUnit::MilesPerHour),
            _ => None,
        }
    }

    /// Convert a value in metres per second into this unit.
    pub fn convert(&self, meters_per_second: f64) -> f64 {
        match self {
            SpeedUnit::MetersPerSecond => meters_per_second,
            SpeedUnit::KilometersPerHour => meters_per_second * 3.6,
            SpeedUnit::MilesPerHour => meters_per_second * 3600.0 / 1609.344,
        }
    }
}

impl std::fmt::Display for SpeedUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which quantity the coordinator tracks and how its averages are reported.
///
/// Validated once at construction so queries never have to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSpec {
    identifier: String,
    unit: SpeedUnit,
}

impl MetricSpec {
    pub fn new(identifier: &str, unit: &str) -> Result<Self, AveragesError> {
        let identifier = identifier.trim();
        if identifier.is_empty() || identifier.contains(char::is_whitespace) {
            return Err(AveragesError::InvariantViolation(format!(
                "invalid metric identifier: {:?}",
                identifier
            )));
        }

        let unit = SpeedUnit::from_str(unit).ok_or_else(|| {
            AveragesError::InvariantViolation(format!("unsupported unit: {:?}", unit))
        })?;

        Ok(Self {
            identifier: identifier.to_string(),
            unit,
        })
    }

    pub fn walking_speed() -> Self {
        Self {
            identifier: WALKING_SPEED.to_string(),
            unit: SpeedUnit::MetersPerSecond,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn unit(&self) -> SpeedUnit {
        self.unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_jsonl() {
        let line = r#"{"timestamp":"2023-04-09T08:00:00Z","value":1.2}"#;

        let sample = Sample::from_jsonl(line).unwrap();
        assert_eq!(sample.timestamp.to_rfc3339(), "2023-04-09T08:00:00+00:00");
        assert_eq!(sample.value, 1.2);
    }

    #[test]
    fn test_parse_sample_rejects_garbage() {
        assert!(Sample::from_jsonl("not json").is_err());
        assert!(Sample::from_jsonl(r#"{"timestamp":"yesterday","value":1.0}"#).is_err());
    }

    #[test]
    fn test_metric_spec_validation() {
        let spec = MetricSpec::new("walking_speed", "km/h").unwrap();
        assert_eq!(spec.identifier(), "walking_speed");
        assert_eq!(spec.unit(), SpeedUnit::KilometersPerHour);

        assert!(matches!(
            MetricSpec::new("", "m/s"),
            Err(AveragesError::InvariantViolation(_))
        ));
        assert!(matches!(
            MetricSpec::new("walking speed", "m/s"),
            Err(AveragesError::InvariantViolation(_))
        ));
        assert!(matches!(
            MetricSpec::new("walking_speed", "furlongs"),
            Err(AveragesError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_unit_conversion() {
        assert_eq!(SpeedUnit::MetersPerSecond.convert(1.5), 1.5);
        assert!((SpeedUnit::KilometersPerHour.convert(1.0) - 3.6).abs() < 1e-12);
        assert!((SpeedUnit::MilesPerHour.convert(1.0) - 2.236936).abs() < 1e-6);
    }

    #[test]
    fn test_aggregate_result_serializes_window_lowercase() {
        let result = AggregateResult {
            window: Window::Week,
            range_start: DateTime::parse_from_rfc3339("2023-04-03T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            range_end: DateTime::parse_from_rfc3339("2023-04-10T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            average: Some(1.3),
        };

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains(r#""window":"week""#));
        assert!(json.contains(r#""average":1.3"#));
    }
}

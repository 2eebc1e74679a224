//! Runtime configuration from environment variables

use chrono::FixedOffset;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Log,
    Jsonl,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the averages runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite sample database
    pub db_path: String,

    /// Metric identifier the averages are computed for
    pub metric_id: String,

    /// Unit the averages are reported in
    pub unit: String,

    /// Calendar offset from UTC in minutes (midnights are local to it)
    pub utc_offset_minutes: i32,

    /// Full refresh interval in seconds
    pub refresh_interval_secs: u64,

    /// Grant read access to the metric at startup
    pub grant_read: bool,

    pub output: OutputFormat,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `WALKSPEED_DB_PATH` (default: data/walkspeed.db)
    /// - `WALKSPEED_METRIC` (default: walking_speed)
    /// - `WALKSPEED_UNIT` (default: m/s)
    /// - `WALKSPEED_UTC_OFFSET_MINUTES` (default: 0)
    /// - `WALKSPEED_REFRESH_INTERVAL_SECS` (default: 300)
    /// - `WALKSPEED_GRANT_READ` (default: true)
    /// - `WALKSPEED_OUTPUT` (default: log, or jsonl)
    pub fn from_env() -> Result<Self, ConfigError> {
        let utc_offset_minutes = match env::var("WALKSPEED_UTC_OFFSET_MINUTES") {
            Ok(raw) => raw.trim().parse::<i32>().map_err(|_| {
                ConfigError::InvalidValue(format!("WALKSPEED_UTC_OFFSET_MINUTES={}", raw))
            })?,
            Err(_) => 0,
        };

        let refresh_interval_secs = match env::var("WALKSPEED_REFRESH_INTERVAL_SECS") {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::InvalidValue(format!(
                        "WALKSPEED_REFRESH_INTERVAL_SECS={}",
                        raw
                    )))
                }
            },
            Err(_) => 300,
        };

        let grant_read = match env::var("WALKSPEED_GRANT_READ") {
            Ok(raw) => parse_flag(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(format!("WALKSPEED_GRANT_READ={}", raw))
            })?,
            Err(_) => true,
        };

        let output = match env::var("WALKSPEED_OUTPUT") {
            Ok(raw) => parse_output(&raw)?,
            Err(_) => OutputFormat::Log,
        };

        let config = Self {
            db_path: env::var("WALKSPEED_DB_PATH")
                .unwrap_or_else(|_| "data/walkspeed.db".to_string()),

            metric_id: env::var("WALKSPEED_METRIC")
                .unwrap_or_else(|_| crate::averages::WALKING_SPEED.to_string()),

            unit: env::var("WALKSPEED_UNIT").unwrap_or_else(|_| "m/s".to_string()),

            utc_offset_minutes,

            refresh_interval_secs,

            grant_read,

            output,
        };

        // Reject a bad offset here rather than at first refresh
        config.calendar()?;
        Ok(config)
    }

    pub fn calendar(&self) -> Result<FixedOffset, ConfigError> {
        calendar_from_minutes(self.utc_offset_minutes)
    }
}

fn calendar_from_minutes(minutes: i32) -> Result<FixedOffset, ConfigError> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| ConfigError::InvalidValue(format!("UTC offset {} minutes", minutes)))
}

/// Strict boolean: anything unrecognised is rejected, never defaulted.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn parse_output(raw: &str) -> Result<OutputFormat, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "log" => Ok(OutputFormat::Log),
        "jsonl" | "json" => Ok(OutputFormat::Jsonl),
        other => Err(ConfigError::InvalidValue(format!("WALKSPEED_OUTPUT={}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 7] = [
        "WALKSPEED_DB_PATH",
        "WALKSPEED_METRIC",
        "WALKSPEED_UNIT",
        "WALKSPEED_UTC_OFFSET_MINUTES",
        "WALKSPEED_REFRESH_INTERVAL_SECS",
        "WALKSPEED_GRANT_READ",
        "WALKSPEED_OUTPUT",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_config_from_env() {
        // Single test so env mutations never race with each other
        clear_env();
        let config = Config::from_env().unwrap();

        assert_eq!(config.db_path, "data/walkspeed.db");
        assert_eq!(config.metric_id, "walking_speed");
        assert_eq!(config.unit, "m/s");
        assert_eq!(config.utc_offset_minutes, 0);
        assert_eq!(config.refresh_interval_secs, 300);
        assert!(config.grant_read);
        assert_eq!(config.output, OutputFormat::Log);

        env::set_var("WALKSPEED_DB_PATH", "/tmp/test.db");
        env::set_var("WALKSPEED_UNIT", "km/h");
        env::set_var("WALKSPEED_UTC_OFFSET_MINUTES", "-420");
        env::set_var("WALKSPEED_REFRESH_INTERVAL_SECS", "60");
        env::set_var("WALKSPEED_GRANT_READ", "false");
        env::set_var("WALKSPEED_OUTPUT", "jsonl");

        let config = Config::from_env().unwrap();
        assert_eq!(config.db_path, "/tmp/test.db");
        assert_eq!(config.unit, "km/h");
        assert_eq!(config.calendar().unwrap().local_minus_utc(), -420 * 60);
        assert_eq!(config.refresh_interval_secs, 60);
        assert!(!config.grant_read);
        assert_eq!(config.output, OutputFormat::Jsonl);

        env::set_var("WALKSPEED_UTC_OFFSET_MINUTES", "1440");
        assert!(Config::from_env().is_err());
        env::set_var("WALKSPEED_UTC_OFFSET_MINUTES", "0");
        env::set_var("WALKSPEED_REFRESH_INTERVAL_SECS", "0");
        assert!(Config::from_env().is_err());
        env::set_var("WALKSPEED_REFRESH_INTERVAL_SECS", "60");

        // Withholding access must never fall back to granting it
        env::set_var("WALKSPEED_GRANT_READ", "0");
        assert!(!Config::from_env().unwrap().grant_read);
        env::set_var("WALKSPEED_GRANT_READ", "No");
        assert!(!Config::from_env().unwrap().grant_read);
        env::set_var("WALKSPEED_GRANT_READ", "maybe");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue(msg)) if msg == "WALKSPEED_GRANT_READ=maybe"
        ));

        clear_env();
    }

    #[test]
    fn test_parse_output() {
        assert_eq!(parse_output("LOG").unwrap(), OutputFormat::Log);
        assert_eq!(parse_output(" json ").unwrap(), OutputFormat::Jsonl);
        assert!(parse_output("xml").is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" 1 "), Some(true));
        assert_eq!(parse_flag("False"), Some(false));
        assert_eq!(parse_flag("no"), Some(false));
        assert_eq!(parse_flag(""), None);
        assert_eq!(parse_flag("off-ish"), None);
    }

    #[test]
    fn test_calendar_bounds() {
        assert!(calendar_from_minutes(330).is_ok());
        assert!(calendar_from_minutes(-1439).is_ok());
        assert!(calendar_from_minutes(1440).is_err());
        assert!(calendar_from_minutes(i32::MAX).is_err());
    }
}

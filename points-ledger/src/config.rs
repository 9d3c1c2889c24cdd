//! Configuration for reconciliation and tracking

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Category label credited when a badge is ingested
pub const DEFAULT_BADGE_CATEGORY: &str = "Badge Points";

/// Points awarded per badge
pub const DEFAULT_BADGE_POINT_VALUE: i64 = 30;

/// Time zone whose calendar day snapshots are booked on
pub const DEFAULT_TIMEZONE: &str = "America/Chicago";

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ledger file read by the source
    pub input_path: PathBuf,

    /// Ledger file written by the sink
    pub output_path: PathBuf,

    /// Allocation rules
    pub allocation: AllocationConfig,

    /// Snapshot tracking
    pub tracking: TrackingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("points.json"),
            output_path: PathBuf::from("fixed_points.json"),
            allocation: AllocationConfig::default(),
            tracking: TrackingConfig::default(),
        }
    }
}

/// Allocation rules used by the reconciliation engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Points credited per earned badge
    pub badge_point_value: i64,

    /// Category badge points are booked under
    pub badge_category: String,

    /// Date receiving leftover points of categories with no badge years
    pub fallback_date: NaiveDate,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            badge_point_value: DEFAULT_BADGE_POINT_VALUE,
            badge_category: DEFAULT_BADGE_CATEGORY.to_string(),
            fallback_date: default_fallback_date(),
        }
    }
}

fn default_fallback_date() -> NaiveDate {
    // 2024-12-31 is always a valid calendar date
    NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or(NaiveDate::MIN)
}

impl AllocationConfig {
    /// Reject values the engine cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.badge_point_value < 0 {
            return Err(crate::Error::Config(format!(
                "badge_point_value must not be negative, got {}",
                self.badge_point_value
            )));
        }
        if self.badge_category.trim().is_empty() {
            return Err(crate::Error::Config(
                "badge_category must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Snapshot tracking configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// IANA time zone name used to decide which day a snapshot belongs to
    pub timezone: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }
}

impl TrackingConfig {
    /// Resolve the configured time zone
    pub fn tz(&self) -> crate::Result<Tz> {
        self.timezone.parse::<Tz>().map_err(|e| {
            crate::Error::Config(format!("Invalid timezone '{}': {}", self.timezone, e))
        })
    }

    /// Calendar day of `instant` in the configured time zone
    pub fn day_of(&self, instant: DateTime<Utc>) -> crate::Result<NaiveDate> {
        Ok(instant.with_timezone(&self.tz()?).date_naive())
    }

    /// Today in the configured time zone
    pub fn today(&self) -> crate::Result<NaiveDate> {
        self.day_of(Utc::now())
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.allocation.validate()?;
        config.tracking.tz()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(path) = std::env::var("LEDGER_INPUT") {
            config.input_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("LEDGER_OUTPUT") {
            config.output_path = PathBuf::from(path);
        }

        if let Ok(value) = std::env::var("LEDGER_BADGE_POINTS") {
            config.allocation.badge_point_value = value.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid LEDGER_BADGE_POINTS '{}': {}", value, e))
            })?;
        }

        if let Ok(value) = std::env::var("LEDGER_FALLBACK_DATE") {
            config.allocation.fallback_date =
                NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|e| {
                    crate::Error::Config(format!("Invalid LEDGER_FALLBACK_DATE '{}': {}", value, e))
                })?;
        }

        if let Ok(category) = std::env::var("LEDGER_BADGE_CATEGORY") {
            config.allocation.badge_category = category;
        }

        if let Ok(timezone) = std::env::var("LEDGER_TIMEZONE") {
            config.tracking.timezone = timezone;
        }

        config.allocation.validate()?;
        config.tracking.tz()?;
        Ok(config)
    }

    /// Load from `LEDGER_CONFIG` if set, otherwise from the environment
    pub fn load() -> crate::Result<Self> {
        match std::env::var("LEDGER_CONFIG") {
            Ok(path) => {
                tracing::info!("Loading config from: {}", path);
                Self::from_file(path)
            }
            Err(_) => Self::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.input_path, PathBuf::from("points.json"));
        assert_eq!(config.output_path, PathBuf::from("fixed_points.json"));
        assert_eq!(config.allocation.badge_point_value, 30);
        assert_eq!(config.allocation.badge_category, "Badge Points");
        assert_eq!(
            config.allocation.fallback_date,
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
        );
    }

    #[test]
    fn test_from_file_partial_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(
            &path,
            r#"
input_path = "in.json"

[allocation]
badge_point_value = 50
fallback_date = "2023-12-31"
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.input_path, PathBuf::from("in.json"));
        assert_eq!(config.output_path, PathBuf::from("fixed_points.json"));
        assert_eq!(config.allocation.badge_point_value, 50);
        assert_eq!(config.allocation.badge_category, "Badge Points");
        assert_eq!(
            config.allocation.fallback_date,
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()
        );
    }

    #[test]
    fn test_day_follows_configured_timezone() {
        let tracking = TrackingConfig::default();
        // 03:30 UTC is still the previous evening in Chicago
        let instant = DateTime::parse_from_rfc3339("2025-01-05T03:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(
            tracking.day_of(instant).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 4).unwrap()
        );

        let utc = TrackingConfig {
            timezone: "UTC".to_string(),
        };
        assert_eq!(
            utc.day_of(instant).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 5).unwrap()
        );
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let tracking = TrackingConfig {
            timezone: "Mars/Olympus".to_string(),
        };
        assert!(matches!(tracking.tz(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_negative_badge_value_rejected() {
        let allocation = AllocationConfig {
            badge_point_value: -1,
            ..AllocationConfig::default()
        };
        assert!(matches!(allocation.validate(), Err(crate::Error::Config(_))));
    }
}

//! Runtime configuration from environment variables
//!
//! A profile name selects the widget preset; the remaining variables are
//! optional overrides applied on top of it.

use super::profiles::StreamProfile;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(String),
    UnknownProfile(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
            ConfigError::UnknownProfile(name) => write!(f, "Unknown stream profile: {}", name),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the dashboard runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Preset name, see `StreamProfile::by_name`
    pub profile: String,

    /// Overrides for the preset's window settings
    pub window_ms: Option<i64>,
    pub max_points: Option<usize>,
    pub bucket_ms: Option<i64>,
    pub eviction_interval_ms: Option<u64>,

    /// Capacity of the live ingestion channel (batches)
    pub channel_buffer: usize,

    /// JSON snapshot used for hydration at startup
    pub snapshot_path: Option<String>,

    /// JSON `RuleSet` applied at startup
    pub thresholds_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: "page_load".to_string(),
            window_ms: None,
            max_points: None,
            bucket_ms: None,
            eviction_interval_ms: None,
            channel_buffer: 10_000,
            snapshot_path: None,
            thresholds_path: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `METRICFLOW_PROFILE` (default: page_load)
    /// - `METRICFLOW_WINDOW_MS` (default: from profile)
    /// - `METRICFLOW_MAX_POINTS` (default: from profile, 0 = uncapped)
    /// - `METRICFLOW_BUCKET_MS` (default: from profile)
    /// - `METRICFLOW_EVICTION_INTERVAL_MS` (default: from profile)
    /// - `METRICFLOW_CHANNEL_BUFFER` (default: 10000)
    /// - `METRICFLOW_SNAPSHOT_PATH` (default: unset, no hydration)
    /// - `METRICFLOW_THRESHOLDS_PATH` (default: unset, no alerting)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading through `lookup`
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            profile: lookup("METRICFLOW_PROFILE")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.profile),
            window_ms: parse_var(&lookup, "METRICFLOW_WINDOW_MS"),
            max_points: parse_var(&lookup, "METRICFLOW_MAX_POINTS"),
            bucket_ms: parse_var(&lookup, "METRICFLOW_BUCKET_MS"),
            eviction_interval_ms: parse_var(&lookup, "METRICFLOW_EVICTION_INTERVAL_MS"),
            channel_buffer: parse_var(&lookup, "METRICFLOW_CHANNEL_BUFFER")
                .unwrap_or(defaults.channel_buffer),
            snapshot_path: lookup("METRICFLOW_SNAPSHOT_PATH").filter(|s| !s.trim().is_empty()),
            thresholds_path: lookup("METRICFLOW_THRESHOLDS_PATH").filter(|s| !s.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if matches!(self.window_ms, Some(ms) if ms <= 0) {
            return Err(ConfigError::InvalidValue(
                "METRICFLOW_WINDOW_MS must be positive".to_string(),
            ));
        }
        if matches!(self.bucket_ms, Some(ms) if ms <= 0) {
            return Err(ConfigError::InvalidValue(
                "METRICFLOW_BUCKET_MS must be positive".to_string(),
            ));
        }
        if self.eviction_interval_ms == Some(0) {
            return Err(ConfigError::InvalidValue(
                "METRICFLOW_EVICTION_INTERVAL_MS must be positive".to_string(),
            ));
        }
        if self.channel_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "METRICFLOW_CHANNEL_BUFFER must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the named preset and apply the overrides
    pub fn stream_profile(&self) -> Result<StreamProfile, ConfigError> {
        let mut profile = StreamProfile::by_name(&self.profile)
            .ok_or_else(|| ConfigError::UnknownProfile(self.profile.clone()))?;

        if let Some(window_ms) = self.window_ms {
            profile.window.window_duration_ms = window_ms;
        }
        if let Some(max_points) = self.max_points {
            profile.window.max_points = max_points;
        }
        if let Some(bucket_ms) = self.bucket_ms {
            profile.window.bucket_width_ms = Some(bucket_ms);
        }
        if let Some(interval_ms) = self.eviction_interval_ms {
            profile.eviction_interval_ms = interval_ms;
        }

        Ok(profile)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = load(&[]).unwrap();
        assert_eq!(config, EngineConfig::default());

        let profile = config.stream_profile().unwrap();
        assert_eq!(profile, StreamProfile::page_load_trend());
    }

    #[test]
    fn test_custom_config() {
        let config = load(&[
            ("METRICFLOW_PROFILE", "response_time"),
            ("METRICFLOW_WINDOW_MS", "120000"),
            ("METRICFLOW_MAX_POINTS", "50"),
            ("METRICFLOW_EVICTION_INTERVAL_MS", "250"),
            ("METRICFLOW_CHANNEL_BUFFER", "64"),
            ("METRICFLOW_SNAPSHOT_PATH", "/tmp/snapshot.json"),
        ])
        .unwrap();

        assert_eq!(config.channel_buffer, 64);
        assert_eq!(config.snapshot_path.as_deref(), Some("/tmp/snapshot.json"));

        let profile = config.stream_profile().unwrap();
        assert_eq!(profile.name, "response_time");
        assert_eq!(profile.window.window_duration_ms, 120_000);
        assert_eq!(profile.window.max_points, 50);
        // Not overridden
        assert_eq!(profile.window.bucket_width_ms, Some(10_000));
        assert_eq!(profile.eviction_interval_ms, 250);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = load(&[("METRICFLOW_WINDOW_MS", "five minutes"), ("METRICFLOW_CHANNEL_BUFFER", "lots")]).unwrap();
        assert_eq!(config.window_ms, None);
        assert_eq!(config.channel_buffer, 10_000);
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(matches!(load(&[("METRICFLOW_WINDOW_MS", "0")]), Err(ConfigError::InvalidValue(_))));
        assert!(matches!(
            load(&[("METRICFLOW_EVICTION_INTERVAL_MS", "0")]),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_unknown_profile() {
        let config = load(&[("METRICFLOW_PROFILE", "weather")]).unwrap();
        assert_eq!(
            config.stream_profile(),
            Err(ConfigError::UnknownProfile("weather".to_string()))
        );
    }
}

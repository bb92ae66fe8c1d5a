//! Service configuration
//!
//! Everything is fixed at startup. Values come from the defaults below, an
//! optional JSON file named by `SNORE_CONFIG`, then `SNORE_*` environment
//! overrides, in that order.

use crate::aggregator::{AggregatorConfig, EvictionPolicy};
use crate::audio_buffer::{window_len, DEFAULT_SAMPLE_RATE, MAX_WINDOW_LEN, MIN_BUFFER_LEN};
use crate::classifier::Thresholds;
use crate::features::FrequencyBand;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable naming a JSON config file
pub const CONFIG_PATH_ENV: &str = "SNORE_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnoreConfig {
    /// Capture sample rate (Hz)
    pub sample_rate: u32,

    /// Length of each analysis window (seconds)
    pub buffer_duration_secs: f64,

    /// RMS amplitude threshold
    pub amplitude_threshold: f64,

    /// Band the spectral energy is summed over
    pub frequency_band_hz: FrequencyBand,

    /// Band energy threshold
    pub band_energy_threshold: f64,

    /// Detections within the sliding window needed to fire the action
    pub event_count_threshold: usize,

    /// Sliding window length (seconds)
    pub sliding_window_secs: f64,

    /// Pause between ticks (seconds)
    pub inter_tick_delay_secs: f64,

    /// Shell command run on trigger; `None` only logs
    pub action_command: Option<String>,

    /// Upper bound on the action's run time (seconds)
    pub action_timeout_secs: f64,

    pub eviction_policy: EvictionPolicy,
}

impl Default for SnoreConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_duration_secs: 0.2,
            amplitude_threshold: 0.1,
            frequency_band_hz: FrequencyBand::default(),
            band_energy_threshold: 10.0,
            event_count_threshold: 3,
            sliding_window_secs: 60.0,
            inter_tick_delay_secs: 0.1,
            action_command: None,
            action_timeout_secs: 10.0,
            eviction_policy: EvictionPolicy::OnDetection,
        }
    }
}

fn non_negative_secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

fn check_secs(key: &str, value: f64, allow_zero: bool) -> Result<(), ConfigError> {
    let in_range = if allow_zero { value >= 0.0 } else { value > 0.0 };

    if !in_range || Duration::try_from_secs_f64(value).is_err() {
        let bound = if allow_zero { ">= 0" } else { "> 0" };
        return Err(ConfigError::Invalid(format!(
            "{} must be a representable duration {} seconds, got {}",
            key, bound, value
        )));
    }

    Ok(())
}

impl SnoreConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "sample_rate must be greater than 0".to_string(),
            ));
        }

        if !(self.buffer_duration_secs > 0.0) || self.window_len() < MIN_BUFFER_LEN {
            return Err(ConfigError::Invalid(format!(
                "buffer_duration_secs must give at least {} samples, got {}",
                MIN_BUFFER_LEN,
                self.window_len()
            )));
        }

        if self.window_len() > MAX_WINDOW_LEN {
            return Err(ConfigError::Invalid(format!(
                "buffer_duration_secs gives {} samples, at most {} allowed",
                self.window_len(),
                MAX_WINDOW_LEN
            )));
        }

        self.thresholds()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        check_secs("sliding_window_secs", self.sliding_window_secs, true)?;
        check_secs("inter_tick_delay_secs", self.inter_tick_delay_secs, true)?;
        check_secs("action_timeout_secs", self.action_timeout_secs, false)?;

        self.aggregator_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if matches!(self.action_command.as_deref(), Some(cmd) if cmd.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "action_command must not be blank".to_string(),
            ));
        }

        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            amplitude_threshold: self.amplitude_threshold,
            frequency_band: self.frequency_band_hz,
            band_energy_threshold: self.band_energy_threshold,
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            count_threshold: self.event_count_threshold,
            window: non_negative_secs(self.sliding_window_secs),
            eviction_policy: self.eviction_policy,
        }
    }

    /// Samples per analysis window
    pub fn window_len(&self) -> usize {
        window_len(self.buffer_duration_secs, self.sample_rate)
    }

    pub fn inter_tick_delay(&self) -> Duration {
        non_negative_secs(self.inter_tick_delay_secs)
    }

    pub fn action_timeout(&self) -> Duration {
        non_negative_secs(self.action_timeout_secs)
    }

    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Loaded config file {}", path.display());
        Self::from_json(&contents)
    }

    /// Apply `SNORE_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `SNORE_*` overrides from an arbitrary lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
            let parsed = value.trim().parse().ok();
            parsed.ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            })
        }

        macro_rules! override_field {
            ($key:literal, $field:expr) => {
                if let Some(value) = lookup($key) {
                    $field = parse($key, value)?;
                }
            };
        }

        override_field!("SNORE_SAMPLE_RATE", self.sample_rate);
        override_field!("SNORE_BUFFER_DURATION_SECS", self.buffer_duration_secs);
        override_field!("SNORE_AMPLITUDE_THRESHOLD", self.amplitude_threshold);
        override_field!("SNORE_BAND_LOW_HZ", self.frequency_band_hz.low_hz);
        override_field!("SNORE_BAND_HIGH_HZ", self.frequency_band_hz.high_hz);
        override_field!("SNORE_BAND_ENERGY_THRESHOLD", self.band_energy_threshold);
        override_field!("SNORE_EVENT_COUNT_THRESHOLD", self.event_count_threshold);
        override_field!("SNORE_WINDOW_SECS", self.sliding_window_secs);
        override_field!("SNORE_TICK_DELAY_SECS", self.inter_tick_delay_secs);
        override_field!("SNORE_ACTION_TIMEOUT_SECS", self.action_timeout_secs);

        if let Some(command) = lookup("SNORE_ACTION_COMMAND") {
            self.action_command = Some(command);
        }

        if let Some(value) = lookup("SNORE_EVICTION_POLICY") {
            let policy = match value.trim() {
                "on_detection" => Some(EvictionPolicy::OnDetection),
                "every_tick" => Some(EvictionPolicy::EveryTick),
                _ => None,
            };
            self.eviction_policy = policy.ok_or_else(|| ConfigError::InvalidValue {
                key: "SNORE_EVICTION_POLICY".to_string(),
                value,
            })?;
        }

        Ok(())
    }

    /// Defaults, then the `SNORE_CONFIG` file if set, then env overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => {
                info!("Reading configuration from {}", path);
                Self::from_file(path)?
            }
            Err(_) => Self::default(),
        };

        config.apply_env()?;
        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SnoreConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.window_len(), 8820);
        assert_eq!(config.event_count_threshold, 3);
        assert_eq!(config.aggregator_config().window, Duration::from_secs(60));
        assert_eq!(config.inter_tick_delay(), Duration::from_millis(100));
        assert_eq!(config.frequency_band_hz, FrequencyBand::new(100.0, 1000.0));
        assert!(config.action_command.is_none());
    }

    #[test]
    fn test_validation() {
        let mut config = SnoreConfig::default();
        config.sample_rate = 0;
        assert!(config.validate().is_err());

        let mut config = SnoreConfig::default();
        config.buffer_duration_secs = 0.00001;
        assert!(config.validate().is_err());

        let mut config = SnoreConfig::default();
        config.event_count_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = SnoreConfig::default();
        config.sliding_window_secs = -1.0;
        assert!(config.validate().is_err());

        let mut config = SnoreConfig::default();
        config.frequency_band_hz = FrequencyBand::new(900.0, 200.0);
        assert!(config.validate().is_err());

        let mut config = SnoreConfig::default();
        config.action_command = Some("   ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unrepresentable_durations_rejected() {
        let mut config = SnoreConfig::default();
        config.sliding_window_secs = 1e20;
        assert!(config.validate().is_err());

        let mut config = SnoreConfig::default();
        config.action_timeout_secs = 1e20;
        assert!(config.validate().is_err());

        let mut config = SnoreConfig::default();
        config.inter_tick_delay_secs = f64::NAN;
        assert!(config.validate().is_err());

        // Accessors saturate instead of collapsing to zero
        let config = SnoreConfig {
            action_timeout_secs: 1e20,
            sliding_window_secs: 1e20,
            ..Default::default()
        };
        assert_eq!(config.action_timeout(), Duration::MAX);
        assert_eq!(config.aggregator_config().window, Duration::MAX);
    }

    #[test]
    fn test_oversized_buffer_rejected() {
        let mut config = SnoreConfig::default();
        config.buffer_duration_secs = 1e12;
        assert!(config.validate().is_err());

        config.buffer_duration_secs = 60.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SnoreConfig::from_json(
            r#"{
                "amplitude_threshold": 0.08,
                "frequency_band_hz": { "low_hz": 80.0, "high_hz": 800.0 },
                "eviction_policy": "every_tick",
                "action_command": "notify-send snore"
            }"#,
        )
        .unwrap();

        assert_relative_eq!(config.amplitude_threshold, 0.08);
        assert_eq!(config.frequency_band_hz, FrequencyBand::new(80.0, 800.0));
        assert_eq!(config.eviction_policy, EvictionPolicy::EveryTick);
        assert_eq!(config.action_command.as_deref(), Some("notify-send snore"));
        assert_eq!(config.sample_rate, 44_100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "event_count_threshold": 5, "sliding_window_secs": 30 }}"#).unwrap();

        let config = SnoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.event_count_threshold, 5);
        assert_eq!(config.aggregator_config().window, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = SnoreConfig::from_file(dir.path().join("missing.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            SnoreConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let mut config = SnoreConfig::default();
        config
            .apply_overrides(lookup(&[
                ("SNORE_SAMPLE_RATE", "16000"),
                ("SNORE_BAND_LOW_HZ", "60"),
                ("SNORE_EVENT_COUNT_THRESHOLD", " 4 "),
                ("SNORE_ACTION_COMMAND", "echo snore"),
                ("SNORE_EVICTION_POLICY", "every_tick"),
            ]))
            .unwrap();

        assert_eq!(config.sample_rate, 16_000);
        assert_relative_eq!(config.frequency_band_hz.low_hz, 60.0);
        assert_eq!(config.event_count_threshold, 4);
        assert_eq!(config.action_command.as_deref(), Some("echo snore"));
        assert_eq!(config.eviction_policy, EvictionPolicy::EveryTick);
        assert_eq!(config.window_len(), 3200);
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut config = SnoreConfig::default();
        let result = config.apply_overrides(lookup(&[("SNORE_WINDOW_SECS", "a minute")]));

        match result {
            Err(ConfigError::InvalidValue { key, value }) => {
                assert_eq!(key, "SNORE_WINDOW_SECS");
                assert_eq!(value, "a minute");
            }
            other => panic!("Expected InvalidValue, got {:?}", other),
        }

        let result = config.apply_overrides(lookup(&[("SNORE_EVICTION_POLICY", "never")]));
        assert!(result.is_err());
    }
}

//! Monitor daemon configuration

use anyhow::Result;
use monitor_lib::{
    AggregationConfig, HealthThresholds, LoopConfig, MonitorSettings, QueryConfig, StoreConfig,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from `MONITOR_`-prefixed environment
/// variables with per-field defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Instance name used in structured log events
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for probes/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Root directory for durable per-model state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Aggregation window width in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Maximum event-reporting delay before a window finalizes
    #[serde(default = "default_finalize_grace_secs")]
    pub finalize_grace_secs: u64,

    /// Accuracy below this flags a model as degrading
    #[serde(default = "default_accuracy_floor")]
    pub accuracy_floor: f64,

    /// Short accuracy trend below this flags a model as degrading
    #[serde(default = "default_trend_floor")]
    pub trend_floor: f64,

    /// Accuracy below this flags a model for retraining
    #[serde(default = "default_retrain_floor")]
    pub retrain_floor: f64,

    /// Short trend lookback in seconds
    #[serde(default = "default_short_lookback_secs")]
    pub short_lookback_secs: u64,

    /// Long trend lookback in seconds
    #[serde(default = "default_long_lookback_secs")]
    pub long_lookback_secs: u64,

    /// Per-model budget in the periodic loop, in seconds
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "index-monitor".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/index-monitor/data")
}

fn default_window_secs() -> u64 {
    60
}

fn default_finalize_grace_secs() -> u64 {
    5
}

fn default_accuracy_floor() -> f64 {
    0.90
}

fn default_trend_floor() -> f64 {
    -0.01
}

fn default_retrain_floor() -> f64 {
    0.85
}

fn default_short_lookback_secs() -> u64 {
    60 * 60
}

fn default_long_lookback_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_model_timeout_secs() -> u64 {
    10
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            api_port: default_api_port(),
            data_dir: default_data_dir(),
            window_secs: default_window_secs(),
            finalize_grace_secs: default_finalize_grace_secs(),
            accuracy_floor: default_accuracy_floor(),
            trend_floor: default_trend_floor(),
            retrain_floor: default_retrain_floor(),
            short_lookback_secs: default_short_lookback_secs(),
            long_lookback_secs: default_long_lookback_secs(),
            model_timeout_secs: default_model_timeout_secs(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("MONITOR"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }

    /// Store configuration: in-memory retention covers the long
    /// lookback plus one hour of slack.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            data_dir: self.data_dir.clone(),
            retention: Duration::from_secs(self.long_lookback_secs + 3600),
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            aggregation: AggregationConfig {
                window: Duration::from_secs(self.window_secs),
                finalize_grace: Duration::from_secs(self.finalize_grace_secs),
            },
            thresholds: HealthThresholds {
                accuracy_floor: self.accuracy_floor,
                trend_floor: self.trend_floor,
                retrain_floor: self.retrain_floor,
                short_lookback: Duration::from_secs(self.short_lookback_secs),
                long_lookback: Duration::from_secs(self.long_lookback_secs),
            },
            query: QueryConfig::default(),
            loop_config: LoopConfig {
                interval: Duration::from_secs(self.window_secs),
                model_timeout: Duration::from_secs(self.model_timeout_secs),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_thresholds() {
        let config = MonitorConfig::default();
        assert_eq!(config.window_secs, 60);
        assert!((config.accuracy_floor - 0.90).abs() < f64::EPSILON);
        assert!((config.trend_floor + 0.01).abs() < f64::EPSILON);
        assert!((config.retrain_floor - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_settings_carry_window_into_loop_interval() {
        let config = MonitorConfig {
            window_secs: 30,
            ..Default::default()
        };
        let settings = config.monitor_settings();
        assert_eq!(settings.aggregation.window, Duration::from_secs(30));
        assert_eq!(settings.loop_config.interval, Duration::from_secs(30));
    }
}

//! Configuration types for vitalstream
//!
//! Loaded from YAML. Every section and field has a default, so an empty file
//! (or no file at all) yields a runnable configuration.

use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::alerts::strategy::{BloodPressureThresholds, HeartRateThresholds, SaturationThresholds};
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub alerts: AlertConfig,
    pub evaluator: EvaluatorConfig,
    pub logging: LoggingConfig,
}

/// Ingestion endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Longest accepted wire line in bytes; longer lines are discarded
    pub max_line_length: usize,
    /// Outbound messages buffered per peer before broadcasts to it are dropped
    pub peer_queue_capacity: usize,
    pub send_timeout_ms: u64,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_line_length: 1024,
            peer_queue_capacity: 256,
            send_timeout_ms: 2000,
        }
    }
}

/// Relay client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` of an upstream server to relay from; none disables the client
    pub upstream: Option<String>,
    pub max_reconnect_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub queue_capacity: usize,
    pub max_line_length: usize,
    pub send_timeout_ms: u64,
}

impl ClientConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            upstream: None,
            max_reconnect_attempts: 10,
            initial_backoff_ms: 250,
            max_backoff_ms: 10_000,
            queue_capacity: 256,
            max_line_length: 1024,
            send_timeout_ms: 2000,
        }
    }
}

/// Threshold tables for every detector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    #[serde(deserialize_with = "systolic_thresholds")]
    pub systolic: BloodPressureThresholds,
    #[serde(deserialize_with = "diastolic_thresholds")]
    pub diastolic: BloodPressureThresholds,
    pub heart_rate: HeartRateThresholds,
    pub saturation: SaturationThresholds,
}

impl Default for AlertConfig {
    fn default() -> Self {
        AlertConfig {
            systolic: BloodPressureThresholds::systolic(),
            diastolic: BloodPressureThresholds::diastolic(),
            heart_rate: HeartRateThresholds::default(),
            saturation: SaturationThresholds::default(),
        }
    }
}

/// A blood-pressure table as written in YAML; unset fields fall back to the
/// channel's own defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialBloodPressure {
    critical_high: Option<f64>,
    critical_low: Option<f64>,
    trend_delta: Option<f64>,
}

impl PartialBloodPressure {
    fn over(self, base: BloodPressureThresholds) -> BloodPressureThresholds {
        BloodPressureThresholds {
            critical_high: self.critical_high.unwrap_or(base.critical_high),
            critical_low: self.critical_low.unwrap_or(base.critical_low),
            trend_delta: self.trend_delta.unwrap_or(base.trend_delta),
        }
    }
}

fn systolic_thresholds<'de, D>(deserializer: D) -> Result<BloodPressureThresholds, D::Error>
where
    D: Deserializer<'de>,
{
    PartialBloodPressure::deserialize(deserializer).map(|p| p.over(BloodPressureThresholds::systolic()))
}

fn diastolic_thresholds<'de, D>(deserializer: D) -> Result<BloodPressureThresholds, D::Error>
where
    D: Deserializer<'de>,
{
    PartialBloodPressure::deserialize(deserializer).map(|p| p.over(BloodPressureThresholds::diastolic()))
}

/// Periodic sweep settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub interval_secs: u64,
    /// Only look this far back from now; none evaluates the whole history
    pub lookback_ms: Option<i64>,
}

impl EvaluatorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            interval_secs: 10,
            lookback_ms: None,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Emit JSON lines instead of the compact human format
    pub json: bool,
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_line_length == 0 || self.client.max_line_length == 0 {
            return Err(ConfigError::Invalid("max_line_length must be positive".to_string()));
        }
        if self.server.peer_queue_capacity == 0 || self.client.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacities must be positive".to_string()));
        }
        if self.evaluator.interval_secs == 0 {
            return Err(ConfigError::Invalid("evaluator.interval_secs must be positive".to_string()));
        }
        if matches!(self.evaluator.lookback_ms, Some(ms) if ms <= 0) {
            return Err(ConfigError::Invalid("evaluator.lookback_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// Loads and validates configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_yaml(&contents)
}

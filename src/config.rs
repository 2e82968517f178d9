//! TOML configuration for the dnspulse engine.
//!
//! Every option has a default, so an empty file (or no file at all) yields a
//! working engine. The config file path can be overridden with the
//! `DNSPULSE_CONFIG` environment variable.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::AnomalyType;
use crate::error::EngineError;

/// Default system-wide config location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/dnspulse/dnspulse.toml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "DNSPULSE_CONFIG";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration handed to [`crate::engine::Engine::initialize`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub anomaly_detection: AnomalyDetectionConfig,
    #[serde(default)]
    pub trend_analysis: TrendAnalysisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded engine configuration");
        Ok(config)
    }

    /// Try `DNSPULSE_CONFIG`, then the system path, then compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "DNSPULSE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), EngineError> {
        let ad = &self.anomaly_detection;
        check_fraction("anomaly_detection.sensitivity", ad.sensitivity)?;
        check_fraction("anomaly_detection.min_confidence", ad.min_confidence)?;
        if ad.window_size.as_secs() == 0 {
            return Err(invalid("anomaly_detection.window_size must be at least one second"));
        }

        let th = &ad.thresholds;
        for (name, value) in [
            ("zscore", th.zscore),
            ("volume", th.volume),
            ("frequency", th.frequency),
            ("volume_spike_multiplier", th.volume_spike_multiplier),
            ("unusual_domain_threshold", th.unusual_domain_threshold),
            ("response_time_threshold", th.response_time_threshold),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(&format!(
                    "thresholds.{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !(th.volume_dropout_threshold > 0.0 && th.volume_dropout_threshold < 1.0) {
            return Err(invalid(&format!(
                "thresholds.volume_dropout_threshold must be in (0, 1), got {}",
                th.volume_dropout_threshold
            )));
        }

        let ta = &self.trend_analysis;
        check_fraction("trend_analysis.smoothing_factor", ta.smoothing_factor)?;
        if ta.smoothing_factor == 0.0 {
            return Err(invalid("trend_analysis.smoothing_factor must be greater than 0"));
        }
        if ta.analysis_window.as_secs() == 0 || ta.forecast_window.as_secs() == 0 {
            return Err(invalid("trend_analysis windows must be at least one second"));
        }
        if ta.min_data_points < 2 {
            return Err(invalid("trend_analysis.min_data_points must be at least 2"));
        }

        Ok(())
    }

    /// Window size as a chrono duration.
    pub fn window_size(&self) -> chrono::Duration {
        to_chrono(self.anomaly_detection.window_size)
    }
}

fn check_fraction(name: &str, value: f64) -> Result<(), EngineError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(&format!("{} must be within [0, 1], got {}", name, value)));
    }
    Ok(())
}

fn invalid(msg: &str) -> EngineError {
    EngineError::InvalidConfig(msg.to_string())
}

/// Convert a config duration, saturating on overflow.
pub fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

// ---------------------------------------------------------------------------
// Anomaly detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyDetectionConfig {
    /// Gates whether detection runs during `process_data`.
    pub enabled: bool,
    /// 0 = least sensitive, 1 = most. 0.5 leaves every threshold as configured.
    pub sensitivity: f64,
    /// Anomalies below this confidence are dropped.
    pub min_confidence: f64,
    /// Time-bucket granularity for training and detection.
    #[serde(with = "humantime_serde")]
    pub window_size: Duration,
    /// Detector outputs to keep.
    pub anomaly_types: Vec<AnomalyType>,
    pub thresholds: Thresholds,
}

impl Default for AnomalyDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitivity: 0.5,
            min_confidence: 0.5,
            window_size: Duration::from_secs(3600),
            anomaly_types: AnomalyType::ALL.to_vec(),
            thresholds: Thresholds::default(),
        }
    }
}

impl AnomalyDetectionConfig {
    /// Multiplier applied to "flag above" thresholds: 1.0 at the default
    /// sensitivity, 0.5 at maximum sensitivity, 1.5 at minimum.
    pub fn threshold_scale(&self) -> f64 {
        1.5 - self.sensitivity.clamp(0.0, 1.0)
    }

    pub fn is_enabled(&self, kind: AnomalyType) -> bool {
        self.anomaly_types.contains(&kind)
    }
}

/// Per-detector tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Standard deviations above a client's typical volume before flagging.
    pub zscore: f64,
    /// Query floor for new-client activity and query-pattern checks.
    pub volume: f64,
    /// Frequency ratio for known domains, time-of-day share and blocked ratio.
    pub frequency: f64,
    pub volume_spike_multiplier: f64,
    pub volume_dropout_threshold: f64,
    /// Share of the current window a never-seen domain must exceed.
    pub unusual_domain_threshold: f64,
    /// Latency ceiling in milliseconds.
    pub response_time_threshold: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            zscore: 3.0,
            volume: 10.0,
            frequency: 3.0,
            volume_spike_multiplier: 3.0,
            volume_dropout_threshold: 0.3,
            unusual_domain_threshold: 0.05,
            response_time_threshold: 100.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Trend analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendAnalysisConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub analysis_window: Duration,
    #[serde(with = "humantime_serde")]
    pub forecast_window: Duration,
    /// Minimum valid records before trend analysis will run.
    pub min_data_points: usize,
    /// Exponential smoothing weight in (0, 1].
    pub smoothing_factor: f64,
}

impl Default for TrendAnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            analysis_window: Duration::from_secs(7 * 24 * 3600),
            forecast_window: Duration::from_secs(6 * 3600),
            min_data_points: 10,
            smoothing_factor: 0.3,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

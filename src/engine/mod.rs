//! Lifecycle orchestration: `uninitialized -> initialized -> trained`.
//!
//! The engine owns the configuration, the current baseline generation and
//! the trend analyzer. Baselines sit behind a single reference that is
//! swapped whole on retrain, so a detection running alongside a retrain
//! sees either the old set or the new one.

pub mod summary;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analysis::{AnalyzerInfo, TrendAnalysis, TrendAnalyzer, TrendPrediction};
use crate::baseline::{self, BaselineSet, TrainingParams};
use crate::config::{to_chrono, EngineConfig};
use crate::detect::{self, Anomaly, DetectionContext};
use crate::error::EngineError;
use crate::record::{parse_batch, ParsedBatch, QueryRecord};

pub use summary::{health_score, severity_weight, MLResults, MLSummary};

pub const MODEL_NAME: &str = "dnspulse-baseline-model";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
    Trained,
}

/// Pollable health of the engine.
///
/// `errors` is cleared when each operation starts and collects what that
/// operation reports. Operations running concurrently on one engine share
/// the list, so one call can clear messages another just recorded; callers
/// that need per-operation errors must serialize their calls or use the
/// returned `Result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub initialized: bool,
    pub trained: bool,
    pub last_training: Option<DateTime<Utc>>,
    pub last_analysis: Option<DateTime<Utc>>,
    pub status: Lifecycle,
    /// Messages from the most recent operation.
    pub errors: Vec<String>,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            initialized: false,
            trained: false,
            last_training: None,
            last_analysis: None,
            status: Lifecycle::Uninitialized,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub version: String,
    pub trained_at: Option<DateTime<Utc>>,
    pub training_set_size: usize,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Configuration plus everything derived from it at initialization.
struct Configured {
    config: Arc<EngineConfig>,
    analyzer: Arc<TrendAnalyzer>,
}

pub struct Engine {
    configured: RwLock<Option<Configured>>,
    baselines: RwLock<Option<Arc<BaselineSet>>>,
    status: Mutex<EngineStatus>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            configured: RwLock::new(None),
            baselines: RwLock::new(None),
            status: Mutex::new(EngineStatus::default()),
        }
    }

    /// Validate and store `config`, dropping any trained baselines.
    pub fn initialize(&self, config: EngineConfig) -> Result<(), EngineError> {
        self.begin();
        let result = config.validate().map(|()| {
            let analyzer = TrendAnalyzer::new(config.trend_analysis.clone(), config.window_size());
            *self.configured.write() = Some(Configured {
                config: Arc::new(config),
                analyzer: Arc::new(analyzer),
            });
            *self.baselines.write() = None;

            let mut status = self.status.lock();
            status.initialized = true;
            status.trained = false;
            status.last_training = None;
            status.status = Lifecycle::Initialized;
            info!("engine initialized");
        });
        self.finish(result)
    }

    /// Build a new baseline generation from `records` and swap it in.
    pub fn train(&self, records: &[QueryRecord], cancel: &CancellationToken) -> Result<(), EngineError> {
        self.begin();
        let result = self.train_inner(records, cancel);
        self.finish(result)
    }

    fn train_inner(&self, records: &[QueryRecord], cancel: &CancellationToken) -> Result<(), EngineError> {
        let (config, _) = self.configured()?;
        let batch = self.parse(records, cancel)?;
        let params = TrainingParams {
            window_size: config.window_size(),
            new_domain_threshold: config.anomaly_detection.thresholds.unusual_domain_threshold,
        };
        let set = baseline::train(&batch.records, params, cancel)?;
        let trained_at = set.trained_at;

        *self.baselines.write() = Some(Arc::new(set));

        let mut status = self.status.lock();
        status.trained = true;
        status.last_training = Some(trained_at);
        status.status = Lifecycle::Trained;
        Ok(())
    }

    pub fn detect_anomalies(
        &self,
        records: &[QueryRecord],
        cancel: &CancellationToken,
    ) -> Result<Vec<Anomaly>, EngineError> {
        self.begin();
        let result = self.detect_inner(records, cancel);
        self.finish(result)
    }

    fn detect_inner(
        &self,
        records: &[QueryRecord],
        cancel: &CancellationToken,
    ) -> Result<Vec<Anomaly>, EngineError> {
        let (config, _) = self.configured()?;
        let baselines = self.trained()?;
        let batch = self.parse(records, cancel)?;
        self.detect(&config, &baselines, &batch, cancel)
    }

    pub fn analyze_trends(
        &self,
        records: &[QueryRecord],
        window: chrono::Duration,
        cancel: &CancellationToken,
    ) -> Result<TrendAnalysis, EngineError> {
        self.begin();
        let result = self.analyzer_for(records, cancel).and_then(|(analyzer, batch)| {
            let analysis = analyzer.analyze(&batch.records, window, cancel)?;
            self.status.lock().last_analysis = Some(analysis.created_at);
            Ok(analysis)
        });
        self.finish(result)
    }

    pub fn predict_trends(
        &self,
        records: &[QueryRecord],
        forecast_window: chrono::Duration,
        cancel: &CancellationToken,
    ) -> Result<TrendPrediction, EngineError> {
        self.begin();
        let result = self
            .analyzer_for(records, cancel)
            .and_then(|(analyzer, batch)| analyzer.predict(&batch.records, forecast_window, cancel));
        self.finish(result)
    }

    /// Lifecycle checks shared by the trend operations.
    fn analyzer_for(
        &self,
        records: &[QueryRecord],
        cancel: &CancellationToken,
    ) -> Result<(Arc<TrendAnalyzer>, ParsedBatch), EngineError> {
        let (_, analyzer) = self.configured()?;
        self.trained()?;
        let batch = self.parse(records, cancel)?;
        Ok((analyzer, batch))
    }

    /// Detection, trend analysis and forecast over one batch, with a summary.
    ///
    /// A batch too small for trend analysis still yields detection results;
    /// the shortfall is noted in the status errors.
    pub fn process_data(
        &self,
        records: &[QueryRecord],
        cancel: &CancellationToken,
    ) -> Result<MLResults, EngineError> {
        self.begin();
        let result = self.process_inner(records, cancel);
        self.finish(result)
    }

    fn process_inner(&self, records: &[QueryRecord], cancel: &CancellationToken) -> Result<MLResults, EngineError> {
        let (config, analyzer) = self.configured()?;
        let baselines = self.trained()?;
        let batch = self.parse(records, cancel)?;

        let anomalies = self.detect(&config, &baselines, &batch, cancel)?;

        let (trend_analysis, predictions) = if config.trend_analysis.enabled {
            let window = to_chrono(config.trend_analysis.analysis_window);
            match analyzer.analyze(&batch.records, window, cancel) {
                Ok(analysis) => {
                    let forecast = to_chrono(config.trend_analysis.forecast_window);
                    let prediction = analyzer.predict(&batch.records, forecast, cancel)?;
                    (Some(analysis), Some(prediction))
                }
                Err(e @ EngineError::InsufficientTrendData { .. }) => {
                    warn!(error = %e, "skipping trend analysis");
                    self.note(format!("trend analysis skipped: {e}"));
                    (None, None)
                }
                Err(e) => return Err(e),
            }
        } else {
            (None, None)
        };

        let summary = MLSummary::new(&anomalies, trend_analysis.as_ref());
        let processed_at = Utc::now();
        self.status.lock().last_analysis = Some(processed_at);

        info!(
            records = batch.len(),
            anomalies = summary.total_anomalies,
            health_score = summary.health_score,
            "batch processed"
        );
        Ok(MLResults {
            anomalies,
            trend_analysis,
            predictions,
            processed_at,
            summary,
        })
    }

    /// Always callable.
    pub fn status(&self) -> EngineStatus {
        self.status.lock().clone()
    }

    pub fn model_info(&self) -> ModelInfo {
        let baselines = self.baselines.read().clone();
        let configured = self.configured.read();

        let mut parameters = BTreeMap::new();
        if let Some(c) = configured.as_ref() {
            let ad = &c.config.anomaly_detection;
            parameters.insert("sensitivity".to_string(), ad.sensitivity.into());
            parameters.insert("min_confidence".to_string(), ad.min_confidence.into());
            parameters.insert(
                "window_size".to_string(),
                humantime::format_duration(ad.window_size).to_string().into(),
            );
            parameters.insert(
                "anomaly_types".to_string(),
                ad.anomaly_types
                    .iter()
                    .map(|t| serde_json::Value::from(t.as_str()))
                    .collect::<Vec<_>>()
                    .into(),
            );
            if let Ok(thresholds) = serde_json::to_value(&ad.thresholds) {
                parameters.insert("thresholds".to_string(), thresholds);
            }
        }

        ModelInfo {
            name: MODEL_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            trained_at: baselines.as_ref().map(|b| b.trained_at),
            training_set_size: baselines.as_ref().map_or(0, |b| b.training_records),
            parameters,
            last_updated: self.status.lock().last_analysis.or(baselines.map(|b| b.trained_at)),
        }
    }

    pub fn analyzer_info(&self) -> Result<AnalyzerInfo, EngineError> {
        let (_, analyzer) = self.configured()?;
        Ok(analyzer.info())
    }

    /// The current baseline generation, if trained.
    pub fn baselines(&self) -> Option<Arc<BaselineSet>> {
        self.baselines.read().clone()
    }

    fn configured(&self) -> Result<(Arc<EngineConfig>, Arc<TrendAnalyzer>), EngineError> {
        self.configured
            .read()
            .as_ref()
            .map(|c| (c.config.clone(), c.analyzer.clone()))
            .ok_or(EngineError::NotInitialized)
    }

    fn trained(&self) -> Result<Arc<BaselineSet>, EngineError> {
        self.baselines.read().clone().ok_or(EngineError::UntrainedModel)
    }

    fn parse(&self, records: &[QueryRecord], cancel: &CancellationToken) -> Result<ParsedBatch, EngineError> {
        let batch = parse_batch(records, cancel)?;
        if batch.skipped > 0 {
            self.note(format!("skipped {} malformed records", batch.skipped));
        }
        Ok(batch)
    }

    fn detect(
        &self,
        config: &EngineConfig,
        baselines: &BaselineSet,
        batch: &ParsedBatch,
        cancel: &CancellationToken,
    ) -> Result<Vec<Anomaly>, EngineError> {
        if !config.anomaly_detection.enabled {
            debug!("anomaly detection disabled");
            return Ok(Vec::new());
        }
        let ctx = DetectionContext {
            records: &batch.records,
            baselines,
            config: &config.anomaly_detection,
            window_size: config.window_size(),
            cancel,
        };
        detect::detect_all(&ctx)
    }

    fn begin(&self) {
        self.status.lock().errors.clear();
    }

    fn note(&self, message: String) {
        self.status.lock().errors.push(message);
    }

    fn finish<T>(&self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(e) = &result {
            warn!(error = %e, "engine operation failed");
            self.note(e.to_string());
        }
        result
    }
}

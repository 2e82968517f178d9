//! Anomaly detection against trained baselines.
//!
//! Each strategy implements [`Detector`] and looks at the same current-window
//! records. [`detect_all`] fans the active detectors out, concatenates their
//! output in detector order and applies the confidence floor.

pub mod client;
pub mod domain;
pub mod response_time;
pub mod time_pattern;
pub mod volume;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::thread;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::baseline::BaselineSet;
use crate::config::AnomalyDetectionConfig;
use crate::error::{ensure_active, EngineError};
use crate::record::ParsedRecord;

/// Ratio at which ratio-based scores saturate to 1.
pub const RATIO_SCORE_CEILING: f64 = 10.0;

/// Kind of deviation an anomaly describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyType {
    VolumeSpike,
    VolumeDropout,
    UnusualDomain,
    UnusualClient,
    QueryPattern,
    TimePattern,
    ResponseTime,
    BlockedSpike,
}

impl AnomalyType {
    pub const ALL: [AnomalyType; 8] = [
        AnomalyType::VolumeSpike,
        AnomalyType::VolumeDropout,
        AnomalyType::UnusualDomain,
        AnomalyType::UnusualClient,
        AnomalyType::QueryPattern,
        AnomalyType::TimePattern,
        AnomalyType::ResponseTime,
        AnomalyType::BlockedSpike,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyType::VolumeSpike => "volume-spike",
            AnomalyType::VolumeDropout => "volume-dropout",
            AnomalyType::UnusualDomain => "unusual-domain",
            AnomalyType::UnusualClient => "unusual-client",
            AnomalyType::QueryPattern => "query-pattern",
            AnomalyType::TimePattern => "time-pattern",
            AnomalyType::ResponseTime => "response-time",
            AnomalyType::BlockedSpike => "blocked-spike",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Severity levels for detected anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Ladder shared by the client detectors: how many times the usual volume.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > 5.0 {
            Severity::Critical
        } else if ratio > 3.0 {
            Severity::High
        } else if ratio > 2.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A single detected deviation. Created by one detector, never mutated after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: String,
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl Anomaly {
    /// Build an anomaly. `subject` distinguishes anomalies of the same type at
    /// the same instant (a domain, a client, an hour). Score and confidence
    /// are clamped into [0, 1].
    pub fn new(
        anomaly_type: AnomalyType,
        severity: Severity,
        timestamp: DateTime<Utc>,
        subject: &str,
        description: String,
        score: f64,
        confidence: f64,
    ) -> Self {
        Self {
            id: format!("{}-{}-{}", anomaly_type, timestamp.timestamp(), subject),
            anomaly_type,
            severity,
            timestamp,
            description,
            score: unit(score),
            confidence: unit(confidence),
            metadata: BTreeMap::new(),
            client_ip: None,
            domain: None,
        }
    }

    pub fn with_client(mut self, client: &str) -> Self {
        self.client_ip = Some(client.to_string());
        self
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Whether a detector tagged this anomaly as concerning a never-seen subject.
    pub fn is_new(&self) -> bool {
        self.metadata.get("is_new") == Some(&serde_json::Value::Bool(true))
    }
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Normalize a "times the usual" ratio into a score.
pub fn ratio_score(ratio: f64) -> f64 {
    unit(ratio / RATIO_SCORE_CEILING)
}

/// Everything a detector may look at during one detection call.
pub struct DetectionContext<'a> {
    /// Current-window records, sorted by timestamp.
    pub records: &'a [ParsedRecord],
    pub baselines: &'a BaselineSet,
    pub config: &'a AnomalyDetectionConfig,
    pub window_size: Duration,
    pub cancel: &'a CancellationToken,
}

impl DetectionContext<'_> {
    /// Timestamp attributed to window-wide anomalies: the latest record.
    pub fn window_end(&self) -> DateTime<Utc> {
        self.records
            .last()
            .map(|r| r.timestamp)
            .unwrap_or(self.baselines.trained_at)
    }

    /// Scale applied to "flag above" thresholds for the configured sensitivity.
    pub fn scale(&self) -> f64 {
        self.config.threshold_scale()
    }
}

/// One anomaly-detection strategy.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Anomaly types this detector can emit.
    fn produces(&self) -> &'static [AnomalyType];

    fn detect(&self, ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, EngineError>;
}

/// The detectors in their fixed reporting order.
pub fn default_detectors() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(volume::VolumeDetector),
        Box::new(domain::DomainDetector),
        Box::new(client::ClientDetector),
        Box::new(response_time::ResponseTimeDetector),
        Box::new(time_pattern::TimePatternDetector),
    ]
}

/// Run every enabled detector over the context and merge the results.
///
/// Output is restricted to enabled types, filtered by `min_confidence`,
/// de-duplicated by id and sorted by (timestamp, id).
pub fn detect_all(ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, EngineError> {
    ensure_active(ctx.cancel)?;
    if ctx.records.is_empty() {
        return Ok(Vec::new());
    }

    let detectors: Vec<Box<dyn Detector>> = default_detectors()
        .into_iter()
        .filter(|d| d.produces().iter().any(|&t| ctx.config.is_enabled(t)))
        .collect();

    let results: Vec<Result<Vec<Anomaly>, EngineError>> = thread::scope(|s| {
        let handles: Vec<_> = detectors
            .iter()
            .map(|d| s.spawn(move || d.detect(ctx)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|p| std::panic::resume_unwind(p)))
            .collect()
    });

    let mut anomalies = Vec::new();
    for (detector, result) in detectors.iter().zip(results) {
        let found = result?;
        debug!(detector = detector.name(), count = found.len(), "detector finished");
        anomalies.extend(found);
    }

    let min_confidence = ctx.config.min_confidence;
    anomalies.retain(|a| ctx.config.is_enabled(a.anomaly_type) && a.confidence >= min_confidence);
    anomalies.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    let mut seen = HashSet::with_capacity(anomalies.len());
    anomalies.retain(|a| seen.insert(a.id.clone()));

    Ok(anomalies)
}

#[cfg(test)]
pub(crate) mod testutil {
    use chrono::Duration;

    use crate::baseline::{train, BaselineSet, TrainingParams};
    use crate::record::{parse_timestamp, ParsedRecord, QueryStatus};
    use tokio_util::sync::CancellationToken;

    pub fn rec(ts: &str, domain: &str, client: &str) -> ParsedRecord {
        rec_with_status(ts, domain, client, QueryStatus::Forwarded)
    }

    pub fn rec_with_status(ts: &str, domain: &str, client: &str, status: QueryStatus) -> ParsedRecord {
        ParsedRecord {
            timestamp: parse_timestamp(ts).unwrap(),
            domain: domain.to_string(),
            client: client.to_string(),
            status,
        }
    }

    /// 48 hours, four queries per hour spread across two clients and four domains.
    pub fn steady_records() -> Vec<ParsedRecord> {
        let domains = ["a.com", "b.com", "c.com", "d.com"];
        let clients = ["10.0.0.1", "10.0.0.2"];
        let mut records = Vec::new();
        for day in 1..=2 {
            for hour in 0..24 {
                for q in 0..4 {
                    records.push(rec(
                        &format!("2024-05-0{} {:02}:{:02}:00", day, hour, q * 10),
                        domains[q],
                        clients[q % 2],
                    ));
                }
            }
        }
        records
    }

    pub fn trained(records: &[ParsedRecord]) -> BaselineSet {
        train(
            records,
            TrainingParams {
                window_size: Duration::hours(1),
                new_domain_threshold: 0.05,
            },
            &CancellationToken::new(),
        )
        .unwrap()
    }
}

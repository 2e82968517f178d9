use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::{TrendAnalysis, TrendDirection, TrendPrediction};
use crate::detect::{Anomaly, AnomalyType, Severity};

/// Snapshot returned by one `process_data` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MLResults {
    pub anomalies: Vec<Anomaly>,
    pub trend_analysis: Option<TrendAnalysis>,
    pub predictions: Option<TrendPrediction>,
    pub processed_at: DateTime<Utc>,
    pub summary: MLSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MLSummary {
    pub total_anomalies: usize,
    /// High and critical anomalies.
    pub high_severity_anomalies: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_type: BTreeMap<AnomalyType, usize>,
    pub overall_trend: Option<TrendDirection>,
    /// 0 (unhealthy) to 100 (no anomalies).
    pub health_score: f64,
    pub recommendations: Vec<String>,
}

impl MLSummary {
    pub fn new(anomalies: &[Anomaly], trend: Option<&TrendAnalysis>) -> Self {
        let mut by_severity = BTreeMap::new();
        let mut by_type = BTreeMap::new();
        for a in anomalies {
            *by_severity.entry(a.severity).or_insert(0) += 1;
            *by_type.entry(a.anomaly_type).or_insert(0) += 1;
        }
        let overall_trend = trend.map(|t| t.query_trend);

        Self {
            total_anomalies: anomalies.len(),
            high_severity_anomalies: anomalies
                .iter()
                .filter(|a| a.severity >= Severity::High)
                .count(),
            health_score: health_score(anomalies),
            recommendations: recommendations(anomalies, &by_type, overall_trend),
            by_severity,
            by_type,
            overall_trend,
        }
    }
}

/// Health points each anomaly costs.
pub fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Low => 2.0,
        Severity::Medium => 5.0,
        Severity::High => 10.0,
        Severity::Critical => 20.0,
    }
}

/// 100 minus the weight of every anomaly, clamped to [0, 100].
pub fn health_score(anomalies: &[Anomaly]) -> f64 {
    let penalty: f64 = anomalies.iter().map(|a| severity_weight(a.severity)).sum();
    (100.0 - penalty).clamp(0.0, 100.0)
}

/// Always returns at least one line.
fn recommendations(
    anomalies: &[Anomaly],
    by_type: &BTreeMap<AnomalyType, usize>,
    trend: Option<TrendDirection>,
) -> Vec<String> {
    let mut out = Vec::new();

    if anomalies.iter().any(|a| a.severity == Severity::Critical) {
        out.push("Investigate critical anomalies immediately".to_string());
    }

    for kind in by_type.keys() {
        let line = match kind {
            AnomalyType::VolumeSpike => {
                "Check for misbehaving devices or amplification traffic behind the query volume spike"
            }
            AnomalyType::VolumeDropout => {
                "Verify that clients can still reach the resolver; query volume dropped sharply"
            }
            AnomalyType::UnusualDomain => {
                if anomalies
                    .iter()
                    .any(|a| a.anomaly_type == AnomalyType::UnusualDomain && a.is_new())
                {
                    "Review newly seen domains for malware, tracking or data exfiltration"
                } else {
                    "Review domains queried far more often than usual"
                }
            }
            AnomalyType::UnusualClient => "Identify new or unusually active clients on the network",
            AnomalyType::QueryPattern => {
                "Check clients whose queries moved to unfamiliar domains"
            }
            AnomalyType::TimePattern => "Review activity at hours that are normally quiet",
            AnomalyType::ResponseTime => "Check upstream resolver latency",
            AnomalyType::BlockedSpike => {
                "Review blocklist hits; a device may be compromised or misconfigured"
            }
        };
        out.push(line.to_string());
    }

    match trend {
        Some(TrendDirection::Increasing) => {
            out.push("Query volume is rising; make sure resolver capacity keeps up".to_string())
        }
        Some(TrendDirection::Volatile) => {
            out.push("Query volume is volatile; consider a longer analysis window".to_string())
        }
        _ => {}
    }

    if out.is_empty() {
        out.push("No significant anomalies detected; continue regular monitoring".to_string());
    }
    out
}

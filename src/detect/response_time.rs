use super::{Anomaly, AnomalyType, DetectionContext, Detector, Severity};
use crate::error::{checkpoint, EngineError};

/// Latency is synthesized from the record, so this path stays the weakest.
pub const RESPONSE_TIME_CONFIDENCE: f64 = 0.5;

pub struct ResponseTimeDetector;

impl Detector for ResponseTimeDetector {
    fn name(&self) -> &'static str {
        "response-time"
    }

    fn produces(&self) -> &'static [AnomalyType] {
        &[AnomalyType::ResponseTime]
    }

    fn detect(&self, ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, EngineError> {
        let threshold = ctx.config.thresholds.response_time_threshold * ctx.scale();
        let baseline = &ctx.baselines.response_time;
        let mut anomalies = Vec::new();

        for (i, record) in ctx.records.iter().enumerate() {
            checkpoint(ctx.cancel, i)?;
            let latency = record.latency_ms();
            if latency <= threshold {
                continue;
            }

            let score = if baseline.std_dev > 0.0 {
                (latency - baseline.mean) / baseline.std_dev / 3.0
            } else {
                1.0
            };
            anomalies.push(
                Anomaly::new(
                    AnomalyType::ResponseTime,
                    Severity::Low,
                    record.timestamp,
                    &record.domain,
                    format!(
                        "Slow response for {}: {:.0} ms (threshold {:.0} ms, p95 {:.0} ms)",
                        record.domain, latency, threshold, baseline.p95
                    ),
                    score,
                    RESPONSE_TIME_CONFIDENCE,
                )
                .with_client(&record.client)
                .with_domain(&record.domain)
                .with_meta("latency_ms", latency)
                .with_meta("threshold_ms", threshold),
            );
        }

        Ok(anomalies)
    }
}

use chrono::{DateTime, Timelike, Utc};

use super::{ratio_score, Anomaly, AnomalyType, DetectionContext, Detector, Severity};
use crate::analysis::stats::normalize;
use crate::baseline::trainer::time_histograms;
use crate::error::EngineError;

pub const TIME_PATTERN_CONFIDENCE: f64 = 0.6;

/// Compares the hour-of-day distribution of the window with the trained one.
pub struct TimePatternDetector;

impl Detector for TimePatternDetector {
    fn name(&self) -> &'static str {
        "time-pattern"
    }

    fn produces(&self) -> &'static [AnomalyType] {
        &[AnomalyType::TimePattern]
    }

    fn detect(&self, ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, EngineError> {
        let (hours, _) = time_histograms(ctx.records, ctx.cancel)?;
        let current = normalize(hours);
        let trained = &ctx.baselines.time_pattern.hourly;
        let multiplier = ctx.config.thresholds.frequency * ctx.scale();

        let mut latest: [Option<DateTime<Utc>>; 24] = [None; 24];
        for record in ctx.records {
            let slot = &mut latest[record.timestamp.hour() as usize];
            *slot = (*slot).max(Some(record.timestamp));
        }

        let mut anomalies = Vec::new();
        for (hour, (&share, &baseline)) in current.iter().zip(trained.iter()).enumerate() {
            let Some(ts) = latest[hour] else { continue };

            let (flagged, score) = if baseline > 0.0 {
                let ratio = share / baseline;
                (ratio > multiplier, ratio_score(ratio))
            } else {
                // Hour never seen in training.
                (share > 1.0 / multiplier, share)
            };
            if !flagged {
                continue;
            }

            anomalies.push(
                Anomaly::new(
                    AnomalyType::TimePattern,
                    Severity::Low,
                    ts,
                    &format!("hour-{:02}", hour),
                    format!(
                        "Unusual activity at {:02}:00: {:.1}% of queries (normally {:.1}%)",
                        hour,
                        share * 100.0,
                        baseline * 100.0
                    ),
                    score,
                    TIME_PATTERN_CONFIDENCE,
                )
                .with_meta("hour", hour)
                .with_meta("frequency", share)
                .with_meta("baseline_frequency", baseline),
            );
        }

        Ok(anomalies)
    }
}

use std::collections::BTreeMap;

use super::{ratio_score, Anomaly, AnomalyType, DetectionContext, Detector, Severity};
use crate::baseline::trainer::count_domains;
use crate::error::{checkpoint, EngineError};

pub const KNOWN_DOMAIN_CONFIDENCE: f64 = 0.7;
pub const NEW_DOMAIN_CONFIDENCE: f64 = 0.6;

/// Flags domains queried far more often than in training, and never-seen
/// domains that take a noticeable share of the window.
pub struct DomainDetector;

impl Detector for DomainDetector {
    fn name(&self) -> &'static str {
        "domain"
    }

    fn produces(&self) -> &'static [AnomalyType] {
        &[AnomalyType::UnusualDomain]
    }

    fn detect(&self, ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, EngineError> {
        let counts = count_domains(ctx.records, ctx.cancel)?;
        let total = ctx.records.len() as f64;
        let scale = ctx.scale();
        let multiplier = ctx.config.thresholds.frequency * scale;
        let new_threshold = ctx.baselines.domain.new_domain_threshold * scale;
        let ts = ctx.window_end();

        // Sorted so emission order does not depend on hashing.
        let counts: BTreeMap<&str, usize> = counts.into_iter().collect();
        let mut anomalies = Vec::new();

        for (i, (domain, count)) in counts.into_iter().enumerate() {
            checkpoint(ctx.cancel, i)?;
            let current = count as f64 / total;

            match ctx.baselines.domain.frequency(domain) {
                Some(baseline) if baseline > 0.0 => {
                    let ratio = current / baseline;
                    if ratio <= multiplier {
                        continue;
                    }
                    anomalies.push(
                        Anomaly::new(
                            AnomalyType::UnusualDomain,
                            Severity::Medium,
                            ts,
                            domain,
                            format!(
                                "Domain {} queried {:.1}x more often than usual ({:.1}% of queries vs {:.1}%)",
                                domain,
                                ratio,
                                current * 100.0,
                                baseline * 100.0
                            ),
                            ratio_score(ratio),
                            KNOWN_DOMAIN_CONFIDENCE,
                        )
                        .with_domain(domain)
                        .with_meta("count", count)
                        .with_meta("frequency", current)
                        .with_meta("baseline_frequency", baseline)
                        .with_meta("ratio", ratio)
                        .with_meta("is_new", false),
                    );
                }
                _ => {
                    if current <= new_threshold {
                        continue;
                    }
                    anomalies.push(
                        Anomaly::new(
                            AnomalyType::UnusualDomain,
                            Severity::Low,
                            ts,
                            domain,
                            format!(
                                "New domain {} accounts for {:.1}% of queries ({} queries)",
                                domain,
                                current * 100.0,
                                count
                            ),
                            ratio_score(current / new_threshold),
                            NEW_DOMAIN_CONFIDENCE,
                        )
                        .with_domain(domain)
                        .with_meta("count", count)
                        .with_meta("frequency", current)
                        .with_meta("is_new", true),
                    );
                }
            }
        }

        Ok(anomalies)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::AnomalyDetectionConfig;
    use crate::detect::testutil::*;
    use crate::record::ParsedRecord;

    fn run(records: &[ParsedRecord]) -> Vec<Anomaly> {
        let baselines = trained(&steady_records());
        let config = AnomalyDetectionConfig::default();
        let cancel = CancellationToken::new();
        let ctx = DetectionContext {
            records,
            baselines: &baselines,
            config: &config,
            window_size: Duration::hours(1),
            cancel: &cancel,
        };
        DomainDetector.detect(&ctx).unwrap()
    }

    #[test]
    fn test_new_domain_is_tagged() {
        let mut records: Vec<_> = (0..8)
            .map(|i| rec(&format!("2024-05-03 10:{:02}:00", i), "a.com", "10.0.0.1"))
            .collect();
        records.push(rec("2024-05-03 10:30:00", "suspicious.com", "10.0.0.1"));
        records.push(rec("2024-05-03 10:31:00", "b.com", "10.0.0.1"));

        let found = run(&records);
        let new: Vec<_> = found.iter().filter(|a| a.is_new()).collect();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].domain.as_deref(), Some("suspicious.com"));
        assert_eq!(new[0].severity, Severity::Low);
        assert_eq!(new[0].confidence, NEW_DOMAIN_CONFIDENCE);
        // 10% share against a 5% threshold
        assert!((new[0].score - 0.2).abs() < 1e-9);
        assert_eq!(new[0].timestamp, records[9].timestamp);
    }

    #[test]
    fn test_known_domain_surge() {
        // a.com is 25% of training traffic; 80% now is 3.2x.
        let mut records: Vec<_> = (0..8)
            .map(|i| rec(&format!("2024-05-03 10:{:02}:00", i), "a.com", "10.0.0.1"))
            .collect();
        records.push(rec("2024-05-03 10:30:00", "b.com", "10.0.0.1"));
        records.push(rec("2024-05-03 10:31:00", "c.com", "10.0.0.1"));

        let found = run(&records);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].domain.as_deref(), Some("a.com"));
        assert_eq!(found[0].severity, Severity::Medium);
        assert!(!found[0].is_new());
    }

    #[test]
    fn test_usual_mix_is_quiet() {
        assert!(run(&steady_records()).is_empty());
    }
}

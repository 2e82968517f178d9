use std::collections::BTreeMap;

use super::{ratio_score, Anomaly, AnomalyType, DetectionContext, Detector, Severity};
use crate::baseline::ClientProfile;
use crate::error::{checkpoint, EngineError};
use crate::record::ParsedRecord;

pub const KNOWN_CLIENT_CONFIDENCE: f64 = 0.8;
pub const NEW_CLIENT_CONFIDENCE: f64 = 0.6;
pub const QUERY_PATTERN_CONFIDENCE: f64 = 0.6;

/// Share of a known client's queries that may go to domains outside its
/// profile before the mix is reported.
pub const NOVEL_DOMAIN_SHARE: f64 = 0.8;

/// Per-client volume against trained profiles, plus clients never seen before.
pub struct ClientDetector;

impl Detector for ClientDetector {
    fn name(&self) -> &'static str {
        "client"
    }

    fn produces(&self) -> &'static [AnomalyType] {
        &[AnomalyType::UnusualClient, AnomalyType::QueryPattern]
    }

    fn detect(&self, ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, EngineError> {
        let mut by_client: BTreeMap<&str, Vec<&ParsedRecord>> = BTreeMap::new();
        for (i, record) in ctx.records.iter().enumerate() {
            checkpoint(ctx.cancel, i)?;
            by_client.entry(record.client.as_str()).or_default().push(record);
        }

        let th = &ctx.config.thresholds;
        let scale = ctx.scale();
        let floor = th.volume * scale;
        let busiest = ctx.baselines.client.busiest_typical_count();
        let mut anomalies = Vec::new();

        for (i, (client, queries)) in by_client.into_iter().enumerate() {
            checkpoint(ctx.cancel, i)?;
            let count = queries.len() as f64;
            let ts = queries.iter().map(|q| q.timestamp).max().unwrap_or_else(|| ctx.window_end());

            match ctx.baselines.client.profile(client) {
                Some(profile) => {
                    let limit = profile.typical_query_count + th.zscore * scale * profile.query_count_stddev;
                    if count > limit && ctx.config.is_enabled(AnomalyType::UnusualClient) {
                        anomalies.push(known_client(client, count, profile, ts));
                    }
                    if count >= floor && ctx.config.is_enabled(AnomalyType::QueryPattern) {
                        if let Some(a) = novel_domains(client, &queries, profile, ts) {
                            anomalies.push(a);
                        }
                    }
                }
                None if count > floor && ctx.config.is_enabled(AnomalyType::UnusualClient) => {
                    anomalies.push(new_client(client, count, floor, busiest, ts));
                }
                None => {}
            }
        }

        Ok(anomalies)
    }
}

fn known_client(
    client: &str,
    count: f64,
    profile: &ClientProfile,
    ts: chrono::DateTime<chrono::Utc>,
) -> Anomaly {
    let ratio = count / profile.typical_query_count;
    Anomaly::new(
        AnomalyType::UnusualClient,
        Severity::from_ratio(ratio),
        ts,
        client,
        format!(
            "Client {} sent {} queries, {:.1}x its usual {:.0}",
            client, count, ratio, profile.typical_query_count
        ),
        ratio_score(ratio),
        KNOWN_CLIENT_CONFIDENCE,
    )
    .with_client(client)
    .with_meta("count", count)
    .with_meta("typical_count", profile.typical_query_count)
    .with_meta("ratio", ratio)
    .with_meta("is_new", false)
}

/// A new client is low severity unless it out-queries every known client,
/// in which case it climbs the ratio ladder against the busiest one.
fn new_client(
    client: &str,
    count: f64,
    floor: f64,
    busiest: f64,
    ts: chrono::DateTime<chrono::Utc>,
) -> Anomaly {
    let (severity, score) = if busiest > 0.0 {
        let ratio = count / busiest;
        (Severity::from_ratio(ratio), ratio_score(ratio))
    } else {
        (Severity::Low, ratio_score(count / floor))
    };

    Anomaly::new(
        AnomalyType::UnusualClient,
        severity,
        ts,
        client,
        format!("New client {} sent {} queries", client, count),
        score,
        NEW_CLIENT_CONFIDENCE,
    )
    .with_client(client)
    .with_meta("count", count)
    .with_meta("busiest_known_count", busiest)
    .with_meta("is_new", true)
}

fn novel_domains(
    client: &str,
    queries: &[&ParsedRecord],
    profile: &ClientProfile,
    ts: chrono::DateTime<chrono::Utc>,
) -> Option<Anomaly> {
    let novel = queries
        .iter()
        .filter(|q| !profile.domain_frequencies.contains_key(&q.domain))
        .count();
    let share = novel as f64 / queries.len() as f64;
    if share <= NOVEL_DOMAIN_SHARE {
        return None;
    }

    Some(
        Anomaly::new(
            AnomalyType::QueryPattern,
            Severity::Low,
            ts,
            client,
            format!(
                "Client {} sent {:.0}% of its queries to domains it never used before",
                client,
                share * 100.0
            ),
            share,
            QUERY_PATTERN_CONFIDENCE,
        )
        .with_client(client)
        .with_meta("novel_queries", novel)
        .with_meta("novel_share", share),
    )
}

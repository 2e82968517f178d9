//! Property-based tests for detection bounds, trend direction and health scoring.

use chrono::DateTime;
use dnspulse::analysis::{classify_series, TrendDirection};
use dnspulse::detect::{Anomaly, AnomalyType, Severity};
use dnspulse::engine::health_score;
use dnspulse::{Engine, EngineConfig, EngineError, QueryRecord, QueryStatus};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

/// 2024-05-01T00:00:00Z
const DAY_START: i64 = 1_714_521_600;

const DOMAINS: [&str; 6] = [
    "domain0.com",
    "domain1.com",
    "domain2.com",
    "fresh.io",
    "tracker.example",
    "a-rather-long-subdomain-name.that-keeps-going.and-going.and-going.for-a-while.example.org",
];

fn baseline_records() -> Vec<QueryRecord> {
    (0..200)
        .map(|i| {
            QueryRecord::new(
                (DAY_START + i * 864).to_string(),
                format!("domain{}.com", i % 3),
                format!("10.0.0.{}", i % 4),
                QueryStatus::Forwarded,
            )
        })
        .collect()
}

// Generate arbitrary query records over the two days after training
prop_compose! {
    fn arb_record()(
        offset in 0i64..172_800,
        domain in 0..DOMAINS.len(),
        client in 0u8..8,
        blocked in any::<bool>(),
    ) -> QueryRecord {
        let status = if blocked { QueryStatus::Gravity } else { QueryStatus::Forwarded };
        QueryRecord::new(
            (DAY_START + 172_800 + offset).to_string(),
            DOMAINS[domain],
            format!("10.0.0.{}", client),
            status,
        )
    }
}

// Generate arbitrary severities
prop_compose! {
    fn arb_severity()(idx in 0..4usize) -> Severity {
        Severity::ALL[idx]
    }
}

prop_compose! {
    fn arb_anomaly()(
        kind in 0..AnomalyType::ALL.len(),
        severity in arb_severity(),
        ts in 0i64..1_000_000,
    ) -> Anomaly {
        Anomaly::new(
            AnomalyType::ALL[kind],
            severity,
            DateTime::from_timestamp(DAY_START + ts, 0).unwrap(),
            "subject",
            String::new(),
            0.5,
            0.5,
        )
    }
}

prop_compose! {
    fn arb_monotonic_series()(
        start in -1000.0f64..1000.0,
        steps in prop::collection::vec(0.01f64..100.0, 1..60),
    ) -> Vec<f64> {
        let mut value = start;
        let mut series = vec![value];
        for step in steps {
            value += step;
            series.push(value);
        }
        series
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn detected_anomalies_stay_in_bounds(
        batch in prop::collection::vec(arb_record(), 1..300),
        sensitivity in 0.0f64..=1.0,
        min_confidence in 0.0f64..=1.0,
    ) {
        let mut config = EngineConfig::default();
        config.anomaly_detection.sensitivity = sensitivity;
        config.anomaly_detection.min_confidence = min_confidence;

        let engine = Engine::new();
        let cancel = CancellationToken::new();
        engine.initialize(config).unwrap();
        engine.train(&baseline_records(), &cancel).unwrap();

        let anomalies = engine.detect_anomalies(&batch, &cancel).unwrap();
        for a in &anomalies {
            prop_assert!((0.0..=1.0).contains(&a.score), "score {} out of range", a.score);
            prop_assert!((0.0..=1.0).contains(&a.confidence));
            prop_assert!(a.confidence >= min_confidence);
        }
        prop_assert!(anomalies
            .windows(2)
            .all(|w| (w[0].timestamp, &w[0].id) < (w[1].timestamp, &w[1].id)));
    }

    #[test]
    fn strictly_increasing_series_is_increasing(series in arb_monotonic_series()) {
        prop_assert_eq!(classify_series(&series).direction, TrendDirection::Increasing);
    }

    #[test]
    fn strictly_decreasing_series_is_decreasing(series in arb_monotonic_series()) {
        let reversed: Vec<f64> = series.into_iter().rev().collect();
        prop_assert_eq!(classify_series(&reversed).direction, TrendDirection::Decreasing);
    }

    #[test]
    fn health_score_never_rises_with_more_anomalies(
        anomalies in prop::collection::vec(arb_anomaly(), 0..40),
        extra in arb_anomaly(),
    ) {
        let before = health_score(&anomalies);
        let mut more = anomalies.clone();
        more.push(extra);
        let after = health_score(&more);
        prop_assert!(after <= before);
        prop_assert!((0.0..=100.0).contains(&after));
    }

    #[test]
    fn health_score_never_rises_with_severity(
        anomalies in prop::collection::vec(arb_anomaly(), 1..40),
        idx in any::<prop::sample::Index>(),
    ) {
        let i = idx.index(anomalies.len());
        let mut worse = anomalies.clone();
        worse[i].severity = Severity::Critical;
        prop_assert!(health_score(&worse) <= health_score(&anomalies));
    }

    #[test]
    fn training_below_ten_records_fails(n in 0usize..10) {
        let engine = Engine::new();
        engine.initialize(EngineConfig::default()).unwrap();
        let records: Vec<_> = baseline_records().into_iter().take(n).collect();
        prop_assert_eq!(
            engine.train(&records, &CancellationToken::new()),
            Err(EngineError::InsufficientTrainingData { needed: 10, have: n })
        );
    }
}

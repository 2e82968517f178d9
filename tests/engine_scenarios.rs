//! End-to-end engine scenarios and lifecycle errors.

use std::sync::Arc;
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use chrono::Duration;
use dnspulse::analysis::TrendDirection;
use dnspulse::detect::{AnomalyType, Severity};
use dnspulse::engine::Lifecycle;
use dnspulse::{Engine, EngineConfig, EngineError, QueryRecord, QueryStatus};
use tokio_util::sync::CancellationToken;

/// 2024-05-01T00:00:00Z
const DAY_START: i64 = 1_714_521_600;

fn record(ts: i64, domain: &str, client: &str) -> QueryRecord {
    QueryRecord::new(ts.to_string(), domain, client, QueryStatus::Forwarded)
}

/// 100 records evenly spread over 24 hours, 8 domains and 4 clients.
fn normal_day() -> Vec<QueryRecord> {
    (0..100)
        .map(|i| {
            record(
                DAY_START + i * 864,
                &format!("domain{}.com", i % 8),
                &format!("192.168.1.{}", i % 4 + 10),
            )
        })
        .collect()
}

fn trained_engine() -> Engine {
    let engine = Engine::new();
    engine.initialize(EngineConfig::default()).unwrap();
    engine.train(&normal_day(), &CancellationToken::new()).unwrap();
    engine
}

#[test]
fn scenario_a_normal_traffic_is_quiet() {
    let engine = trained_engine();
    let anomalies = engine
        .detect_anomalies(&normal_day(), &CancellationToken::new())
        .unwrap();
    assert!(anomalies.is_empty(), "unexpected anomalies: {anomalies:#?}");
}

#[test]
fn scenario_b_new_heavy_client() {
    let engine = trained_engine();
    // each known client sent 25 queries; the newcomer sends 250
    let window: Vec<_> = (0..250)
        .map(|i| {
            record(
                DAY_START + 86_400 + 10 * 3600 + i * 10,
                &format!("unfamiliar{}.net", i % 5),
                "192.168.1.200",
            )
        })
        .collect();

    let anomalies = engine
        .detect_anomalies(&window, &CancellationToken::new())
        .unwrap();
    let client = anomalies
        .iter()
        .find(|a| a.anomaly_type == AnomalyType::UnusualClient)
        .expect("unusual-client anomaly");
    assert!(client.severity >= Severity::Medium);
    assert_eq!(client.client_ip.as_deref(), Some("192.168.1.200"));
    assert!(client.is_new());
}

#[test]
fn scenario_c_never_seen_domain() {
    let engine = trained_engine();
    let window: Vec<_> = (0..50)
        .map(|i| record(DAY_START + 86_400 + i * 30, "suspicious.com", "192.168.1.10"))
        .collect();

    let anomalies = engine
        .detect_anomalies(&window, &CancellationToken::new())
        .unwrap();
    assert!(anomalies.iter().any(|a| a.anomaly_type == AnomalyType::UnusualDomain
        && a.is_new()
        && a.domain.as_deref() == Some("suspicious.com")));
}

#[test]
fn scenario_d_linear_growth() {
    let engine = trained_engine();
    let start = DAY_START + 2 * 86_400;
    let mut series = Vec::new();
    for hour in 0..100i64 {
        for q in 0..=hour {
            series.push(record(start + hour * 3600 + q, "domain1.com", "192.168.1.10"));
        }
    }

    let analysis = engine
        .analyze_trends(&series, Duration::days(7), &CancellationToken::new())
        .unwrap();
    assert_eq!(analysis.query_trend, TrendDirection::Increasing);
    assert!(!analysis.hourly_patterns.is_empty());
    assert!(!analysis.daily_patterns.is_empty());
    let hourly: f64 = analysis.hourly_patterns.values().sum();
    let daily: f64 = analysis.daily_patterns.values().sum();
    assert!((hourly - 1.0).abs() < 1e-6);
    assert!((daily - 1.0).abs() < 1e-6);
    assert!(engine.status().last_analysis.is_some());
}

#[test]
fn scenario_e_forecast_widens() {
    let engine = trained_engine();
    let prediction = engine
        .predict_trends(&normal_day(), Duration::hours(6), &CancellationToken::new())
        .unwrap();

    assert_eq!(prediction.method, "exponential-smoothing");
    let p = &prediction.predictions;
    assert!(!p.is_empty());
    assert!(p.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert!(p
        .windows(2)
        .all(|w| w[1].confidence_interval.width() > w[0].confidence_interval.width()));
    assert!(p.iter().all(|f| f.confidence_interval.lower >= 0.0));
}

#[test]
fn process_data_reports_everything() {
    let engine = trained_engine();
    let mut batch = normal_day();
    batch.extend((0..50).map(|i| record(DAY_START + 86_000 + i, "suspicious.com", "192.168.1.10")));
    batch.sort_by_key(|r| r.timestamp.parse::<i64>().unwrap());

    let results = engine.process_data(&batch, &CancellationToken::new()).unwrap();
    assert!(results.summary.total_anomalies > 0);
    assert!(results.summary.health_score < 100.0);
    assert!(results.trend_analysis.is_some());
    assert!(!results.predictions.unwrap().predictions.is_empty());
    assert_eq!(
        results.summary.total_anomalies,
        results.summary.by_type.values().sum::<usize>()
    );
}

#[test]
fn lifecycle_errors() {
    let cancel = CancellationToken::new();
    let engine = Engine::new();
    assert_eq!(engine.status().status, Lifecycle::Uninitialized);
    assert_eq!(
        engine.detect_anomalies(&normal_day(), &cancel).unwrap_err(),
        EngineError::NotInitialized
    );

    engine.initialize(EngineConfig::default()).unwrap();
    let few: Vec<_> = normal_day().into_iter().take(9).collect();
    assert_eq!(
        engine.train(&few, &cancel).unwrap_err(),
        EngineError::InsufficientTrainingData { needed: 10, have: 9 }
    );
    assert_eq!(engine.status().errors.len(), 1);

    assert_eq!(
        engine.detect_anomalies(&normal_day(), &cancel).unwrap_err(),
        EngineError::UntrainedModel
    );
    assert_eq!(
        engine
            .analyze_trends(&normal_day(), Duration::days(1), &cancel)
            .unwrap_err(),
        EngineError::UntrainedModel
    );
    assert_eq!(
        engine
            .predict_trends(&normal_day(), Duration::hours(6), &cancel)
            .unwrap_err(),
        EngineError::UntrainedModel
    );
    assert_eq!(
        engine.process_data(&normal_day(), &cancel).unwrap_err(),
        EngineError::UntrainedModel
    );

    engine.train(&normal_day(), &cancel).unwrap();
    let status = engine.status();
    assert!(status.initialized && status.trained);
    assert!(status.errors.is_empty());
    assert_eq!(engine.model_info().training_set_size, 100);
}

#[test]
fn cancellation_is_honoured() {
    let engine = Engine::new();
    engine.initialize(EngineConfig::default()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert_eq!(
        engine.train(&normal_day(), &cancel).unwrap_err(),
        EngineError::CancelledOperation
    );
    assert!(!engine.status().trained);

    let engine = trained_engine();
    assert_eq!(
        engine.detect_anomalies(&normal_day(), &cancel).unwrap_err(),
        EngineError::CancelledOperation
    );
    assert_eq!(
        engine
            .analyze_trends(&normal_day(), Duration::days(7), &cancel)
            .unwrap_err(),
        EngineError::CancelledOperation
    );
    assert_eq!(
        engine
            .predict_trends(&normal_day(), Duration::hours(6), &cancel)
            .unwrap_err(),
        EngineError::CancelledOperation
    );
    assert_eq!(
        engine.process_data(&normal_day(), &cancel).unwrap_err(),
        EngineError::CancelledOperation
    );
    assert!(engine.status().trained);
}

#[test]
fn cancelling_a_long_trend_analysis_returns_promptly() {
    let mut config = EngineConfig::default();
    config.anomaly_detection.window_size = std::time::Duration::from_secs(1);
    let engine = Engine::new();
    engine.initialize(config).unwrap();
    engine.train(&normal_day(), &CancellationToken::new()).unwrap();

    // three hours of one query per second: 10,800 one-second windows
    let batch: Vec<_> = (0..10_800)
        .map(|i| {
            record(
                DAY_START + 86_400 + i,
                &format!("domain{}.com", i % 5),
                &format!("192.168.1.{}", i % 4 + 10),
            )
        })
        .collect();

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(50));
            cancel.cancel();
            Instant::now()
        })
    };
    let result = engine.analyze_trends(&batch, Duration::days(7), &cancel);
    let returned = Instant::now();
    let cancelled_at = canceller.join().unwrap();

    assert_eq!(result.unwrap_err(), EngineError::CancelledOperation);
    assert!(returned.saturating_duration_since(cancelled_at) < StdDuration::from_secs(1));
}

#[test]
fn falling_traffic_forecast_still_widens() {
    let engine = trained_engine();
    let start = DAY_START + 2 * 86_400;
    let mut series = Vec::new();
    for (hour, count) in (30..=100).rev().step_by(10).enumerate() {
        for q in 0..count {
            series.push(record(start + hour as i64 * 3600 + q, "domain1.com", "192.168.1.10"));
        }
    }

    let prediction = engine
        .predict_trends(&series, Duration::hours(6), &CancellationToken::new())
        .unwrap();
    let p = &prediction.predictions;
    assert_eq!(p.len(), 6);
    assert!(p
        .windows(2)
        .all(|w| w[1].confidence_interval.width() > w[0].confidence_interval.width()));
    assert!(p.iter().all(|f| f.confidence_interval.lower >= 0.0
        && f.confidence_interval.lower <= f.predicted_count
        && f.predicted_count <= f.confidence_interval.upper));
}

#[test]
fn huge_analysis_window_covers_the_whole_batch() {
    let engine = trained_engine();
    let analysis = engine
        .analyze_trends(
            &normal_day(),
            Duration::days(365 * 300_000),
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(analysis.total_queries, 100);
}

#[test]
fn far_apart_timestamps_stay_bounded() {
    let cancel = CancellationToken::new();
    let engine = Engine::new();
    engine.initialize(EngineConfig::default()).unwrap();

    let mut training = normal_day();
    training.insert(0, record(0, "domain0.com", "192.168.1.10"));
    training.push(record(999_999_999_999, "domain0.com", "192.168.1.10"));
    engine.train(&training, &cancel).unwrap();
    assert_eq!(engine.model_info().training_set_size, 101);

    let mut batch = normal_day();
    batch.insert(0, record(0, "domain1.com", "192.168.1.11"));
    assert!(engine.detect_anomalies(&batch, &cancel).is_ok());
}

#[test]
fn retraining_never_exposes_a_partial_baseline() {
    let engine = Arc::new(trained_engine());

    let detector = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let cancel = CancellationToken::new();
            for _ in 0..20 {
                let anomalies = engine.detect_anomalies(&normal_day(), &cancel).unwrap();
                assert!(anomalies.is_empty());
            }
        })
    };
    for _ in 0..5 {
        engine.train(&normal_day(), &CancellationToken::new()).unwrap();
    }
    detector.join().unwrap();
}

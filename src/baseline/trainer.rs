use std::collections::{BTreeMap, HashMap};
use std::thread;

use chrono::{Datelike, Duration, Timelike, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::types::{
    BaselineSet, ClientBaseline, ClientProfile, DomainBaseline, QueryVolumeBaseline,
    ResponseTimeBaseline, TimePatternBaseline,
};
use crate::analysis::stats::{normalize, TimeSeries};
use crate::analysis::window::WindowGrid;
use crate::error::{checkpoint, ensure_active, EngineError};
use crate::record::ParsedRecord;

/// Fewest valid records a training window may contain.
pub const MIN_TRAINING_RECORDS: usize = 10;

/// Client query-count spread, as a fraction of the client's count.
pub const CLIENT_STDDEV_FRACTION: f64 = 0.3;

/// Parameters the trainer needs from the engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct TrainingParams {
    pub window_size: Duration,
    pub new_domain_threshold: f64,
}

/// Compute all five baselines from `records` (sorted by timestamp).
///
/// The computations are independent and run on scoped threads; the set is
/// only assembled once every one of them has succeeded.
pub fn train(
    records: &[ParsedRecord],
    params: TrainingParams,
    cancel: &CancellationToken,
) -> Result<BaselineSet, EngineError> {
    if records.len() < MIN_TRAINING_RECORDS {
        return Err(EngineError::InsufficientTrainingData {
            needed: MIN_TRAINING_RECORDS,
            have: records.len(),
        });
    }
    ensure_active(cancel)?;

    let (volume, domain, client, response_time, time_pattern) = thread::scope(|s| {
        let volume = s.spawn(|| volume_baseline(records, params.window_size, cancel));
        let domain = s.spawn(|| domain_baseline(records, params.new_domain_threshold, cancel));
        let client = s.spawn(|| client_baseline(records, cancel));
        let response_time = s.spawn(|| response_time_baseline(records, cancel));
        let time_pattern = s.spawn(|| time_pattern_baseline(records, cancel));
        (
            join(volume),
            join(domain),
            join(client),
            join(response_time),
            join(time_pattern),
        )
    });

    let set = BaselineSet {
        volume: volume?,
        domain: domain?,
        client: client?,
        response_time: response_time?,
        time_pattern: time_pattern?,
        trained_at: Utc::now(),
        training_records: records.len(),
    };

    info!(
        records = set.training_records,
        windows = set.volume.windows,
        domains = set.domain.frequencies.len(),
        clients = set.client.profiles.len(),
        "baselines trained"
    );
    Ok(set)
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, T>) -> T {
    handle
        .join()
        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
}

pub(crate) fn volume_baseline(
    records: &[ParsedRecord],
    window_size: Duration,
    cancel: &CancellationToken,
) -> Result<QueryVolumeBaseline, EngineError> {
    let Some(grid) = WindowGrid::spanning(records, window_size) else {
        return Ok(QueryVolumeBaseline::default());
    };

    let mut by_hour: Vec<Vec<f64>> = vec![Vec::new(); 24];
    let mut by_day: Vec<Vec<f64>> = vec![Vec::new(); 7];
    let mut all = Vec::with_capacity(grid.len());
    let mut blocked = 0usize;

    for (i, window) in grid.counts(records).into_iter().enumerate() {
        checkpoint(cancel, i)?;
        let count = window.total as f64;
        by_hour[window.start.hour() as usize].push(count);
        by_day[window.start.weekday().num_days_from_monday() as usize].push(count);
        all.push(count);
        blocked += window.blocked;
    }

    let mut baseline = QueryVolumeBaseline {
        overall: TimeSeries::new(all).summary(),
        blocked_ratio: blocked as f64 / records.len() as f64,
        windows: grid.len(),
        window_size_secs: window_size.num_seconds(),
        ..Default::default()
    };
    for (slot, counts) in baseline.hourly.iter_mut().zip(by_hour) {
        *slot = TimeSeries::new(counts).summary();
    }
    for (slot, counts) in baseline.daily.iter_mut().zip(by_day) {
        *slot = TimeSeries::new(counts).summary();
    }

    debug!(
        windows = baseline.windows,
        mean = baseline.overall.mean,
        std_dev = baseline.overall.std_dev,
        "volume baseline computed"
    );
    Ok(baseline)
}

pub(crate) fn domain_baseline(
    records: &[ParsedRecord],
    new_domain_threshold: f64,
    cancel: &CancellationToken,
) -> Result<DomainBaseline, EngineError> {
    let counts = count_domains(records, cancel)?;
    let total = records.len() as f64;

    Ok(DomainBaseline {
        frequencies: counts
            .into_iter()
            .map(|(domain, count)| (domain.to_string(), count as f64 / total))
            .collect(),
        total_queries: records.len(),
        new_domain_threshold,
    })
}

pub(crate) fn client_baseline(
    records: &[ParsedRecord],
    cancel: &CancellationToken,
) -> Result<ClientBaseline, EngineError> {
    let mut by_client: HashMap<&str, Vec<&ParsedRecord>> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        checkpoint(cancel, i)?;
        by_client.entry(record.client.as_str()).or_default().push(record);
    }

    let mut profiles = HashMap::with_capacity(by_client.len());
    for (i, (client, queries)) in by_client.into_iter().enumerate() {
        checkpoint(cancel, i)?;
        profiles.insert(client.to_string(), client_profile(&queries));
    }

    Ok(ClientBaseline { profiles })
}

/// Build a profile from one client's records (non-empty, sorted by time).
pub(crate) fn client_profile(queries: &[&ParsedRecord]) -> ClientProfile {
    let count = queries.len() as f64;

    let mut domains: HashMap<&str, usize> = HashMap::new();
    let mut hours: BTreeMap<u32, usize> = BTreeMap::new();
    for q in queries {
        *domains.entry(q.domain.as_str()).or_default() += 1;
        *hours.entry(q.timestamp.hour()).or_default() += 1;
    }

    ClientProfile {
        typical_query_count: count,
        query_count_stddev: count * CLIENT_STDDEV_FRACTION,
        domain_frequencies: domains
            .into_iter()
            .map(|(d, c)| (d.to_string(), c as f64 / count))
            .collect(),
        hourly_frequencies: hours
            .into_iter()
            .map(|(h, c)| (h, c as f64 / count))
            .collect(),
        last_seen: queries
            .iter()
            .map(|q| q.timestamp)
            .max()
            .unwrap_or_else(Utc::now),
    }
}

pub(crate) fn response_time_baseline(
    records: &[ParsedRecord],
    cancel: &CancellationToken,
) -> Result<ResponseTimeBaseline, EngineError> {
    let mut latencies = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        checkpoint(cancel, i)?;
        latencies.push(record.latency_ms());
    }

    let series = TimeSeries::new(latencies);
    Ok(ResponseTimeBaseline {
        mean: series.mean(),
        std_dev: series.std_dev(),
        p95: series.percentile(0.95),
        p99: series.percentile(0.99),
        sample_count: series.len(),
    })
}

pub(crate) fn time_pattern_baseline(
    records: &[ParsedRecord],
    cancel: &CancellationToken,
) -> Result<TimePatternBaseline, EngineError> {
    let (hours, days) = time_histograms(records, cancel)?;

    let mut baseline = TimePatternBaseline::default();
    for (slot, freq) in baseline.hourly.iter_mut().zip(normalize(hours)) {
        *slot = freq;
    }
    for (slot, freq) in baseline.daily.iter_mut().zip(normalize(days)) {
        *slot = freq;
    }
    Ok(baseline)
}

/// Raw query counts per hour of day and per day of week (Monday = 0).
pub(crate) fn time_histograms(
    records: &[ParsedRecord],
    cancel: &CancellationToken,
) -> Result<([f64; 24], [f64; 7]), EngineError> {
    let mut hours = [0.0; 24];
    let mut days = [0.0; 7];
    for (i, record) in records.iter().enumerate() {
        checkpoint(cancel, i)?;
        hours[record.timestamp.hour() as usize] += 1.0;
        days[record.timestamp.weekday().num_days_from_monday() as usize] += 1.0;
    }
    Ok((hours, days))
}

/// Query count per normalized domain.
pub(crate) fn count_domains<'a>(
    records: &'a [ParsedRecord],
    cancel: &CancellationToken,
) -> Result<HashMap<&'a str, usize>, EngineError> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        checkpoint(cancel, i)?;
        *counts.entry(record.domain.as_str()).or_default() += 1;
    }
    Ok(counts)
}

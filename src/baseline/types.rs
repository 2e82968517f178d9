use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::stats::Summary;

/// Query counts per window, by hour of day, by day of week (Monday = 0) and overall.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryVolumeBaseline {
    pub hourly: [Summary; 24],
    pub daily: [Summary; 7],
    pub overall: Summary,
    /// Fraction of training queries the resolver blocked.
    pub blocked_ratio: f64,
    /// Number of windows (including empty ones) the summaries were built from.
    pub windows: usize,
    pub window_size_secs: i64,
}

/// How often each domain was queried during training.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainBaseline {
    /// Normalized domain -> fraction of all training queries.
    pub frequencies: HashMap<String, f64>,
    pub total_queries: usize,
    /// Share of a detection window a never-seen domain must exceed to be reported.
    pub new_domain_threshold: f64,
}

impl DomainBaseline {
    pub fn frequency(&self, domain: &str) -> Option<f64> {
        self.frequencies.get(domain).copied()
    }
}

/// Behaviour of a single client address during training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub typical_query_count: f64,
    /// Estimated as a fixed fraction of the count, not a sample deviation:
    /// a single training window gives one observation per client.
    pub query_count_stddev: f64,
    pub domain_frequencies: HashMap<String, f64>,
    /// Hour of day -> fraction of this client's queries.
    pub hourly_frequencies: BTreeMap<u32, f64>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientBaseline {
    pub profiles: HashMap<String, ClientProfile>,
}

impl ClientBaseline {
    pub fn profile(&self, client: &str) -> Option<&ClientProfile> {
        self.profiles.get(client)
    }

    /// Typical query count of the most active known client.
    pub fn busiest_typical_count(&self) -> f64 {
        self.profiles
            .values()
            .map(|p| p.typical_query_count)
            .fold(0.0, f64::max)
    }
}

/// Latency distribution in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeBaseline {
    pub mean: f64,
    pub std_dev: f64,
    pub p95: f64,
    pub p99: f64,
    pub sample_count: usize,
}

/// Normalized query share per hour of day and day of week (Monday = 0).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimePatternBaseline {
    pub hourly: [f64; 24],
    pub daily: [f64; 7],
}

/// One complete, immutable generation of trained baselines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSet {
    pub volume: QueryVolumeBaseline,
    pub domain: DomainBaseline,
    pub client: ClientBaseline,
    pub response_time: ResponseTimeBaseline,
    pub time_pattern: TimePatternBaseline,
    pub trained_at: DateTime<Utc>,
    pub training_records: usize,
}

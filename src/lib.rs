//! dnspulse -- anomaly detection and trend analysis for DNS query logs.
//!
//! This crate learns baselines of normal resolver traffic, flags deviations
//! from them and forecasts query volume. All operations are synchronous,
//! in-memory and cancellable.

pub mod analysis;
pub mod baseline;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod record;

use std::path::Path;

use anyhow::{Context, Result};

pub use config::EngineConfig;
pub use engine::{Engine, EngineStatus, MLResults, MLSummary, ModelInfo};
pub use error::EngineError;
pub use record::{QueryRecord, QueryStatus};

/// Read a JSON array of query records from `path`.
pub fn read_records(path: &Path) -> Result<Vec<QueryRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read records file: {}", path.display()))?;
    let records: Vec<QueryRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse records file: {}", path.display()))?;
    tracing::debug!(path = %path.display(), records = records.len(), "records loaded");
    Ok(records)
}

//! Query-volume spikes, dropouts and blocked-query surges per time window.

use chrono::Timelike;

use super::{ratio_score, Anomaly, AnomalyType, DetectionContext, Detector, Severity};
use crate::analysis::stats::z_score;
use crate::analysis::window::{WindowCount, WindowGrid};
use crate::error::{checkpoint, EngineError};

pub const SPIKE_CONFIDENCE: f64 = 0.8;
pub const DROPOUT_CONFIDENCE: f64 = 0.7;
pub const BLOCKED_SPIKE_CONFIDENCE: f64 = 0.7;

/// Spread floor (queries) for hours whose training windows were identical.
///
/// This departs from the plain `count > mean + k * stddev` rule: with a
/// trained stddev of zero that rule flags any window one query above the
/// mean, so the spike test and the z-score both use `max(stddev, 1)`.
pub const MIN_WINDOW_STD_DEV: f64 = 1.0;

/// Blocked queries a window needs before its blocked ratio is judged.
pub const MIN_BLOCKED_QUERIES: usize = 5;

pub struct VolumeDetector;

impl Detector for VolumeDetector {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn produces(&self) -> &'static [AnomalyType] {
        &[
            AnomalyType::VolumeSpike,
            AnomalyType::VolumeDropout,
            AnomalyType::BlockedSpike,
        ]
    }

    fn detect(&self, ctx: &DetectionContext<'_>) -> Result<Vec<Anomaly>, EngineError> {
        let Some(grid) = WindowGrid::spanning(ctx.records, ctx.window_size) else {
            return Ok(Vec::new());
        };

        let th = &ctx.config.thresholds;
        let scale = ctx.scale();
        let multiplier = th.volume_spike_multiplier * scale;
        let dropout_threshold = (th.volume_dropout_threshold / scale).min(0.99);

        let windows = grid.counts(ctx.records);
        let last = windows.len() - 1;
        let mut anomalies = Vec::new();

        for (i, window) in windows.iter().enumerate() {
            checkpoint(ctx.cancel, i)?;

            let hour = window.start.hour() as usize;
            let base = ctx.baselines.volume.hourly[hour];
            if base.sample_count == 0 {
                continue;
            }

            let count = window.total as f64;
            let spread = base.std_dev.max(MIN_WINDOW_STD_DEV);
            let z = z_score(count, base.mean, base.std_dev, MIN_WINDOW_STD_DEV);

            if count > base.mean + multiplier * spread {
                if ctx.config.is_enabled(AnomalyType::VolumeSpike) {
                    anomalies.push(spike(window, base.mean, base.std_dev, z));
                }
            } else if count < base.mean * dropout_threshold
                // Edge windows may be only partly covered by the input.
                && i != 0
                && i != last
                && ctx.config.is_enabled(AnomalyType::VolumeDropout)
            {
                anomalies.push(dropout(window, base.mean, z));
            }

            if ctx.config.is_enabled(AnomalyType::BlockedSpike) {
                let baseline_ratio = ctx.baselines.volume.blocked_ratio;
                if let Some(a) = blocked_spike(window, baseline_ratio, th.frequency * scale) {
                    anomalies.push(a);
                }
            }
        }

        Ok(anomalies)
    }
}

fn spike_severity(z: f64) -> Severity {
    if z > 4.0 {
        Severity::Critical
    } else if z > 3.0 {
        Severity::High
    } else if z > 2.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn spike(window: &WindowCount, mean: f64, std_dev: f64, z: f64) -> Anomaly {
    Anomaly::new(
        AnomalyType::VolumeSpike,
        spike_severity(z),
        window.start,
        "window",
        format!(
            "Query volume spike: {} queries in window starting {} (expected {:.1} ± {:.1}, z-score {:.1})",
            window.total,
            window.start.to_rfc3339(),
            mean,
            std_dev,
            z
        ),
        z.abs() / 3.0,
        SPIKE_CONFIDENCE,
    )
    .with_meta("count", window.total)
    .with_meta("baseline_mean", mean)
    .with_meta("baseline_std_dev", std_dev)
    .with_meta("z_score", z)
}

fn dropout(window: &WindowCount, mean: f64, z: f64) -> Anomaly {
    let severity = if window.total == 0 {
        Severity::High
    } else {
        Severity::Medium
    };
    Anomaly::new(
        AnomalyType::VolumeDropout,
        severity,
        window.start,
        "window",
        format!(
            "Query volume dropout: {} queries in window starting {} (expected {:.1})",
            window.total,
            window.start.to_rfc3339(),
            mean
        ),
        z.abs() / 3.0,
        DROPOUT_CONFIDENCE,
    )
    .with_meta("count", window.total)
    .with_meta("baseline_mean", mean)
    .with_meta("z_score", z)
}

fn blocked_spike(window: &WindowCount, baseline_ratio: f64, multiplier: f64) -> Option<Anomaly> {
    if window.blocked < MIN_BLOCKED_QUERIES || window.total == 0 {
        return None;
    }
    let ratio = window.blocked as f64 / window.total as f64;
    if baseline_ratio > 0.0 && ratio <= baseline_ratio * multiplier {
        return None;
    }

    let score = if baseline_ratio > 0.0 {
        ratio_score(ratio / baseline_ratio)
    } else {
        1.0
    };
    Some(
        Anomaly::new(
            AnomalyType::BlockedSpike,
            Severity::Medium,
            window.start,
            "window",
            format!(
                "Blocked queries surged to {:.0}% of {} queries (baseline {:.1}%)",
                ratio * 100.0,
                window.total,
                baseline_ratio * 100.0
            ),
            score,
            BLOCKED_SPIKE_CONFIDENCE,
        )
        .with_meta("blocked", window.blocked)
        .with_meta("count", window.total)
        .with_meta("blocked_ratio", ratio)
        .with_meta("baseline_blocked_ratio", baseline_ratio),
    )
}

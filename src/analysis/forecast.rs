use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stats::TimeSeries;

/// Reported verbatim in every prediction.
pub const FORECAST_METHOD: &str = "exponential-smoothing";

/// Overall confidence attached to a prediction. Not learned.
pub const FORECAST_CONFIDENCE: f64 = 0.75;

pub const MAX_FORECAST_STEPS: usize = 168;

/// Two-sided 95% normal quantile.
const Z_95: f64 = 1.96;

/// Residual spread floor in queries per window.
pub const MIN_RESIDUAL_STD_DEV: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Projected query count for one future window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub timestamp: DateTime<Utc>,
    pub predicted_count: f64,
    pub confidence_interval: ConfidenceInterval,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPrediction {
    #[serde(with = "humantime_serde")]
    pub forecast_window: Duration,
    pub predictions: Vec<Forecast>,
    pub confidence: f64,
    pub method: String,
    pub created_at: DateTime<Utc>,
}

/// Final state of double exponential smoothing over a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoothed {
    pub level: f64,
    pub trend: f64,
    /// Spread of the one-step-ahead errors, floored at [`MIN_RESIDUAL_STD_DEV`].
    pub residual_std: f64,
}

impl Smoothed {
    /// Run level/trend smoothing with the same weight `alpha` for both
    /// components. `None` for an empty series.
    pub fn fit(series: &[f64], alpha: f64) -> Option<Self> {
        let (&first, rest) = series.split_first()?;
        let alpha = alpha.clamp(0.0, 1.0);

        let mut level = first;
        let mut trend = rest.first().map(|&second| second - first).unwrap_or(0.0);
        let mut errors = Vec::with_capacity(rest.len());

        for &y in rest {
            let expected = level + trend;
            errors.push(y - expected);

            let prev_level = level;
            level = alpha * y + (1.0 - alpha) * expected;
            trend = alpha * (level - prev_level) + (1.0 - alpha) * trend;
        }

        Some(Self {
            level,
            trend,
            residual_std: TimeSeries::new(errors).std_dev().max(MIN_RESIDUAL_STD_DEV),
        })
    }

    /// Point estimate and interval `steps` windows past the end of the series.
    /// Counts cannot go negative, so both are clamped at zero. A clamped
    /// interval is shifted up rather than cut, keeping its width at
    /// `2 * half_width`.
    pub fn project(&self, steps: usize) -> (f64, ConfidenceInterval) {
        let h = steps as f64;
        let predicted = (self.level + h * self.trend).max(0.0);
        let half_width = Z_95 * self.residual_std * h;
        let lower = (predicted - half_width).max(0.0);
        (
            predicted,
            ConfidenceInterval {
                lower,
                upper: lower + 2.0 * half_width,
            },
        )
    }
}

/// Number of windows to project for a forecast horizon.
pub fn forecast_steps(forecast_window: chrono::Duration, window_size: chrono::Duration) -> usize {
    let size = window_size.num_seconds().max(1);
    let steps = forecast_window.num_seconds() / size;
    (steps.max(1) as usize).min(MAX_FORECAST_STEPS)
}

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::convert::Infallible;
use std::fmt;

use chrono::{DateTime, Datelike, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::forecast::{forecast_steps, Forecast, Smoothed, TrendPrediction, FORECAST_CONFIDENCE, FORECAST_METHOD};
use super::insights::{self, InsightInputs, WEEKDAY_NAMES};
use super::stats::{normalize, TimeSeries};
use super::window::WindowGrid;
use crate::baseline::trainer::time_histograms;
use crate::config::{to_chrono, TrendAnalysisConfig};
use crate::error::{checkpoint, ensure_active, EngineError};
use crate::record::ParsedRecord;

/// Relative change over the window below which a slope is treated as noise.
pub const NOISE_FLOOR: f64 = 0.1;

/// Mann-Kendall consistency that marks a series as trending regardless of size.
pub const CONSISTENCY_THRESHOLD: f64 = 0.6;

/// Residual coefficient of variation above which a flat series is volatile.
pub const VOLATILITY_THRESHOLD: f64 = 0.5;

/// Domains and clients given their own trend line.
pub const TOP_SUBJECTS: usize = 20;

pub const ANALYZER_NAME: &str = "dnspulse-trend-analyzer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    Volatile,
}

impl TrendDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Stable => "stable",
            TrendDirection::Volatile => "volatile",
        }
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Direction of one series plus the numbers behind it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesTrend {
    pub direction: TrendDirection,
    pub slope: f64,
    /// Change between the fitted first and last points, in percent.
    pub change_percent: f64,
}

/// Classify a per-window count series.
///
/// A non-zero slope counts when the fitted change over the series exceeds
/// [`NOISE_FLOOR`] of the mean, or when the values move consistently in one
/// direction. Otherwise the residual spread decides between volatile and
/// stable.
pub fn classify_series(values: &[f64]) -> SeriesTrend {
    match classify_with(values, |_| Ok::<(), Infallible>(())) {
        Ok(trend) => trend,
        Err(never) => match never {},
    }
}

/// [`classify_series`] that polls `cancel` while scanning for consistency.
pub fn classify_series_checked(
    values: &[f64],
    cancel: &CancellationToken,
) -> Result<SeriesTrend, EngineError> {
    classify_with(values, |_| ensure_active(cancel))
}

fn classify_with<E, F>(values: &[f64], check: F) -> Result<SeriesTrend, E>
where
    F: FnMut(usize) -> Result<(), E>,
{
    let series = TimeSeries::new(values.to_vec());
    let Some(fit) = series.regression() else {
        return Ok(SeriesTrend {
            direction: TrendDirection::Stable,
            slope: 0.0,
            change_percent: 0.0,
        });
    };

    let n = series.len() as f64;
    let mean = series.mean();
    let relative = if mean.abs() > f64::EPSILON {
        fit.slope * n / mean.abs()
    } else {
        0.0
    };
    let consistency = series.kendall_tau_checked(check)?;

    let direction = if fit.slope != 0.0
        && (relative.abs() > NOISE_FLOOR || consistency.abs() > CONSISTENCY_THRESHOLD)
    {
        if fit.slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        }
    } else if mean > 0.0 && fit.residual_std / mean > VOLATILITY_THRESHOLD {
        TrendDirection::Volatile
    } else {
        TrendDirection::Stable
    };

    let first = fit.fitted(0);
    let last = fit.fitted(series.len() - 1);
    let change_percent = if first.abs() > f64::EPSILON {
        (last - first) / first.abs() * 100.0
    } else if last > 0.0 {
        100.0
    } else {
        0.0
    };

    Ok(SeriesTrend {
        direction,
        slope: fit.slope,
        change_percent,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainTrend {
    pub domain: String,
    pub total_queries: usize,
    pub direction: TrendDirection,
    pub change_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientTrend {
    pub client: String,
    pub total_queries: usize,
    pub direction: TrendDirection,
    pub change_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub time_window: TimeWindow,
    pub total_queries: usize,
    pub query_trend: TrendDirection,
    pub query_change_percent: f64,
    pub domain_trends: Vec<DomainTrend>,
    pub client_trends: Vec<ClientTrend>,
    /// Hour of day -> share of queries.
    pub hourly_patterns: BTreeMap<u32, f64>,
    /// Weekday name -> share of queries.
    pub daily_patterns: BTreeMap<String, f64>,
    pub insights: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerInfo {
    pub name: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub analyses_run: u64,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Usage {
    analyses_run: u64,
    last_updated: Option<DateTime<Utc>>,
}

/// Computes trend analyses and forecasts at a fixed window granularity.
#[derive(Debug)]
pub struct TrendAnalyzer {
    config: TrendAnalysisConfig,
    window_size: Duration,
    created_at: DateTime<Utc>,
    usage: Mutex<Usage>,
}

impl TrendAnalyzer {
    pub fn new(config: TrendAnalysisConfig, window_size: Duration) -> Self {
        Self {
            config,
            window_size,
            created_at: Utc::now(),
            usage: Mutex::new(Usage::default()),
        }
    }

    pub fn config(&self) -> &TrendAnalysisConfig {
        &self.config
    }

    /// Analyze the `window` ending at the latest record. `records` must be
    /// sorted by timestamp.
    pub fn analyze(
        &self,
        records: &[ParsedRecord],
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<TrendAnalysis, EngineError> {
        ensure_active(cancel)?;
        let recent = self.recent(records, window)?;
        let grid = self.grid(recent)?;

        let query = classify_series_checked(&grid.series(recent), cancel)?;
        let domain_trends = self
            .subject_trends(recent, &grid, |r| r.domain.as_str(), cancel)?
            .into_iter()
            .map(|(domain, total_queries, t)| DomainTrend {
                domain,
                total_queries,
                direction: t.direction,
                change_percent: t.change_percent,
            })
            .collect::<Vec<_>>();
        let client_trends = self
            .subject_trends(recent, &grid, |r| r.client.as_str(), cancel)?
            .into_iter()
            .map(|(client, total_queries, t)| ClientTrend {
                client,
                total_queries,
                direction: t.direction,
                change_percent: t.change_percent,
            })
            .collect();

        let (hour_counts, day_counts) = time_histograms(recent, cancel)?;
        let mut hourly = [0.0; 24];
        hourly.copy_from_slice(&normalize(hour_counts));
        let daily = normalize(day_counts);

        let total = recent.len();
        let top_domain = domain_trends
            .first()
            .map(|d| (d.domain.as_str(), d.total_queries as f64 / total as f64));
        let insights = insights::generate(&InsightInputs {
            hourly: &hourly,
            daily_counts: &day_counts,
            days_covered: &days_covered(recent),
            top_domain,
            direction: query.direction,
            change_percent: query.change_percent,
        });

        let analysis = TrendAnalysis {
            time_window: TimeWindow {
                start: recent[0].timestamp,
                end: recent[total - 1].timestamp,
            },
            total_queries: total,
            query_trend: query.direction,
            query_change_percent: query.change_percent,
            domain_trends,
            client_trends,
            hourly_patterns: (0u32..).zip(hourly).collect(),
            daily_patterns: WEEKDAY_NAMES
                .iter()
                .map(|name| name.to_string())
                .zip(daily)
                .collect(),
            insights,
            created_at: Utc::now(),
        };

        self.record_use(analysis.created_at);
        info!(
            records = total,
            windows = grid.len(),
            trend = %analysis.query_trend,
            "trend analysis complete"
        );
        Ok(analysis)
    }

    /// Forecast per-window query counts for `forecast_window` past the
    /// latest record, using the configured analysis window as history.
    pub fn predict(
        &self,
        records: &[ParsedRecord],
        forecast_window: Duration,
        cancel: &CancellationToken,
    ) -> Result<TrendPrediction, EngineError> {
        ensure_active(cancel)?;
        let recent = self.recent(records, to_chrono(self.config.analysis_window))?;
        let grid = self.grid(recent)?;
        let series = grid.series(recent);

        let fit = Smoothed::fit(&series, self.config.smoothing_factor).ok_or(
            EngineError::InsufficientTrendData {
                needed: self.config.min_data_points,
                have: 0,
            },
        )?;

        let steps = forecast_steps(forecast_window, self.window_size);
        let mut predictions = Vec::with_capacity(steps);
        for h in 1..=steps {
            checkpoint(cancel, h)?;
            let (predicted_count, confidence_interval) = fit.project(h);
            predictions.push(Forecast {
                timestamp: grid.start_after_end(h),
                predicted_count,
                confidence_interval,
            });
        }

        let created_at = Utc::now();
        self.record_use(created_at);
        debug!(
            steps,
            level = fit.level,
            trend = fit.trend,
            residual_std = fit.residual_std,
            "forecast computed"
        );
        Ok(TrendPrediction {
            forecast_window: forecast_window.to_std().unwrap_or_default(),
            predictions,
            confidence: FORECAST_CONFIDENCE,
            method: FORECAST_METHOD.to_string(),
            created_at,
        })
    }

    pub fn info(&self) -> AnalyzerInfo {
        let usage = self.usage.lock();
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "analysis_window".to_string(),
            humantime::format_duration(self.config.analysis_window).to_string().into(),
        );
        parameters.insert(
            "forecast_window".to_string(),
            humantime::format_duration(self.config.forecast_window).to_string().into(),
        );
        parameters.insert("min_data_points".to_string(), self.config.min_data_points.into());
        parameters.insert("smoothing_factor".to_string(), self.config.smoothing_factor.into());
        parameters.insert("window_size_secs".to_string(), self.window_size.num_seconds().into());

        AnalyzerInfo {
            name: ANALYZER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: self.created_at,
            analyses_run: usage.analyses_run,
            parameters,
            last_updated: usage.last_updated,
        }
    }

    /// Records inside `window` ending at the latest one, if there are enough.
    fn recent<'a>(
        &self,
        records: &'a [ParsedRecord],
        window: Duration,
    ) -> Result<&'a [ParsedRecord], EngineError> {
        let needed = self.config.min_data_points;
        let Some(latest) = records.last().map(|r| r.timestamp) else {
            return Err(EngineError::InsufficientTrendData { needed, have: 0 });
        };
        // A window reaching past the representable range covers everything.
        let recent = match latest.checked_sub_signed(window) {
            Some(start) => &records[records.partition_point(|r| r.timestamp < start)..],
            None => records,
        };
        if recent.len() < needed {
            return Err(EngineError::InsufficientTrendData {
                needed,
                have: recent.len(),
            });
        }
        Ok(recent)
    }

    fn grid(&self, recent: &[ParsedRecord]) -> Result<WindowGrid, EngineError> {
        WindowGrid::spanning(recent, self.window_size).ok_or(EngineError::InsufficientTrendData {
            needed: self.config.min_data_points,
            have: recent.len(),
        })
    }

    /// Trend lines for the busiest subjects, busiest first.
    fn subject_trends<'a, F>(
        &self,
        recent: &'a [ParsedRecord],
        grid: &WindowGrid,
        key: F,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, usize, SeriesTrend)>, EngineError>
    where
        F: Fn(&'a ParsedRecord) -> &'a str,
    {
        let mut by_subject: HashMap<&str, Vec<&ParsedRecord>> = HashMap::new();
        for (i, record) in recent.iter().enumerate() {
            checkpoint(cancel, i)?;
            by_subject.entry(key(record)).or_default().push(record);
        }

        let mut ranked: Vec<(&str, Vec<&ParsedRecord>)> = by_subject.into_iter().collect();
        ranked.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(TOP_SUBJECTS);

        let mut trends = Vec::with_capacity(ranked.len());
        for (i, (subject, queries)) in ranked.into_iter().enumerate() {
            checkpoint(cancel, i)?;
            let trend = classify_series_checked(&grid.series(queries.iter().copied()), cancel)?;
            trends.push((subject.to_string(), queries.len(), trend));
        }
        Ok(trends)
    }

    fn record_use(&self, at: DateTime<Utc>) {
        let mut usage = self.usage.lock();
        usage.analyses_run += 1;
        usage.last_updated = Some(at);
    }
}

/// Distinct calendar days per weekday (Monday = 0) among the records.
fn days_covered(records: &[ParsedRecord]) -> [u32; 7] {
    let dates: BTreeSet<_> = records.iter().map(|r| r.timestamp.date_naive()).collect();
    let mut covered = [0; 7];
    for date in dates {
        covered[date.weekday().num_days_from_monday() as usize] += 1;
    }
    covered
}

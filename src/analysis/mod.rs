//! Trend analysis and forecasting over query-count series.
//!
//! # Architecture
//! - `stats.rs`: descriptive statistics, regression and trend consistency
//! - `window.rs`: fixed-size time grid that turns records into count series
//! - `trend.rs`: direction classification and the [`TrendAnalyzer`]
//! - `forecast.rs`: double exponential smoothing with widening intervals
//! - `insights.rs`: human-readable observations from the distributions

pub mod forecast;
pub mod insights;
pub mod stats;
pub mod trend;
pub mod window;

pub use forecast::{ConfidenceInterval, Forecast, TrendPrediction, FORECAST_METHOD};
pub use trend::{
    classify_series, classify_series_checked, AnalyzerInfo, ClientTrend, DomainTrend, SeriesTrend, TimeWindow,
    TrendAnalysis, TrendAnalyzer, TrendDirection,
};

//! Advisory observations derived from an analysis. Never used in scoring.

use super::trend::TrendDirection;

pub const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Share of a window a single domain must exceed to be called dominant.
const DOMINANT_DOMAIN_SHARE: f64 = 0.5;

/// Share of queries between 00:00 and 05:59 reported as notable.
const OVERNIGHT_SHARE: f64 = 0.2;

/// Per-day weekend/weekday ratio outside which the difference is reported.
const WEEKEND_RATIO_BAND: (f64, f64) = (0.8, 1.2);

/// Inputs the insight rules look at.
pub struct InsightInputs<'a> {
    /// Normalized hour-of-day distribution.
    pub hourly: &'a [f64; 24],
    /// Raw per-day-of-week counts (Monday = 0).
    pub daily_counts: &'a [f64; 7],
    /// Days of each weekday covered by the window.
    pub days_covered: &'a [u32; 7],
    pub top_domain: Option<(&'a str, f64)>,
    pub direction: TrendDirection,
    pub change_percent: f64,
}

pub fn generate(inputs: &InsightInputs<'_>) -> Vec<String> {
    let mut insights = Vec::new();

    if let Some((hour, share)) = peak_hour(inputs.hourly) {
        insights.push(format!(
            "Peak activity at {:02}:00 with {:.1}% of queries",
            hour,
            share * 100.0
        ));
    }

    if let Some(line) = weekend_pattern(inputs.daily_counts, inputs.days_covered) {
        insights.push(line);
    }

    if let Some((domain, share)) = inputs.top_domain {
        if share > DOMINANT_DOMAIN_SHARE {
            insights.push(format!(
                "{} dominates traffic with {:.1}% of queries",
                domain,
                share * 100.0
            ));
        } else {
            insights.push(format!(
                "Most queried domain is {} ({:.1}% of queries)",
                domain,
                share * 100.0
            ));
        }
    }

    let overnight: f64 = inputs.hourly[..6].iter().sum();
    if overnight > OVERNIGHT_SHARE {
        insights.push(format!(
            "Significant overnight activity: {:.1}% of queries between 00:00 and 06:00",
            overnight * 100.0
        ));
    }

    insights.push(match inputs.direction {
        TrendDirection::Increasing | TrendDirection::Decreasing => format!(
            "Query volume is {} ({:+.1}% over the window)",
            inputs.direction, inputs.change_percent
        ),
        TrendDirection::Stable => "Query volume is stable".to_string(),
        TrendDirection::Volatile => "Query volume is volatile with no clear direction".to_string(),
    });

    insights
}

fn peak_hour(hourly: &[f64; 24]) -> Option<(usize, f64)> {
    hourly
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, share)| share > 0.0)
        .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
}

/// Compare the average weekend day with the average weekday. Silent unless
/// the window covers at least one day of each.
fn weekend_pattern(daily_counts: &[f64; 7], days_covered: &[u32; 7]) -> Option<String> {
    let average = |range: std::ops::Range<usize>| {
        let days: u32 = days_covered[range.clone()].iter().sum();
        (days > 0).then(|| daily_counts[range].iter().sum::<f64>() / days as f64)
    };
    let weekday = average(0..5)?;
    let weekend = average(5..7)?;
    if weekday <= 0.0 {
        return (weekend > 0.0).then(|| "Activity happens almost entirely on weekends".to_string());
    }

    let ratio = weekend / weekday;
    let (low, high) = WEEKEND_RATIO_BAND;
    Some(if ratio > high {
        format!("Weekend days are {:.0}% busier than weekdays", (ratio - 1.0) * 100.0)
    } else if ratio < low {
        format!("Weekend days are {:.0}% quieter than weekdays", (1.0 - ratio) * 100.0)
    } else {
        "Weekend and weekday activity are similar".to_string()
    })
}

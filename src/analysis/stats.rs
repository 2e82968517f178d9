use std::convert::Infallible;

use serde::{Deserialize, Serialize};

/// Mean and sample standard deviation of a set of observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub std_dev: f64,
    pub sample_count: usize,
}

/// A simple time series for statistical analysis.
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    values: Vec<f64>,
}

/// Ordinary least-squares fit of `value = intercept + slope * index`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    /// Standard deviation of the residuals around the fitted line.
    pub residual_std: f64,
}

impl Regression {
    pub fn fitted(&self, index: usize) -> f64 {
        self.intercept + self.slope * index as f64
    }
}

impl TimeSeries {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.sum() / self.values.len() as f64
    }

    /// Sample variance (n-1 denominator); 0 when there are fewer than two values.
    pub fn variance(&self) -> f64 {
        let n = self.values.len();
        if n <= 1 {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self.values.iter().map(|&x| (x - mean).powi(2)).sum();
        sum_sq_diff / (n - 1) as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn summary(&self) -> Summary {
        Summary {
            mean: self.mean(),
            std_dev: self.std_dev(),
            sample_count: self.values.len(),
        }
    }

    /// Nearest-rank percentile, `p` in [0, 1]. Returns 0 for an empty series.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let len = sorted.len();
        let idx = ((len as f64 * p.clamp(0.0, 1.0)) as usize).min(len - 1);
        sorted[idx]
    }

    /// Least-squares line over (index, value). `None` for fewer than two points.
    pub fn regression(&self) -> Option<Regression> {
        let n = self.values.len();
        if n < 2 {
            return None;
        }

        let nf = n as f64;
        let mean_x = (nf - 1.0) / 2.0;
        let mean_y = self.mean();

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for (i, &y) in self.values.iter().enumerate() {
            let dx = i as f64 - mean_x;
            sxx += dx * dx;
            sxy += dx * (y - mean_y);
        }

        let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
        let intercept = mean_y - slope * mean_x;

        let ss_res: f64 = self
            .values
            .iter()
            .enumerate()
            .map(|(i, &y)| (y - (intercept + slope * i as f64)).powi(2))
            .sum();
        let residual_std = if n > 2 {
            (ss_res / (nf - 2.0)).sqrt()
        } else {
            0.0
        };

        Some(Regression {
            slope,
            intercept,
            residual_std,
        })
    }

    /// Mann-Kendall consistency in [-1, 1]: +1 when every later value exceeds
    /// every earlier one, -1 for the reverse.
    pub fn kendall_tau(&self) -> f64 {
        match self.kendall_tau_checked(|_| Ok::<(), Infallible>(())) {
            Ok(tau) => tau,
            Err(never) => match never {},
        }
    }

    /// [`kendall_tau`](Self::kendall_tau), calling `check` before each row of
    /// the quadratic pair scan and stopping at its first error.
    pub fn kendall_tau_checked<E, F>(&self, mut check: F) -> Result<f64, E>
    where
        F: FnMut(usize) -> Result<(), E>,
    {
        let n = self.values.len();
        if n < 2 {
            return Ok(0.0);
        }
        let mut s: i64 = 0;
        for i in 0..n - 1 {
            check(i)?;
            for j in i + 1..n {
                let diff = self.values[j] - self.values[i];
                if diff > 0.0 {
                    s += 1;
                } else if diff < 0.0 {
                    s -= 1;
                }
            }
        }
        let pairs = (n * (n - 1) / 2) as f64;
        Ok(s as f64 / pairs)
    }
}

/// Z-score of `value` against `mean`/`std_dev`, with the spread floored at
/// `min_std_dev` so near-constant baselines do not yield infinite scores.
pub fn z_score(value: f64, mean: f64, std_dev: f64, min_std_dev: f64) -> f64 {
    let spread = std_dev.max(min_std_dev);
    if spread <= 0.0 {
        return 0.0;
    }
    (value - mean) / spread
}

/// Scale a raw count map into frequencies summing to 1.
pub fn normalize<I>(counts: I) -> Vec<f64>
where
    I: IntoIterator<Item = f64>,
{
    let counts: Vec<f64> = counts.into_iter().collect();
    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return vec![0.0; counts.len()];
    }
    counts.iter().map(|c| c / total).collect()
}

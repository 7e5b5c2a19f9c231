//! FeatureColumn trait and the target-series columns (lag, rolling, momentum).
//!
//! Columns are pure functions of the target series: index `i` only ever reads
//! indices `< i` (plus `i` itself for momentum's numerator). Values are computed
//! directly per index with no running state, so recomputing any suffix yields
//! bit-identical results to a full pass.

use crate::domain::{lag_name, momentum_name, rolling_avg_name, rolling_std_name};

/// A derived column over the target series.
///
/// `series[i]` is `None` for records whose target is unusable (malformed).
///
/// # Look-ahead guard
/// `compute_at(series, i)` must not read `series[j]` for any `j > i`.
/// Every column must pass the truncated-vs-full series test.
pub trait FeatureColumn: Send + Sync {
    /// Canonical name (e.g. "lag_24h", "rolling_std_24h").
    fn name(&self) -> &str;

    /// Number of prior records needed before the column produces a value.
    fn lookback(&self) -> usize;

    /// Value at index `i`, or `None` when history is insufficient or undefined.
    fn compute_at(&self, series: &[Option<f64>], i: usize) -> Option<f64>;

    /// Compute the whole column. Same length as `series`.
    fn compute(&self, series: &[Option<f64>]) -> Vec<Option<f64>> {
        (0..series.len()).map(|i| self.compute_at(series, i)).collect()
    }
}

// ─── Lag ────────────────────────────────────────────────────────────

/// `lag_Nh` at `i` = target at `i - N`.
#[derive(Debug, Clone)]
pub struct Lag {
    hours: usize,
    name: String,
}

impl Lag {
    pub fn new(hours: usize) -> Self {
        Self {
            hours,
            name: lag_name(hours),
        }
    }

    pub fn hours(&self) -> usize {
        self.hours
    }
}

impl FeatureColumn for Lag {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.hours
    }

    fn compute_at(&self, series: &[Option<f64>], i: usize) -> Option<f64> {
        if self.hours == 0 || i < self.hours {
            return None;
        }
        series.get(i - self.hours).copied().flatten()
    }
}

// ─── Rolling window ─────────────────────────────────────────────────

/// The `window` values strictly before `i`, or `None` if any is missing.
fn trailing_window(series: &[Option<f64>], i: usize, window: usize) -> Option<Vec<f64>> {
    if window == 0 || i < window || i > series.len() {
        return None;
    }
    series[i - window..i].iter().copied().collect()
}

/// Arithmetic mean of the trailing window (current record excluded).
#[derive(Debug, Clone)]
pub struct RollingMean {
    window: usize,
    name: String,
}

impl RollingMean {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            name: rolling_avg_name(window),
        }
    }
}

impl FeatureColumn for RollingMean {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.window
    }

    fn compute_at(&self, series: &[Option<f64>], i: usize) -> Option<f64> {
        let values = trailing_window(series, i, self.window)?;
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population standard deviation of the trailing window (two-pass).
#[derive(Debug, Clone)]
pub struct RollingStd {
    window: usize,
    name: String,
}

impl RollingStd {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            name: rolling_std_name(window),
        }
    }
}

impl FeatureColumn for RollingStd {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.window
    }

    fn compute_at(&self, series: &[Option<f64>], i: usize) -> Option<f64> {
        let values = trailing_window(series, i, self.window)?;
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(var.sqrt())
    }
}

// ─── Momentum ───────────────────────────────────────────────────────

/// Percent change of the current target against `lag_Kh`.
///
/// `None` when the lag is missing or zero; never infinite or NaN.
#[derive(Debug, Clone)]
pub struct Momentum {
    lag: Lag,
    name: String,
}

impl Momentum {
    pub fn new(hours: usize) -> Self {
        Self {
            lag: Lag::new(hours),
            name: momentum_name(hours),
        }
    }
}

impl FeatureColumn for Momentum {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.lag.hours()
    }

    fn compute_at(&self, series: &[Option<f64>], i: usize) -> Option<f64> {
        let current = series.get(i).copied().flatten()?;
        let previous = self.lag.compute_at(series, i)?;
        if previous == 0.0 {
            return None;
        }
        let pct = (current - previous) / previous * 100.0;
        pct.is_finite().then_some(pct)
    }
}

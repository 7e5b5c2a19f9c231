//! Forecast error metrics over predicted/actual slices.
//!
//! Every metric is a pure function: slices in, scalar out. Undefined results
//! (empty input, zero denominators) come back as `None` or are skipped rather
//! than producing `NaN` or `Infinity`.

use serde::{Deserialize, Serialize};

/// Held-out performance of a model (or of one constituent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub rmse: f64,
    pub mae: f64,
    /// Mean absolute percent error over non-zero actuals.
    pub mape: Option<f64>,
    /// Symmetric MAPE, defined even when individual actuals are zero.
    pub smape: Option<f64>,
    pub r_squared: Option<f64>,
    pub samples: usize,
}

impl ModelPerformance {
    /// Compute all metrics. Returns `None` for empty or mismatched input.
    pub fn compute(predicted: &[f64], actual: &[f64]) -> Option<Self> {
        if predicted.is_empty() || predicted.len() != actual.len() {
            return None;
        }
        Some(Self {
            rmse: rmse(predicted, actual)?,
            mae: mae(predicted, actual)?,
            mape: mape(predicted, actual),
            smape: smape(predicted, actual),
            r_squared: r_squared(predicted, actual),
            samples: predicted.len(),
        })
    }
}

// ─── Individual metric functions ────────────────────────────────────

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by N).
pub fn population_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

pub fn mae(predicted: &[f64], actual: &[f64]) -> Option<f64> {
    let errors: Vec<f64> = paired(predicted, actual)?
        .map(|(p, a)| (a - p).abs())
        .collect();
    mean(&errors)
}

pub fn rmse(predicted: &[f64], actual: &[f64]) -> Option<f64> {
    let squared: Vec<f64> = paired(predicted, actual)?
        .map(|(p, a)| (a - p).powi(2))
        .collect();
    mean(&squared).map(f64::sqrt)
}

/// MAPE in percent, skipping pairs whose actual is zero.
pub fn mape(predicted: &[f64], actual: &[f64]) -> Option<f64> {
    let pct: Vec<f64> = paired(predicted, actual)?
        .filter(|(_, a)| *a != 0.0)
        .map(|(p, a)| (a - p).abs() / a.abs() * 100.0)
        .collect();
    mean(&pct)
}

/// Symmetric MAPE in percent (0-200), skipping pairs where both values are zero.
pub fn smape(predicted: &[f64], actual: &[f64]) -> Option<f64> {
    let pct: Vec<f64> = paired(predicted, actual)?
        .filter(|(p, a)| p.abs() + a.abs() > 0.0)
        .map(|(p, a)| 200.0 * (a - p).abs() / (a.abs() + p.abs()))
        .collect();
    mean(&pct)
}

/// Coefficient of determination. `None` when the actuals have zero variance.
pub fn r_squared(predicted: &[f64], actual: &[f64]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = paired(predicted, actual)?.collect();
    let m = mean(actual)?;
    let ss_tot: f64 = actual.iter().map(|a| (a - m).powi(2)).sum();
    if ss_tot < 1e-12 {
        return None;
    }
    let ss_res: f64 = pairs.iter().map(|(p, a)| (a - p).powi(2)).sum();
    Some(1.0 - ss_res / ss_tot)
}

/// Weighted mean and weighted population dispersion of `values`.
///
/// Weights are assumed normalised (sum to 1).
pub fn weighted_mean_std(values: &[f64], weights: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() || values.len() != weights.len() {
        return None;
    }
    let m: f64 = values.iter().zip(weights).map(|(v, w)| v * w).sum();
    let var: f64 = values
        .iter()
        .zip(weights)
        .map(|(v, w)| w * (v - m).powi(2))
        .sum();
    Some((m, var.max(0.0).sqrt()))
}

fn paired<'a>(
    predicted: &'a [f64],
    actual: &'a [f64],
) -> Option<impl Iterator<Item = (f64, f64)> + 'a> {
    if predicted.is_empty() || predicted.len() != actual.len() {
        return None;
    }
    Some(predicted.iter().copied().zip(actual.iter().copied()))
}

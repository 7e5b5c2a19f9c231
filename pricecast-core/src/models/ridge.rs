//! Standardised ridge regression.
//!
//! Inputs are the required features, every interaction term that is non-null
//! in all training rows, and the target hour encoded as sin/cos. Inputs with
//! zero variance are dropped. The system `(ZᵀZ + λ·n·I) β = Zᵀ(y − ȳ)` is
//! solved on standardised inputs `Z`.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use super::linalg::solve;
use super::{target_hour, ConstituentModel, FittedModel, HorizonDataset, ModelError};
use crate::domain::FeatureVector;

pub const NAME: &str = "ridge";

const HOUR_SIN: &str = "target_hour_sin";
const HOUR_COS: &str = "target_hour_cos";

#[derive(Debug, Clone, Copy)]
pub struct RidgeRegression {
    lambda: f64,
}

impl RidgeRegression {
    pub fn new(lambda: f64) -> Self {
        Self {
            lambda: lambda.max(0.0),
        }
    }
}

/// One standardised input column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeInput {
    pub name: String,
    pub mean: f64,
    pub scale: f64,
    pub coefficient: f64,
    /// Optional inputs fall back to their training mean when null.
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeFit {
    pub horizon: usize,
    pub intercept: f64,
    pub inputs: Vec<RidgeInput>,
}

fn input_value(fv: &FeatureVector, name: &str, horizon: usize) -> Option<f64> {
    let angle = || TAU * target_hour(fv.timestamp, horizon) as f64 / 24.0;
    match name {
        HOUR_SIN => Some(angle().sin()),
        HOUR_COS => Some(angle().cos()),
        _ => fv.get(name),
    }
}

impl RidgeFit {
    pub fn predict(&self, fv: &FeatureVector) -> Result<f64, ModelError> {
        let mut out = self.intercept;
        for input in &self.inputs {
            let x = match input_value(fv, &input.name, self.horizon) {
                Some(x) => x,
                None if input.optional => input.mean,
                None => {
                    return Err(ModelError::MissingInput {
                        name: input.name.clone(),
                    })
                }
            };
            out += input.coefficient * (x - input.mean) / input.scale;
        }
        Ok(out)
    }
}

impl ConstituentModel for RidgeRegression {
    fn name(&self) -> &'static str {
        NAME
    }

    fn fit(&self, data: &HorizonDataset<'_>) -> Result<FittedModel, ModelError> {
        data.ensure_rows()?;
        let n = data.len();

        // Candidate columns: required features, complete interactions, calendar.
        let mut candidates: Vec<(String, bool)> = data
            .required
            .iter()
            .map(|name| (name.clone(), false))
            .collect();
        if let Some(first) = data.inputs.first() {
            for name in first.interactions.keys() {
                if data.inputs.iter().all(|fv| fv.interaction(name).is_some()) {
                    candidates.push((name.clone(), true));
                }
            }
        }
        candidates.push((HOUR_SIN.to_string(), false));
        candidates.push((HOUR_COS.to_string(), false));

        let mut columns: Vec<(String, bool, Vec<f64>, f64, f64)> = Vec::new();
        for (name, optional) in candidates {
            let values: Option<Vec<f64>> = data
                .inputs
                .iter()
                .map(|fv| input_value(fv, &name, data.horizon))
                .collect();
            let Some(values) = values else {
                return Err(ModelError::MissingInput { name });
            };
            let mean = values.iter().sum::<f64>() / n as f64;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
            let scale = var.sqrt();
            if scale < 1e-12 {
                continue;
            }
            columns.push((name, optional, values, mean, scale));
        }

        let y_mean = data.targets.iter().sum::<f64>() / n as f64;
        let k = columns.len();
        let z: Vec<Vec<f64>> = columns
            .iter()
            .map(|(_, _, values, mean, scale)| values.iter().map(|v| (v - mean) / scale).collect())
            .collect();

        let mut gram = vec![vec![0.0; k]; k];
        let mut rhs = vec![0.0; k];
        for a in 0..k {
            for b in a..k {
                let dot: f64 = z[a].iter().zip(&z[b]).map(|(p, q)| p * q).sum();
                gram[a][b] = dot;
                gram[b][a] = dot;
            }
            gram[a][a] += self.lambda * n as f64;
            rhs[a] = z[a]
                .iter()
                .zip(&data.targets)
                .map(|(p, y)| p * (y - y_mean))
                .sum();
        }

        let beta = solve(gram, rhs).ok_or(ModelError::Singular {
            horizon: data.horizon,
        })?;

        Ok(FittedModel::Ridge(RidgeFit {
            horizon: data.horizon,
            intercept: y_mean,
            inputs: columns
                .into_iter()
                .zip(beta)
                .map(|((name, optional, _, mean, scale), coefficient)| RidgeInput {
                    name,
                    mean,
                    scale,
                    coefficient,
                    optional,
                })
                .collect(),
        }))
    }
}

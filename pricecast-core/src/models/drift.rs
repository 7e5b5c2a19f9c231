//! Drift: persistence plus the average change over the horizon.

use serde::{Deserialize, Serialize};

use super::{ConstituentModel, FittedModel, HorizonDataset, ModelError};
use crate::domain::FeatureVector;

pub const NAME: &str = "drift";

#[derive(Debug, Clone, Copy, Default)]
pub struct Drift;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftFit {
    pub horizon: usize,
    pub mean_change: f64,
}

impl DriftFit {
    pub fn predict(&self, fv: &FeatureVector) -> f64 {
        fv.current + self.mean_change
    }
}

impl ConstituentModel for Drift {
    fn name(&self) -> &'static str {
        NAME
    }

    fn fit(&self, data: &HorizonDataset<'_>) -> Result<FittedModel, ModelError> {
        data.ensure_rows()?;
        let total: f64 = data
            .inputs
            .iter()
            .zip(&data.targets)
            .map(|(fv, y)| y - fv.current)
            .sum();
        Ok(FittedModel::Drift(DriftFit {
            horizon: data.horizon,
            mean_change: total / data.len() as f64,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testutil::fv;

    #[test]
    fn learns_average_change() {
        let rows = [fv(0, 10.0), fv(1, 20.0)];
        let data = HorizonDataset {
            horizon: 1,
            required: &[],
            inputs: rows.iter().collect(),
            targets: vec![12.0, 24.0],
        };
        let fit = Drift.fit(&data).unwrap();
        assert_eq!(fit.horizon(), 1);
        assert_eq!(fit.predict(&fv(5, 100.0)).unwrap(), 103.0);
    }

    #[test]
    fn empty_dataset_fails() {
        let data = HorizonDataset {
            horizon: 4,
            required: &[],
            inputs: vec![],
            targets: vec![],
        };
        assert_eq!(
            Drift.fit(&data).unwrap_err(),
            ModelError::EmptyDataset { horizon: 4 }
        );
    }
}

//! Constituent forecasting models.
//!
//! Every constituent is fitted once per horizon using the direct formulation:
//! the input is the FeatureVector of record `i`, the target is the value of
//! record `i + h`. A fitted constituent is plain serialisable data
//! ([`FittedModel`]) so trained models can be stored and reloaded.

pub mod drift;
pub mod linalg;
pub mod profile;
pub mod ridge;

pub use drift::{Drift, DriftFit};
pub use profile::{HourlyProfile, ProfileFit};
pub use ridge::{RidgeFit, RidgeRegression};

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::FeatureVector;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("no training rows for horizon {horizon}h")]
    EmptyDataset { horizon: usize },

    #[error("normal equations are singular for horizon {horizon}h")]
    Singular { horizon: usize },

    #[error("input {name} is null")]
    MissingInput { name: String },

    #[error("model for horizon {fitted}h cannot forecast horizon {requested}h")]
    HorizonMismatch { fitted: usize, requested: usize },
}

/// Training rows for one horizon.
#[derive(Debug, Clone)]
pub struct HorizonDataset<'a> {
    pub horizon: usize,
    /// Inputs required to be non-null in every row.
    pub required: &'a [String],
    pub inputs: Vec<&'a FeatureVector>,
    pub targets: Vec<f64>,
}

impl HorizonDataset<'_> {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn ensure_rows(&self) -> Result<(), ModelError> {
        if self.is_empty() || self.inputs.len() != self.targets.len() {
            return Err(ModelError::EmptyDataset {
                horizon: self.horizon,
            });
        }
        Ok(())
    }
}

/// Hour of day (0-23) of the timestamp `horizon` hours after `base`.
pub fn target_hour(base: DateTime<Utc>, horizon: usize) -> usize {
    (base + Duration::hours(horizon as i64)).hour() as usize
}

/// A forecasting method that can be fitted on one horizon's rows.
pub trait ConstituentModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn fit(&self, data: &HorizonDataset<'_>) -> Result<FittedModel, ModelError>;
}

/// Which constituents an ensemble is built from (`[training] constituents`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstituentKind {
    Ridge,
    Drift,
    HourlyProfile,
}

impl ConstituentKind {
    pub const ALL: [ConstituentKind; 3] = [Self::Ridge, Self::Drift, Self::HourlyProfile];

    pub fn name(self) -> &'static str {
        match self {
            Self::Ridge => ridge::NAME,
            Self::Drift => drift::NAME,
            Self::HourlyProfile => profile::NAME,
        }
    }

    pub fn build(self, ridge_lambda: f64) -> Box<dyn ConstituentModel> {
        match self {
            Self::Ridge => Box::new(RidgeRegression::new(ridge_lambda)),
            Self::Drift => Box::new(Drift),
            Self::HourlyProfile => Box::new(HourlyProfile),
        }
    }
}

impl fmt::Display for ConstituentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fitted constituent for a single horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittedModel {
    Ridge(RidgeFit),
    Drift(DriftFit),
    HourlyProfile(ProfileFit),
}

impl FittedModel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ridge(_) => ridge::NAME,
            Self::Drift(_) => drift::NAME,
            Self::HourlyProfile(_) => profile::NAME,
        }
    }

    pub fn horizon(&self) -> usize {
        match self {
            Self::Ridge(m) => m.horizon,
            Self::Drift(m) => m.horizon,
            Self::HourlyProfile(m) => m.horizon,
        }
    }

    /// Forecast the target `horizon()` hours after `fv.timestamp`.
    pub fn predict(&self, fv: &FeatureVector) -> Result<f64, ModelError> {
        match self {
            Self::Ridge(m) => m.predict(fv),
            Self::Drift(m) => Ok(m.predict(fv)),
            Self::HourlyProfile(m) => Ok(m.predict(fv)),
        }
    }
}

/// All fitted constituents for one horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonModels {
    pub horizon: usize,
    pub constituents: Vec<FittedModel>,
}

impl HorizonModels {
    /// Each constituent's output, in constituent order.
    pub fn predict_each(&self, fv: &FeatureVector) -> Result<Vec<(&'static str, f64)>, ModelError> {
        self.constituents
            .iter()
            .map(|m| {
                if m.horizon() != self.horizon {
                    return Err(ModelError::HorizonMismatch {
                        fitted: m.horizon(),
                        requested: self.horizon,
                    });
                }
                m.predict(fv).map(|v| (m.name(), v))
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::domain::RecordId;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    /// A vector at hour `h` after 2024-01-01 with `current` and a lag_1h.
    pub fn fv(h: i64, current: f64) -> FeatureVector {
        FeatureVector {
            record_id: RecordId(h as u64),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h),
            record_revision: 0,
            lineage: 0,
            current,
            lags: BTreeMap::from([(1, Some(current - 1.0))]),
            rolling_window: 24,
            rolling_avg: Some(current),
            rolling_std: Some(1.0),
            momentum: BTreeMap::new(),
            interactions: BTreeMap::new(),
        }
    }
}

//! Model registry — immutable trained models, looked up by version.
//!
//! The latest version is resolved on every call rather than cached, so a
//! predictor never holds on to a model that a concurrent training run has
//! already superseded.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::ModelVersion;
use crate::metrics::ModelPerformance;
use crate::models::HorizonModels;

/// One trained ensemble. Never mutated after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub version: ModelVersion,
    pub trained_at: DateTime<Utc>,
    /// Uniform-ensemble performance on the held-out tail, pooled over horizons.
    pub performance: ModelPerformance,
    pub constituent_performance: BTreeMap<String, ModelPerformance>,
    /// Index `h - 1` holds the models for horizon `h`.
    pub horizons: Vec<HorizonModels>,
    pub rows_used: usize,
    pub holdout_rows: usize,
    pub dataset_hash: String,
    pub config_fingerprint: String,
    /// Timestamp of the last record in the training snapshot.
    pub data_end: DateTime<Utc>,
}

impl TrainedModel {
    pub fn max_horizon(&self) -> usize {
        self.horizons.len()
    }

    pub fn horizon(&self, hours: usize) -> Option<&HorizonModels> {
        hours.checked_sub(1).and_then(|i| self.horizons.get(i))
    }

    /// Constituent names in the order they were fitted.
    pub fn constituent_names(&self) -> Vec<&'static str> {
        self.horizons
            .first()
            .map(|h| h.constituents.iter().map(|m| m.name()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: RwLock<BTreeMap<ModelVersion, Arc<TrainedModel>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted models, keeping their versions.
    pub fn restore(models: impl IntoIterator<Item = TrainedModel>) -> Self {
        let registry = Self::new();
        {
            let mut map = registry.models.write();
            for m in models {
                map.insert(m.version, Arc::new(m));
            }
        }
        registry
    }

    /// Register a model built for the next version.
    ///
    /// The version is assigned under the write lock, so concurrent training
    /// runs always receive distinct, increasing versions.
    pub fn register_with<F>(&self, build: F) -> Arc<TrainedModel>
    where
        F: FnOnce(ModelVersion) -> TrainedModel,
    {
        let mut map = self.models.write();
        let version = map
            .keys()
            .next_back()
            .map(|v| v.next())
            .unwrap_or(ModelVersion(1));
        let mut model = build(version);
        model.version = version;
        let model = Arc::new(model);
        map.insert(version, Arc::clone(&model));
        model
    }

    pub fn latest(&self) -> Option<Arc<TrainedModel>> {
        self.models.read().values().next_back().cloned()
    }

    pub fn get(&self, version: ModelVersion) -> Option<Arc<TrainedModel>> {
        self.models.read().get(&version).cloned()
    }

    pub fn versions(&self) -> Vec<ModelVersion> {
        self.models.read().keys().copied().collect()
    }

    /// All models, oldest first.
    pub fn all(&self) -> Vec<Arc<TrainedModel>> {
        self.models.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}

#[cfg(test)]
pub(crate) fn stub_model(version: u32) -> TrainedModel {
    use crate::models::{DriftFit, FittedModel};

    TrainedModel {
        version: ModelVersion(version),
        trained_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        performance: ModelPerformance {
            rmse: 1.0,
            mae: 1.0,
            mape: None,
            smape: None,
            r_squared: None,
            samples: 1,
        },
        constituent_performance: BTreeMap::new(),
        horizons: vec![HorizonModels {
            horizon: 1,
            constituents: vec![FittedModel::Drift(DriftFit {
                horizon: 1,
                mean_change: 0.0,
            })],
        }],
        rows_used: 1,
        holdout_rows: 1,
        dataset_hash: String::new(),
        config_fingerprint: String::new(),
        data_end: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_increase_monotonically() {
        let registry = ModelRegistry::new();
        let a = registry.register_with(|_| stub_model(0));
        let b = registry.register_with(|_| stub_model(0));
        assert_eq!(a.version, ModelVersion(1));
        assert_eq!(b.version, ModelVersion(2));
        assert_eq!(registry.latest().unwrap().version, ModelVersion(2));
        assert_eq!(registry.versions(), vec![ModelVersion(1), ModelVersion(2)]);
    }

    #[test]
    fn older_versions_stay_resolvable() {
        let registry = ModelRegistry::restore([stub_model(4)]);
        registry.register_with(|v| stub_model(v.0));
        assert!(registry.get(ModelVersion(4)).is_some());
        assert_eq!(registry.latest().unwrap().version, ModelVersion(5));
    }

    #[test]
    fn horizon_lookup_is_one_based() {
        let model = stub_model(1);
        assert!(model.horizon(0).is_none());
        assert_eq!(model.horizon(1).unwrap().horizon, 1);
        assert!(model.horizon(2).is_none());
        assert_eq!(model.constituent_names(), vec!["drift"]);
    }
}

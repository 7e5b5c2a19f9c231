//! Ensemble Predictor — weighted combination of constituent forecasts.
//!
//! point  = Σ wᵢ·xᵢ
//! std    = sqrt(Σ wᵢ·(xᵢ − point)²)      (ensemble disagreement)
//! bounds = point ± z·std
//!
//! Weights come from the performance ledger at call time, so they adapt as
//! validations accumulate without retraining.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{ConfidenceLevel, FeatureVector, ModelVersion, Prediction, PredictionId};
use crate::ledger::PerformanceLedger;
use crate::metrics::{weighted_mean_std, ModelPerformance};
use crate::models::ModelError;
use crate::registry::{ModelRegistry, TrainedModel};
use crate::store::{FeatureStore, TimeSeriesStore};

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("no trained model available")]
    NoModel,

    #[error("time series is empty")]
    NoData,

    #[error("features unavailable at {timestamp}: missing {missing:?}")]
    FeatureUnavailable {
        timestamp: DateTime<Utc>,
        missing: Vec<String>,
    },

    #[error("horizon {requested}h out of range (model covers 1..={max}h)")]
    HorizonOutOfRange { requested: usize, max: usize },

    #[error("model has no constituent outputs for horizon {0}h")]
    NoConstituents(usize),

    #[error("invalid ensemble config: {0}")]
    InvalidConfig(String),

    #[error("constituent failed: {0}")]
    Model(#[from] ModelError),
}

/// Predictor tunables (`[ensemble]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Interval half-width in standard deviations (1.96 ≈ 95%).
    pub z_multiplier: f64,
    /// `prediction_std` at or below this is high confidence.
    pub high_confidence_max_std: f64,
    /// `prediction_std` at or below this (and above high) is medium confidence.
    pub medium_confidence_max_std: f64,
    /// Floor applied to `prediction_std` when constituents agree exactly.
    pub min_std: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            z_multiplier: 1.96,
            high_confidence_max_std: 5.0,
            medium_confidence_max_std: 15.0,
            min_std: 0.0,
        }
    }
}

impl EnsembleConfig {
    pub fn validate(&self) -> Result<(), PredictError> {
        if !(self.z_multiplier > 0.0 && self.z_multiplier.is_finite()) {
            return Err(PredictError::InvalidConfig(format!(
                "z_multiplier must be positive, got {}",
                self.z_multiplier
            )));
        }
        if self.high_confidence_max_std > self.medium_confidence_max_std {
            return Err(PredictError::InvalidConfig(
                "high_confidence_max_std exceeds medium_confidence_max_std".into(),
            ));
        }
        if self.min_std < 0.0 {
            return Err(PredictError::InvalidConfig("min_std must not be negative".into()));
        }
        Ok(())
    }

    pub fn classify(&self, std: f64) -> ConfidenceLevel {
        if std <= self.high_confidence_max_std {
            ConfidenceLevel::High
        } else if std <= self.medium_confidence_max_std {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn interval(&self, point: f64, std: f64) -> (f64, f64) {
        let half = self.z_multiplier * std;
        (point - half, point + half)
    }
}

/// Model identification returned with every prediction batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub version: ModelVersion,
    pub trained_at: DateTime<Utc>,
    pub performance: ModelPerformance,
}

impl From<&TrainedModel> for ModelInfo {
    fn from(model: &TrainedModel) -> Self {
        Self {
            version: model.version,
            trained_at: model.trained_at,
            performance: model.performance.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionBatch {
    pub predictions: Vec<Prediction>,
    pub model_info: ModelInfo,
    pub weights_used: BTreeMap<String, f64>,
}

pub struct EnsemblePredictor {
    config: EnsembleConfig,
    required: Vec<String>,
}

impl EnsemblePredictor {
    pub fn new(config: EnsembleConfig, required: Vec<String>) -> Result<Self, PredictError> {
        config.validate()?;
        Ok(Self { config, required })
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Forecast horizons `1..=hours_ahead` from the latest record.
    ///
    /// The latest model is resolved from the registry on every call.
    pub fn predict(
        &self,
        hours_ahead: usize,
        series: &TimeSeriesStore,
        features: &FeatureStore,
        registry: &ModelRegistry,
        ledger: &PerformanceLedger,
        issued_at: DateTime<Utc>,
    ) -> Result<PredictionBatch, PredictError> {
        let model = registry.latest().ok_or(PredictError::NoModel)?;
        let latest = series.latest().ok_or(PredictError::NoData)?;

        let fv = features
            .get(latest.id)
            .filter(|fv| fv.record_revision == latest.revision && !latest.is_malformed())
            .ok_or_else(|| PredictError::FeatureUnavailable {
                timestamp: latest.timestamp,
                missing: self.required.clone(),
            })?;

        let names = model.constituent_names();
        let weights = ledger.weights(&names);
        debug!(version = %model.version, ?weights, "ensemble weights");

        let predictions = self.forecast(&model, &fv, hours_ahead, &weights, issued_at)?;
        info!(
            version = %model.version,
            base = %fv.timestamp,
            horizons = predictions.len(),
            "predictions generated"
        );

        Ok(PredictionBatch {
            predictions,
            model_info: ModelInfo::from(model.as_ref()),
            weights_used: weights,
        })
    }

    /// Pure forecast from one feature vector with explicit weights.
    pub fn forecast(
        &self,
        model: &TrainedModel,
        fv: &FeatureVector,
        hours_ahead: usize,
        weights: &BTreeMap<String, f64>,
        issued_at: DateTime<Utc>,
    ) -> Result<Vec<Prediction>, PredictError> {
        let max = model.max_horizon();
        if hours_ahead == 0 || hours_ahead > max {
            return Err(PredictError::HorizonOutOfRange {
                requested: hours_ahead,
                max,
            });
        }
        let missing = fv.missing(&self.required);
        if !missing.is_empty() {
            return Err(PredictError::FeatureUnavailable {
                timestamp: fv.timestamp,
                missing,
            });
        }

        (1..=hours_ahead)
            .map(|h| {
                let models = model
                    .horizon(h)
                    .ok_or(PredictError::HorizonOutOfRange { requested: h, max })?;
                let outputs = models.predict_each(fv)?;
                self.combine(model.version, fv.timestamp, h, &outputs, weights, issued_at)
            })
            .collect()
    }

    fn combine(
        &self,
        version: ModelVersion,
        base: DateTime<Utc>,
        horizon: usize,
        outputs: &[(&'static str, f64)],
        weights: &BTreeMap<String, f64>,
        issued_at: DateTime<Utc>,
    ) -> Result<Prediction, PredictError> {
        let values: Vec<f64> = outputs.iter().map(|(_, v)| *v).collect();
        let w = normalised_weights(outputs, weights);
        let (point, spread) =
            weighted_mean_std(&values, &w).ok_or(PredictError::NoConstituents(horizon))?;
        let std = spread.max(self.config.min_std);
        let (lower, upper) = self.config.interval(point, std);

        Ok(Prediction {
            id: PredictionId::derive(version, base, horizon, issued_at),
            issued_at,
            base_timestamp: base,
            target_timestamp: base + Duration::hours(horizon as i64),
            horizon_hours: horizon,
            predicted_value: point,
            confidence_lower: lower,
            confidence_upper: upper,
            prediction_std: std,
            confidence: self.config.classify(std),
            model_version: version,
            constituents: outputs
                .iter()
                .map(|(name, v)| (name.to_string(), *v))
                .collect(),
        })
    }
}

/// Weights aligned with `outputs`, renormalised to sum to 1.
fn normalised_weights(outputs: &[(&'static str, f64)], weights: &BTreeMap<String, f64>) -> Vec<f64> {
    let raw: Vec<f64> = outputs
        .iter()
        .map(|(name, _)| weights.get(*name).copied().unwrap_or(0.0).max(0.0))
        .collect();
    let total: f64 = raw.iter().sum();
    if total > 0.0 && total.is_finite() {
        raw.iter().map(|w| w / total).collect()
    } else {
        vec![1.0 / outputs.len().max(1) as f64; outputs.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DriftFit, FittedModel, HorizonModels};
    use crate::registry::stub_model;
    use chrono::TimeZone;

    fn two_drifts(changes: [f64; 2]) -> TrainedModel {
        let mut model = stub_model(1);
        model.horizons = (1..=3)
            .map(|h| HorizonModels {
                horizon: h,
                constituents: vec![
                    FittedModel::Drift(DriftFit {
                        horizon: h,
                        mean_change: changes[0],
                    }),
                    FittedModel::Drift(DriftFit {
                        horizon: h,
                        mean_change: changes[1],
                    }),
                ],
            })
            .collect();
        model
    }

    fn vector(current: f64) -> FeatureVector {
        crate::models::testutil::fv(10, current)
    }

    fn predictor() -> EnsemblePredictor {
        EnsemblePredictor::new(EnsembleConfig::default(), vec!["lag_1h".into()]).unwrap()
    }

    fn issued() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn classify_thresholds() {
        let cfg = EnsembleConfig::default();
        assert_eq!(cfg.classify(5.0), ConfidenceLevel::High);
        assert_eq!(cfg.classify(5.1), ConfidenceLevel::Medium);
        assert_eq!(cfg.classify(15.1), ConfidenceLevel::Low);
    }

    #[test]
    fn horizon_without_constituents_is_an_error() {
        // GIVEN a loaded model whose second horizon lost its constituents
        let mut model = two_drifts([1.0, 2.0]);
        model.horizons[1].constituents.clear();
        let weights = BTreeMap::from([("drift".to_string(), 1.0)]);

        // WHEN forecasting across it
        let result = predictor().forecast(&model, &vector(50.0), 3, &weights, issued());

        // THEN the forecast fails instead of emitting a NaN point
        assert!(matches!(result, Err(PredictError::NoConstituents(2))));
    }

    #[test]
    fn uniform_combination_of_disagreeing_constituents() {
        let model = two_drifts([-10.0, 10.0]);
        let weights = BTreeMap::from([("drift".to_string(), 1.0)]);
        let preds = predictor()
            .forecast(&model, &vector(50.0), 2, &weights, issued())
            .unwrap();

        assert_eq!(preds.len(), 2);
        let p = &preds[1];
        assert_eq!(p.horizon_hours, 2);
        assert_eq!(p.target_timestamp, p.base_timestamp + Duration::hours(2));
        assert!((p.predicted_value - 50.0).abs() < 1e-12);
        assert!((p.prediction_std - 10.0).abs() < 1e-12);
        assert!((p.confidence_lower - (50.0 - 19.6)).abs() < 1e-9);
        assert!((p.confidence_upper - (50.0 + 19.6)).abs() < 1e-9);
        assert_eq!(p.confidence, ConfidenceLevel::Medium);
    }

    #[test]
    fn agreeing_constituents_use_min_std() {
        let model = two_drifts([1.0, 1.0]);
        let predictor = EnsemblePredictor::new(
            EnsembleConfig {
                min_std: 0.5,
                ..EnsembleConfig::default()
            },
            vec![],
        )
        .unwrap();
        let preds = predictor
            .forecast(&model, &vector(20.0), 1, &BTreeMap::new(), issued())
            .unwrap();
        assert_eq!(preds[0].predicted_value, 21.0);
        assert_eq!(preds[0].prediction_std, 0.5);
        assert_eq!(preds[0].confidence, ConfidenceLevel::High);
    }

    #[test]
    fn refuses_null_required_inputs() {
        let model = two_drifts([0.0, 0.0]);
        let predictor =
            EnsemblePredictor::new(EnsembleConfig::default(), vec!["lag_24h".into()]).unwrap();
        let err = predictor
            .forecast(&model, &vector(20.0), 1, &BTreeMap::new(), issued())
            .unwrap_err();
        match err {
            PredictError::FeatureUnavailable { missing, .. } => {
                assert_eq!(missing, vec!["lag_24h".to_string()])
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn horizon_bounds_checked() {
        let model = two_drifts([0.0, 0.0]);
        let w = BTreeMap::new();
        assert!(matches!(
            predictor().forecast(&model, &vector(1.0), 0, &w, issued()),
            Err(PredictError::HorizonOutOfRange { requested: 0, max: 3 })
        ));
        assert!(matches!(
            predictor().forecast(&model, &vector(1.0), 4, &w, issued()),
            Err(PredictError::HorizonOutOfRange { requested: 4, max: 3 })
        ));
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let cfg = EnsembleConfig {
            high_confidence_max_std: 20.0,
            ..EnsembleConfig::default()
        };
        assert!(matches!(
            EnsemblePredictor::new(cfg, vec![]),
            Err(PredictError::InvalidConfig(_))
        ));
    }

    #[test]
    fn predict_without_model_or_data() {
        let series = TimeSeriesStore::new();
        let features = FeatureStore::new();
        let registry = ModelRegistry::new();
        let ledger = PerformanceLedger::default();
        assert!(matches!(
            predictor().predict(1, &series, &features, &registry, &ledger, issued()),
            Err(PredictError::NoModel)
        ));
        registry.register_with(|_| two_drifts([0.0, 0.0]));
        assert!(matches!(
            predictor().predict(1, &series, &features, &registry, &ledger, issued()),
            Err(PredictError::NoData)
        ));
    }

    #[test]
    fn ids_are_stable_for_same_issue_time() {
        let model = two_drifts([0.0, 1.0]);
        let w = BTreeMap::new();
        let a = predictor().forecast(&model, &vector(5.0), 3, &w, issued()).unwrap();
        let b = predictor().forecast(&model, &vector(5.0), 3, &w, issued()).unwrap();
        assert_eq!(a, b);
    }
}

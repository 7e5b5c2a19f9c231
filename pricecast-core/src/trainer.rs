//! Model Trainer — fits the constituent ensemble on a consistent snapshot.
//!
//! Rows are FeatureVectors joined to their record (same id, revision and
//! lookback lineage) whose required inputs are all non-null. The chronological tail of those rows is
//! held out for evaluation; training pairs are purged so that no training
//! target falls inside the held-out tail.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{FeatureVector, RecordId, TimeSeriesRecord};
use crate::features::{lineage, FeatureEngine};
use crate::metrics::ModelPerformance;
use crate::models::{ConstituentKind, HorizonDataset, HorizonModels, ModelError};
use crate::registry::{ModelRegistry, TrainedModel};
use crate::store::{dataset_hash, FeatureStore, TimeSeriesStore};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("insufficient data: {available} complete feature rows, need {required}")]
    InsufficientData { available: usize, required: usize },

    #[error("held-out tail has no evaluable rows")]
    EmptyHoldout,

    #[error("invalid training config: {0}")]
    InvalidConfig(String),

    #[error("model fit failed: {0}")]
    Model(#[from] ModelError),
}

/// Trainer tunables (`[training]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Forecast horizons 1..=horizons are fitted.
    pub horizons: usize,
    pub min_training_rows: usize,
    pub holdout_fraction: f64,
    pub ridge_lambda: f64,
    pub refit_on_full: bool,
    pub constituents: Vec<ConstituentKind>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            horizons: 24,
            min_training_rows: 200,
            holdout_fraction: 0.2,
            ridge_lambda: 1.0,
            refit_on_full: true,
            constituents: ConstituentKind::ALL.to_vec(),
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<(), TrainingError> {
        if self.horizons == 0 {
            return Err(TrainingError::InvalidConfig("horizons must be at least 1".into()));
        }
        if self.min_training_rows == 0 {
            return Err(TrainingError::InvalidConfig(
                "min_training_rows must be at least 1".into(),
            ));
        }
        if !(self.holdout_fraction > 0.0 && self.holdout_fraction < 1.0) {
            return Err(TrainingError::InvalidConfig(format!(
                "holdout_fraction must be in (0, 1), got {}",
                self.holdout_fraction
            )));
        }
        if !(self.ridge_lambda >= 0.0 && self.ridge_lambda.is_finite()) {
            return Err(TrainingError::InvalidConfig(
                "ridge_lambda must be a non-negative number".into(),
            ));
        }
        if self.constituents.is_empty() {
            return Err(TrainingError::InvalidConfig(
                "at least one constituent is required".into(),
            ));
        }
        let mut seen = self.constituents.clone();
        seen.sort_by_key(|k| k.name());
        seen.dedup();
        if seen.len() != self.constituents.len() {
            return Err(TrainingError::InvalidConfig(
                "constituents must not repeat".into(),
            ));
        }
        Ok(())
    }
}

/// Everything a fit produces, before a version is assigned.
#[derive(Debug, Clone)]
pub struct TrainingRun {
    pub horizons: Vec<HorizonModels>,
    pub performance: ModelPerformance,
    pub constituent_performance: BTreeMap<String, ModelPerformance>,
    pub rows_used: usize,
    pub holdout_rows: usize,
    pub dataset_hash: String,
    pub data_end: DateTime<Utc>,
}

pub struct Trainer {
    config: TrainerConfig,
    /// Inputs that must be non-null in every training row.
    required: Vec<String>,
    /// History each vector reads, as computed by the feature engine.
    lookback: usize,
}

impl Trainer {
    /// Trainer for vectors produced by `engine`.
    pub fn new(config: TrainerConfig, engine: &FeatureEngine) -> Result<Self, TrainingError> {
        config.validate()?;
        Ok(Self {
            config,
            required: engine.required_inputs(),
            lookback: engine.max_lookback(),
        })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Snapshot both stores, fit, and register a new model version.
    pub fn train(
        &self,
        series: &TimeSeriesStore,
        features: &FeatureStore,
        registry: &ModelRegistry,
        config_fingerprint: &str,
    ) -> Result<Arc<TrainedModel>, TrainingError> {
        let records = series.snapshot();
        let vectors = features.snapshot();
        let run = self.fit(&records, &vectors)?;
        let trained_at = Utc::now();

        let model = registry.register_with(|version| TrainedModel {
            version,
            trained_at,
            performance: run.performance,
            constituent_performance: run.constituent_performance,
            horizons: run.horizons,
            rows_used: run.rows_used,
            holdout_rows: run.holdout_rows,
            dataset_hash: run.dataset_hash,
            config_fingerprint: config_fingerprint.to_string(),
            data_end: run.data_end,
        });

        info!(
            version = %model.version,
            rows = model.rows_used,
            holdout = model.holdout_rows,
            rmse = model.performance.rmse,
            mae = model.performance.mae,
            "model trained"
        );
        Ok(model)
    }

    /// Fit and evaluate on a snapshot. Pure: no store is touched.
    pub fn fit(
        &self,
        records: &[TimeSeriesRecord],
        vectors: &HashMap<RecordId, FeatureVector>,
    ) -> Result<TrainingRun, TrainingError> {
        let rows = self.complete_rows(records, vectors);
        let holdout_rows =
            ((rows.len() as f64 * self.config.holdout_fraction).ceil() as usize).max(1);
        // at least one row must remain on each side of the split
        if rows.len() < self.config.min_training_rows || rows.len() <= holdout_rows {
            return Err(TrainingError::InsufficientData {
                available: rows.len(),
                required: self.config.min_training_rows.max(holdout_rows + 1),
            });
        }

        let holdout_start = rows[rows.len() - holdout_rows].0;
        debug!(
            rows = rows.len(),
            holdout_rows,
            holdout_start,
            "training split"
        );

        // Evaluation fits: training targets must fall before the held-out tail.
        let eval_fits = self.fit_all(records, &rows, holdout_start)?;
        let (performance, constituent_performance) =
            self.evaluate(records, &rows, holdout_start, &eval_fits)?;

        let horizons = if self.config.refit_on_full {
            self.fit_all(records, &rows, records.len())?
        } else {
            eval_fits
        };

        let data_end = records
            .last()
            .map(|r| r.timestamp)
            .unwrap_or_else(Utc::now);

        Ok(TrainingRun {
            horizons,
            performance,
            constituent_performance,
            rows_used: rows.len(),
            holdout_rows,
            dataset_hash: dataset_hash(records),
            data_end,
        })
    }

    /// `(record index, vector)` for every usable row, in time order.
    ///
    /// A vector whose window no longer matches the snapshot (a backfill or a
    /// revised earlier record since it was computed) is not usable.
    fn complete_rows<'a>(
        &self,
        records: &[TimeSeriesRecord],
        vectors: &'a HashMap<RecordId, FeatureVector>,
    ) -> Vec<(usize, &'a FeatureVector)> {
        records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_malformed())
            .filter_map(|(i, r)| {
                let fv = vectors.get(&r.id)?;
                let current = fv.record_revision == r.revision
                    && fv.lineage == lineage(records, i, self.lookback);
                (current && fv.is_complete(&self.required)).then_some((i, fv))
            })
            .collect()
    }

    /// Pairs `(fv_i, target_{i+h})` with `i + h < limit`.
    fn dataset<'a>(
        &'a self,
        records: &[TimeSeriesRecord],
        rows: &[(usize, &'a FeatureVector)],
        horizon: usize,
        from: usize,
        limit: usize,
    ) -> HorizonDataset<'a> {
        let mut inputs = Vec::new();
        let mut targets = Vec::new();
        for (i, fv) in rows {
            if *i < from || i + horizon >= limit {
                continue;
            }
            if let Some(y) = records.get(i + horizon).and_then(|r| r.target()) {
                inputs.push(*fv);
                targets.push(y);
            }
        }
        HorizonDataset {
            horizon,
            required: &self.required,
            inputs,
            targets,
        }
    }

    fn fit_all(
        &self,
        records: &[TimeSeriesRecord],
        rows: &[(usize, &FeatureVector)],
        limit: usize,
    ) -> Result<Vec<HorizonModels>, TrainingError> {
        let models: Vec<_> = self
            .config
            .constituents
            .iter()
            .map(|k| k.build(self.config.ridge_lambda))
            .collect();

        (1..=self.config.horizons)
            .into_par_iter()
            .map(|h| {
                let data = self.dataset(records, rows, h, 0, limit);
                if data.is_empty() {
                    return Err(TrainingError::InsufficientData {
                        available: 0,
                        required: self.config.min_training_rows,
                    });
                }
                let constituents = models
                    .iter()
                    .map(|m| m.fit(&data))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(HorizonModels {
                    horizon: h,
                    constituents,
                })
            })
            .collect()
    }

    fn evaluate(
        &self,
        records: &[TimeSeriesRecord],
        rows: &[(usize, &FeatureVector)],
        holdout_start: usize,
        fits: &[HorizonModels],
    ) -> Result<(ModelPerformance, BTreeMap<String, ModelPerformance>), TrainingError> {
        let mut ensemble = Vec::new();
        let mut actual = Vec::new();
        let mut per_constituent: BTreeMap<&'static str, Vec<f64>> = BTreeMap::new();

        for models in fits {
            let data = self.dataset(records, rows, models.horizon, holdout_start, records.len());
            for (fv, y) in data.inputs.iter().zip(&data.targets) {
                let outputs = models.predict_each(fv)?;
                let mean = outputs.iter().map(|(_, v)| v).sum::<f64>() / outputs.len() as f64;
                for (name, v) in outputs {
                    per_constituent.entry(name).or_default().push(v);
                }
                ensemble.push(mean);
                actual.push(*y);
            }
        }

        let performance =
            ModelPerformance::compute(&ensemble, &actual).ok_or(TrainingError::EmptyHoldout)?;
        let constituent_performance = per_constituent
            .into_iter()
            .filter_map(|(name, predicted)| {
                ModelPerformance::compute(&predicted, &actual).map(|p| (name.to_string(), p))
            })
            .collect();
        Ok((performance, constituent_performance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawRecord;
    use crate::features::{FeatureConfig, FeatureEngine};
    use chrono::{Duration, TimeZone};

    fn seasonal_store(hours: usize) -> TimeSeriesStore {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let store = TimeSeriesStore::new();
        store.upsert((0..hours).map(|h| {
            let phase = (h % 24) as f64 / 24.0 * std::f64::consts::TAU;
            let price = 50.0 + 15.0 * phase.sin() + (h % 5) as f64;
            RawRecord::market(start + Duration::hours(h as i64), price, "test")
        }));
        store
    }

    fn prepared(hours: usize) -> (TimeSeriesStore, FeatureStore, FeatureEngine) {
        let series = seasonal_store(hours);
        let features = FeatureStore::new();
        let engine = FeatureEngine::new(FeatureConfig::default()).unwrap();
        engine.refresh(&series, &features);
        (series, features, engine)
    }

    fn engine() -> FeatureEngine {
        FeatureEngine::new(FeatureConfig::default()).unwrap()
    }

    fn small_config() -> TrainerConfig {
        TrainerConfig {
            horizons: 6,
            min_training_rows: 100,
            ..TrainerConfig::default()
        }
    }

    #[test]
    fn insufficient_data_fails_fast() {
        let (series, features, engine) = prepared(60);
        let trainer = Trainer::new(TrainerConfig::default(), &engine).unwrap();
        let err = trainer
            .fit(&series.snapshot(), &features.snapshot())
            .unwrap_err();
        // first 24 records lack lag_24h / rolling stats
        assert!(matches!(
            err,
            TrainingError::InsufficientData {
                available: 36,
                required: 200
            }
        ));
    }

    #[test]
    fn trains_and_registers_version() {
        let (series, features, engine) = prepared(300);
        let trainer = Trainer::new(small_config(), &engine).unwrap();
        let registry = ModelRegistry::new();

        let model = trainer.train(&series, &features, &registry, "cfg").unwrap();
        assert_eq!(model.version.0, 1);
        assert_eq!(model.max_horizon(), 6);
        assert_eq!(model.rows_used, 276);
        assert_eq!(model.holdout_rows, 56);
        assert_eq!(model.constituent_names(), vec!["ridge", "drift", "hourly_profile"]);
        assert_eq!(model.constituent_performance.len(), 3);
        assert!(model.performance.rmse.is_finite());
        assert_eq!(model.dataset_hash, dataset_hash(&series.snapshot()));

        let again = trainer.train(&series, &features, &registry, "cfg").unwrap();
        assert_eq!(again.version.0, 2);
    }

    #[test]
    fn fit_is_deterministic() {
        let (series, features, engine) = prepared(300);
        let trainer = Trainer::new(small_config(), &engine).unwrap();
        let a = trainer.fit(&series.snapshot(), &features.snapshot()).unwrap();
        let b = trainer.fit(&series.snapshot(), &features.snapshot()).unwrap();
        assert_eq!(a.horizons, b.horizons);
        assert_eq!(a.performance, b.performance);
    }

    #[test]
    fn stale_vectors_are_not_training_rows() {
        let (series, features, engine) = prepared(300);
        let trainer = Trainer::new(small_config(), &engine).unwrap();
        let before = trainer
            .fit(&series.snapshot(), &features.snapshot())
            .unwrap()
            .rows_used;

        let ts = series.snapshot()[200].timestamp;
        series.upsert([RawRecord::market(ts, 999.0, "late")]);
        let after = trainer
            .fit(&series.snapshot(), &features.snapshot())
            .unwrap()
            .rows_used;
        // the revised record and every vector whose window reads it
        assert_eq!(after, before - 25);
    }

    #[test]
    fn backfilled_gap_invalidates_vectors_until_refresh() {
        // GIVEN 300 hours with hour 150 missing, fully refreshed
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let series = TimeSeriesStore::new();
        series.upsert((0..300).filter(|h| *h != 150).map(|h| {
            let price = 50.0 + (h % 24) as f64 + (h % 5) as f64;
            RawRecord::market(start + Duration::hours(h), price, "test")
        }));
        let features = FeatureStore::new();
        let engine = engine();
        engine.refresh(&series, &features);
        let trainer = Trainer::new(small_config(), &engine).unwrap();
        let before = trainer
            .fit(&series.snapshot(), &features.snapshot())
            .unwrap()
            .rows_used;

        // WHEN hour 150 arrives late, before features are refreshed
        series.upsert([RawRecord::market(start + Duration::hours(150), 999.0, "late")]);
        let records = series.snapshot();
        let stale = trainer.fit(&records, &features.snapshot()).unwrap();

        // THEN no vector whose window spans the backfill is a training row
        assert_eq!(stale.rows_used, before - 24);
        let after_gap = records[151].id;
        assert_ne!(features.get(after_gap).unwrap().lag(1), Some(999.0));

        // AND a refresh makes them usable again
        engine.refresh(&series, &features);
        let fresh = trainer.fit(&series.snapshot(), &features.snapshot()).unwrap();
        assert_eq!(fresh.rows_used, before + 1);
        assert_eq!(features.get(after_gap).unwrap().lag(1), Some(999.0));
    }

    #[test]
    fn rejects_bad_config() {
        let cfg = TrainerConfig {
            holdout_fraction: 1.0,
            ..TrainerConfig::default()
        };
        assert!(matches!(
            Trainer::new(cfg, &engine()),
            Err(TrainingError::InvalidConfig(_))
        ));
        let cfg = TrainerConfig {
            constituents: vec![ConstituentKind::Drift, ConstituentKind::Drift],
            ..TrainerConfig::default()
        };
        assert!(Trainer::new(cfg, &engine()).is_err());
        let cfg = TrainerConfig {
            min_training_rows: 0,
            ..TrainerConfig::default()
        };
        assert!(matches!(
            Trainer::new(cfg, &engine()),
            Err(TrainingError::InvalidConfig(_))
        ));
    }

    #[test]
    fn no_complete_rows_is_insufficient_data() {
        // GIVEN a trainer that would accept a single row
        let (series, features, engine) = prepared(10);
        let cfg = TrainerConfig {
            min_training_rows: 1,
            ..small_config()
        };
        let trainer = Trainer::new(cfg, &engine).unwrap();

        // WHEN only ten hours exist (none with a full lookback) or nothing at all
        let short = trainer.fit(&series.snapshot(), &features.snapshot());
        let empty = trainer.fit(&[], &HashMap::new());

        // THEN both fail with an error instead of splitting an empty row set
        assert!(matches!(
            short,
            Err(TrainingError::InsufficientData { available: 0, .. })
        ));
        assert!(matches!(
            empty,
            Err(TrainingError::InsufficientData { available: 0, .. })
        ));
    }

    #[test]
    fn single_row_cannot_fill_both_sides_of_the_split() {
        let (series, features, engine) = prepared(25);
        let cfg = TrainerConfig {
            min_training_rows: 1,
            ..small_config()
        };
        let trainer = Trainer::new(cfg, &engine).unwrap();
        // only index 24 has a full 24h lookback
        assert!(matches!(
            trainer.fit(&series.snapshot(), &features.snapshot()),
            Err(TrainingError::InsufficientData {
                available: 1,
                required: 2
            })
        ));
    }
}

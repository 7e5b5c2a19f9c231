//! Pricecast Core — stores, features, models, ensemble forecasting, validation.
//!
//! This crate contains the computational heart of the forecasting pipeline:
//! - Domain types (records, feature vectors, predictions, validation results)
//! - Time series and feature stores, safe for concurrent upserts
//! - Feature Engine with strict no-look-ahead lag/rolling/momentum columns
//! - Constituent models and the multi-horizon Model Trainer
//! - Model registry and closed-loop performance ledger
//! - Ensemble Predictor and Prediction Validator
//!
//! No I/O happens here; loading, sources and orchestration live in
//! `pricecast-runner`.

pub mod domain;
pub mod ensemble;
pub mod features;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod store;
pub mod trainer;
pub mod validator;

pub use ensemble::{EnsembleConfig, EnsemblePredictor, ModelInfo, PredictError, PredictionBatch};
pub use features::{FeatureConfig, FeatureEngine, FeatureError, FeatureReport};
pub use ledger::{LedgerSnapshot, PerformanceLedger};
pub use metrics::ModelPerformance;
pub use registry::{ModelRegistry, TrainedModel};
pub use trainer::{Trainer, TrainerConfig, TrainingError, TrainingRun};
pub use validator::{
    PredictionValidator, ValidationError, ValidationRun, ValidationSummary, ValidatorConfig,
};

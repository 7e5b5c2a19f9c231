//! The named workflows and their stage lists.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::stage::{self, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    DataCollection,
    FeatureEngineering,
    ModelTraining,
    Prediction,
    Validation,
    FullUpdate,
    DailyMaintenance,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown workflow '{0}' (expected one of: {names})", names = Workflow::names().join(", "))]
pub struct UnknownWorkflow(pub String);

const DATA_COLLECTION: &[Stage] = &[
    Stage::required("ingest_market", stage::ingest_market),
    Stage::optional("enrich_weather", stage::enrich_weather),
    Stage::optional("enrich_gas", stage::enrich_gas),
];

const FEATURE_ENGINEERING: &[Stage] = &[Stage::required("compute_features", stage::compute_features)];

const MODEL_TRAINING: &[Stage] = &[
    Stage::required("compute_features", stage::compute_features),
    Stage::required("train_model", stage::train_model),
];

const PREDICTION: &[Stage] = &[
    Stage::required("compute_features", stage::compute_features),
    Stage::required("generate_predictions", stage::generate_predictions),
];

const VALIDATION: &[Stage] = &[Stage::required("validate_predictions", stage::validate_predictions)];

const FULL_UPDATE: &[Stage] = &[
    Stage::required("ingest_market", stage::ingest_market),
    Stage::optional("enrich_weather", stage::enrich_weather),
    Stage::optional("enrich_gas", stage::enrich_gas),
    Stage::required("compute_features", stage::compute_features),
    Stage::required("train_model", stage::train_model),
    Stage::required("generate_predictions", stage::generate_predictions),
    Stage::optional("validate_predictions", stage::validate_predictions),
];

const DAILY_MAINTENANCE: &[Stage] = &[
    Stage::required("validate_predictions", stage::validate_predictions),
    Stage::required("compute_features", stage::compute_features),
    Stage::required("train_model", stage::train_model),
    Stage::optional("health_check", stage::health_check),
];

impl Workflow {
    pub const ALL: [Workflow; 7] = [
        Self::DataCollection,
        Self::FeatureEngineering,
        Self::ModelTraining,
        Self::Prediction,
        Self::Validation,
        Self::FullUpdate,
        Self::DailyMaintenance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::DataCollection => "data_collection",
            Self::FeatureEngineering => "feature_engineering",
            Self::ModelTraining => "model_training",
            Self::Prediction => "prediction",
            Self::Validation => "validation",
            Self::FullUpdate => "full_update",
            Self::DailyMaintenance => "daily_maintenance",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|w| w.name()).collect()
    }

    /// Stages in execution order.
    pub fn stages(self) -> &'static [Stage] {
        match self {
            Self::DataCollection => DATA_COLLECTION,
            Self::FeatureEngineering => FEATURE_ENGINEERING,
            Self::ModelTraining => MODEL_TRAINING,
            Self::Prediction => PREDICTION,
            Self::Validation => VALIDATION,
            Self::FullUpdate => FULL_UPDATE,
            Self::DailyMaintenance => DAILY_MAINTENANCE,
        }
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Workflow {
    type Err = UnknownWorkflow;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|w| w.name() == wanted)
            .ok_or_else(|| UnknownWorkflow(s.to_string()))
    }
}

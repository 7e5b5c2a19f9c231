//! Stage descriptors and the built-in pipeline stages.
//!
//! A stage is `{name, required, run}`. The orchestrator runs a list of them
//! in order; a failed required stage stops the list, a failed optional stage
//! is recorded and skipped over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use pricecast_core::domain::ModelVersion;
use pricecast_core::{
    FeatureReport, ModelPerformance, PredictError, TrainingError, ValidationSummary,
};

use crate::health::SystemHealth;
use crate::ingest::{ingest, IngestReport};
use crate::orchestrator::Pipeline;
use crate::sources::{RecordSource, SourceError};

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("time series store is empty")]
    NoData,

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Predict(#[from] PredictError),

    #[error("{0}")]
    Failed(String),
}

/// What a stage sees while it runs.
pub struct PipelineContext<'a> {
    pub pipeline: &'a Pipeline,
    /// Logical time of the run: predictions are issued and validated at `now`.
    pub now: DateTime<Utc>,
}

pub type StageFn = fn(&PipelineContext<'_>) -> Result<StageOutput, StageError>;

#[derive(Clone, Copy)]
pub struct Stage {
    pub name: &'static str,
    pub required: bool,
    pub run: StageFn,
}

impl Stage {
    pub const fn required(name: &'static str, run: StageFn) -> Self {
        Self {
            name,
            required: true,
            run,
        }
    }

    pub const fn optional(name: &'static str, run: StageFn) -> Self {
        Self {
            name,
            required: false,
            run,
        }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("required", &self.required)
            .finish()
    }
}

// ─── Outputs ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutput {
    pub version: ModelVersion,
    pub rows_used: usize,
    pub holdout_rows: usize,
    pub performance: ModelPerformance,
    pub constituent_performance: BTreeMap<String, ModelPerformance>,
    pub dataset_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutput {
    pub model_version: ModelVersion,
    pub base_timestamp: Option<DateTime<Utc>>,
    pub predictions: usize,
    /// Predictions not already in the log.
    pub logged: usize,
    pub weights_used: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutput {
    pub validated: usize,
    pub pending: usize,
    pub not_due: usize,
    pub summary: ValidationSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageOutput {
    Ingest(IngestReport),
    Features(FeatureReport),
    Training(TrainingOutput),
    Predictions(PredictionOutput),
    Validation(ValidationOutput),
    Health(SystemHealth),
}

/// Result of one executed stage, as it appears in a workflow report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub required: bool,
    pub success: bool,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StageOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageOutcome {
    pub fn succeeded(required: bool, elapsed_ms: u64, output: StageOutput) -> Self {
        Self {
            required,
            success: true,
            elapsed_ms,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(required: bool, elapsed_ms: u64, error: String) -> Self {
        Self {
            required,
            success: false,
            elapsed_ms,
            output: None,
            error: Some(error),
        }
    }
}

// ─── Built-in stages ────────────────────────────────────────────────

fn ingest_from(
    ctx: &PipelineContext<'_>,
    source: Option<&dyn RecordSource>,
    kind: &'static str,
) -> Result<StageOutput, StageError> {
    let source = source.ok_or(SourceError::NotConfigured(kind))?;
    let report = ingest(source, &ctx.pipeline.state().series)?;
    Ok(StageOutput::Ingest(report))
}

pub fn ingest_market(ctx: &PipelineContext<'_>) -> Result<StageOutput, StageError> {
    ingest_from(ctx, ctx.pipeline.sources().market.as_deref(), "market")
}

pub fn enrich_weather(ctx: &PipelineContext<'_>) -> Result<StageOutput, StageError> {
    ingest_from(ctx, ctx.pipeline.sources().weather.as_deref(), "weather")
}

pub fn enrich_gas(ctx: &PipelineContext<'_>) -> Result<StageOutput, StageError> {
    ingest_from(ctx, ctx.pipeline.sources().gas.as_deref(), "gas")
}

pub fn compute_features(ctx: &PipelineContext<'_>) -> Result<StageOutput, StageError> {
    if ctx.pipeline.state().series.is_empty() {
        return Err(StageError::NoData);
    }
    Ok(StageOutput::Features(ctx.pipeline.refresh_features()))
}

pub fn train_model(ctx: &PipelineContext<'_>) -> Result<StageOutput, StageError> {
    let model = ctx.pipeline.train()?;
    Ok(StageOutput::Training(TrainingOutput {
        version: model.version,
        rows_used: model.rows_used,
        holdout_rows: model.holdout_rows,
        performance: model.performance.clone(),
        constituent_performance: model.constituent_performance.clone(),
        dataset_hash: model.dataset_hash.clone(),
    }))
}

pub fn generate_predictions(ctx: &PipelineContext<'_>) -> Result<StageOutput, StageError> {
    let hours_ahead = ctx.pipeline.config().prediction.hours_ahead;
    let (batch, logged) = ctx.pipeline.predict_logged(hours_ahead, ctx.now)?;
    Ok(StageOutput::Predictions(PredictionOutput {
        model_version: batch.model_info.version,
        base_timestamp: batch.predictions.first().map(|p| p.base_timestamp),
        predictions: batch.predictions.len(),
        logged,
        weights_used: batch.weights_used,
    }))
}

pub fn validate_predictions(ctx: &PipelineContext<'_>) -> Result<StageOutput, StageError> {
    let run = ctx.pipeline.validate(ctx.now);
    Ok(StageOutput::Validation(ValidationOutput {
        validated: run.validated,
        pending: run.pending,
        not_due: run.not_due,
        summary: run.summary,
    }))
}

pub fn health_check(ctx: &PipelineContext<'_>) -> Result<StageOutput, StageError> {
    Ok(StageOutput::Health(ctx.pipeline.health(ctx.now)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serialises_output_or_error() {
        let ok = StageOutcome::succeeded(
            true,
            3,
            StageOutput::Validation(ValidationOutput::default()),
        );
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["output"]["kind"], "validation");
        assert!(json.get("error").is_none());

        let failed = StageOutcome::failed(false, 1, "weather feed down".into());
        let json = serde_json::to_string(&failed).unwrap();
        assert!(!json.contains("output"));
        let back: StageOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, failed);
    }

    #[test]
    fn constructors_set_required_flag() {
        assert!(Stage::required("x", health_check).required);
        assert!(!Stage::optional("x", health_check).required);
    }
}

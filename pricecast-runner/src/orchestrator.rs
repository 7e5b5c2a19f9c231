//! Pipeline Orchestrator — runs workflows stage by stage.
//!
//! A workflow run executes its stages sequentially, in declared order. The
//! loop accumulates a per-stage result map and stops only when a required
//! stage fails; optional failures are logged and recorded. The caller always
//! gets a [`WorkflowReport`], whether the run succeeded or not.
//!
//! Several runs may share one [`Pipeline`] concurrently: every store is
//! internally synchronised and every write is an upsert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use pricecast_core::{
    EnsemblePredictor, FeatureEngine, FeatureReport, PredictError, PredictionBatch,
    PredictionValidator, TrainedModel, Trainer, TrainingError, ValidationRun,
};

use crate::config::{ConfigError, PipelineConfig};
use crate::health::{self, SystemHealth};
use crate::sources::SourceSet;
use crate::stage::{PipelineContext, Stage, StageOutcome};
use crate::state::PipelineState;
use crate::workflow::Workflow;

/// Summary of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub success: bool,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    pub total_time_ms: u64,
    pub tasks_executed: usize,
    pub tasks_succeeded: usize,
    pub tasks_failed: usize,
    pub results: BTreeMap<String, StageOutcome>,
    /// Stages not run because a required stage failed first.
    pub skipped: Vec<String>,
    /// The failing required stage and its error.
    pub error: Option<String>,
}

impl WorkflowReport {
    fn new(workflow: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            workflow: workflow.to_string(),
            started_at,
            total_time_ms: 0,
            tasks_executed: 0,
            tasks_succeeded: 0,
            tasks_failed: 0,
            results: BTreeMap::new(),
            skipped: Vec::new(),
            error: None,
        }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    fingerprint: String,
    state: Arc<PipelineState>,
    sources: SourceSet,
    engine: FeatureEngine,
    trainer: Trainer,
    predictor: EnsemblePredictor,
    validator: PredictionValidator,
}

impl Pipeline {
    /// Pipeline over fresh, empty state.
    pub fn new(config: PipelineConfig, sources: SourceSet) -> Result<Self, ConfigError> {
        let state = Arc::new(PipelineState::with_ledger_window(
            config.prediction.ledger_window,
        ));
        Self::with_state(config, sources, state)
    }

    /// Pipeline over existing (possibly shared or restored) state.
    pub fn with_state(
        config: PipelineConfig,
        sources: SourceSet,
        state: Arc<PipelineState>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let engine = FeatureEngine::new(config.features.clone())?;
        let trainer = Trainer::new(config.training.clone(), &engine)?;
        let predictor = EnsemblePredictor::new(config.ensemble.clone(), engine.required_inputs())?;
        let validator = PredictionValidator::new(config.validation.clone())?;
        let fingerprint = config.fingerprint();

        Ok(Self {
            config,
            fingerprint,
            state,
            sources,
            engine,
            trainer,
            predictor,
            validator,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        &self.state
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    pub fn engine(&self) -> &FeatureEngine {
        &self.engine
    }

    // ─── Workflows ──────────────────────────────────────────────────

    pub fn run_workflow(&self, workflow: Workflow) -> WorkflowReport {
        self.run_workflow_at(workflow, Utc::now())
    }

    /// Run `workflow` with `now` as the logical time of the run.
    pub fn run_workflow_at(&self, workflow: Workflow, now: DateTime<Utc>) -> WorkflowReport {
        self.run_stages(workflow.name(), workflow.stages(), now)
    }

    /// Execute `stages` in order and summarise the run.
    pub fn run_stages(&self, workflow: &str, stages: &[Stage], now: DateTime<Utc>) -> WorkflowReport {
        let started = Instant::now();
        let ctx = PipelineContext {
            pipeline: self,
            now,
        };
        let mut report = WorkflowReport::new(workflow, now);
        info!(workflow, stages = stages.len(), "workflow started");

        for (i, stage) in stages.iter().enumerate() {
            let stage_started = Instant::now();
            let result = (stage.run)(&ctx);
            let elapsed_ms = stage_started.elapsed().as_millis() as u64;
            report.tasks_executed += 1;

            let outcome = match result {
                Ok(output) => {
                    report.tasks_succeeded += 1;
                    info!(workflow, stage = stage.name, elapsed_ms, "stage succeeded");
                    StageOutcome::succeeded(stage.required, elapsed_ms, output)
                }
                Err(e) => {
                    report.tasks_failed += 1;
                    let message = e.to_string();
                    if stage.required {
                        error!(workflow, stage = stage.name, error = %message, "required stage failed, aborting");
                        report.error = Some(format!("{}: {message}", stage.name));
                        report.skipped = stages[i + 1..]
                            .iter()
                            .map(|s| s.name.to_string())
                            .collect();
                    } else {
                        warn!(workflow, stage = stage.name, error = %message, "optional stage failed, continuing");
                    }
                    StageOutcome::failed(stage.required, elapsed_ms, message)
                }
            };
            report.results.insert(stage.name.to_string(), outcome);

            if report.error.is_some() {
                break;
            }
        }

        report.success = report.error.is_none();
        report.total_time_ms = started.elapsed().as_millis() as u64;
        info!(
            workflow,
            success = report.success,
            executed = report.tasks_executed,
            failed = report.tasks_failed,
            total_time_ms = report.total_time_ms,
            "workflow finished"
        );
        report
    }

    // ─── Direct operations ──────────────────────────────────────────

    pub fn refresh_features(&self) -> FeatureReport {
        self.engine.refresh(&self.state.series, &self.state.features)
    }

    pub fn train(&self) -> Result<Arc<TrainedModel>, TrainingError> {
        let s = &self.state;
        self.trainer
            .train(&s.series, &s.features, &s.registry, &self.fingerprint)
    }

    /// Forecast `1..=hours_ahead` hours from the latest record and log the batch.
    pub fn predict(&self, hours_ahead: usize, now: DateTime<Utc>) -> Result<PredictionBatch, PredictError> {
        self.predict_logged(hours_ahead, now).map(|(batch, _)| batch)
    }

    pub(crate) fn predict_logged(
        &self,
        hours_ahead: usize,
        now: DateTime<Utc>,
    ) -> Result<(PredictionBatch, usize), PredictError> {
        let s = &self.state;
        let batch = self.predictor.predict(
            hours_ahead,
            &s.series,
            &s.features,
            &s.registry,
            &s.ledger,
            now,
        )?;
        let logged = s.predictions.append(batch.predictions.iter().cloned());
        debug!(logged, total = s.predictions.len(), "predictions logged");
        Ok((batch, logged))
    }

    pub fn validate(&self, now: DateTime<Utc>) -> ValidationRun {
        let s = &self.state;
        self.validator
            .validate(&s.predictions, &s.validations, &s.series, &s.ledger, now)
    }

    pub fn health(&self, now: DateTime<Utc>) -> SystemHealth {
        health::assess(&self.state, &self.config.health, now)
    }
}

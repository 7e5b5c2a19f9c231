//! Prediction Validator — reconciles elapsed forecasts with realized actuals.
//!
//! Predictions whose target time has not arrived are `not_due`; elapsed ones
//! without an actual yet are `pending` and are retried on the next pass.
//! Neither produces a result. Summary statistics cover only the results
//! accepted in this run.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::ValidationResult;
use crate::ledger::PerformanceLedger;
use crate::metrics::mean;
use crate::store::{PredictionLog, TimeSeriesStore, ValidationLog};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid validation config: {0}")]
    InvalidConfig(String),
}

/// Validator tunables (`[validation]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// How far after the target time an actual may be taken from.
    pub actual_tolerance_minutes: i64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            actual_tolerance_minutes: 30,
        }
    }
}

impl ValidatorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.actual_tolerance_minutes < 0 {
            return Err(ValidationError::InvalidConfig(
                "actual_tolerance_minutes must not be negative".into(),
            ));
        }
        Ok(())
    }

    pub fn tolerance(&self) -> Duration {
        Duration::minutes(self.actual_tolerance_minutes)
    }
}

/// Aggregates over one run's newly validated results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub count: usize,
    pub mae: Option<f64>,
    /// Mean percent error over results with a defined percent error.
    pub mape: Option<f64>,
    pub rmse: Option<f64>,
    /// Empirical coverage: share of actuals inside their interval.
    pub within_confidence_interval: Option<f64>,
}

impl ValidationSummary {
    pub fn from_results(results: &[ValidationResult]) -> Self {
        let abs: Vec<f64> = results.iter().map(|r| r.absolute_error).collect();
        let pct: Vec<f64> = results.iter().filter_map(|r| r.percent_error).collect();
        let sq: Vec<f64> = abs.iter().map(|e| e * e).collect();
        let inside: Vec<f64> = results
            .iter()
            .map(|r| if r.within_confidence_interval { 1.0 } else { 0.0 })
            .collect();
        Self {
            count: results.len(),
            mae: mean(&abs),
            mape: mean(&pct),
            rmse: mean(&sq).map(f64::sqrt),
            within_confidence_interval: mean(&inside),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRun {
    pub validated: usize,
    /// Elapsed predictions still waiting for an actual.
    pub pending: usize,
    /// Predictions whose target time is still in the future.
    pub not_due: usize,
    pub results: Vec<ValidationResult>,
    pub summary: ValidationSummary,
}

pub struct PredictionValidator {
    config: ValidatorConfig,
}

impl PredictionValidator {
    pub fn new(config: ValidatorConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Validate every unvalidated prediction that has come due by `now`.
    pub fn validate(
        &self,
        predictions: &PredictionLog,
        validations: &ValidationLog,
        series: &TimeSeriesStore,
        ledger: &PerformanceLedger,
        now: DateTime<Utc>,
    ) -> ValidationRun {
        let mut run = ValidationRun::default();
        let tolerance = self.config.tolerance();
        let mut candidates = Vec::new();

        for prediction in predictions.all() {
            if validations.contains(&prediction.id) {
                continue;
            }
            if prediction.target_timestamp > now {
                run.not_due += 1;
                continue;
            }
            match series.find_actual(prediction.target_timestamp, tolerance) {
                Some(record) => {
                    let result = ValidationResult::reconcile(&prediction, record.target_value, now);
                    candidates.push((prediction, result));
                }
                None => {
                    debug!(id = %prediction.id, target = %prediction.target_timestamp, "actual not yet available");
                    run.pending += 1;
                }
            }
        }

        let accepted = validations.append(candidates.iter().map(|(_, r)| r.clone()));
        for result in &accepted {
            if let Some((prediction, _)) = candidates
                .iter()
                .find(|(p, _)| p.id == result.prediction_id)
            {
                for (name, output) in &prediction.constituents {
                    ledger.record(name, (result.actual_value - output).abs());
                }
            }
        }

        run.validated = accepted.len();
        run.summary = ValidationSummary::from_results(&accepted);
        run.results = accepted;

        info!(
            validated = run.validated,
            pending = run.pending,
            not_due = run.not_due,
            mae = run.summary.mae,
            coverage = run.summary.within_confidence_interval,
            "validation pass complete"
        );
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConfidenceLevel, ModelVersion, Prediction, PredictionId, RawRecord};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn t(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn prediction(id: &str, target_hour: i64, value: f64) -> Prediction {
        Prediction {
            id: PredictionId(id.into()),
            issued_at: t(0),
            base_timestamp: t(0),
            target_timestamp: t(target_hour),
            horizon_hours: target_hour as usize,
            predicted_value: value,
            confidence_lower: value - 5.0,
            confidence_upper: value + 5.0,
            prediction_std: 2.5,
            confidence: ConfidenceLevel::High,
            model_version: ModelVersion(1),
            constituents: BTreeMap::from([
                ("ridge".to_string(), value - 1.0),
                ("drift".to_string(), value + 3.0),
            ]),
        }
    }

    struct Fixture {
        predictions: PredictionLog,
        validations: ValidationLog,
        series: TimeSeriesStore,
        ledger: PerformanceLedger,
        validator: PredictionValidator,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                predictions: PredictionLog::new(),
                validations: ValidationLog::new(),
                series: TimeSeriesStore::new(),
                ledger: PerformanceLedger::default(),
                validator: PredictionValidator::new(ValidatorConfig::default()).unwrap(),
            }
        }

        fn run(&self, now: DateTime<Utc>) -> ValidationRun {
            self.validator.validate(
                &self.predictions,
                &self.validations,
                &self.series,
                &self.ledger,
                now,
            )
        }
    }

    #[test]
    fn future_and_missing_actuals_are_deferred() {
        let fx = Fixture::new();
        fx.predictions.append([prediction("a", 1, 50.0), prediction("b", 5, 50.0)]);

        let run = fx.run(t(2));
        assert_eq!(run.validated, 0);
        assert_eq!(run.pending, 1);
        assert_eq!(run.not_due, 1);
        assert!(fx.validations.is_empty());
        assert_eq!(run.summary.count, 0);
        assert_eq!(run.summary.mae, None);
    }

    #[test]
    fn validates_once_actual_arrives() {
        let fx = Fixture::new();
        fx.predictions.append([prediction("a", 1, 50.0)]);
        fx.run(t(2));

        fx.series.upsert([RawRecord::market(t(1), 54.0, "market")]);
        let run = fx.run(t(2));
        assert_eq!(run.validated, 1);
        let r = &run.results[0];
        assert_eq!(r.absolute_error, 4.0);
        assert!(r.within_confidence_interval);
        assert_eq!(run.summary.within_confidence_interval, Some(1.0));
        assert_eq!(run.summary.rmse, Some(4.0));

        // ridge said 49, drift said 53
        assert_eq!(fx.ledger.mae("ridge"), Some(5.0));
        assert_eq!(fx.ledger.mae("drift"), Some(1.0));

        let again = fx.run(t(3));
        assert_eq!(again.validated, 0);
        assert_eq!(fx.validations.len(), 1);
    }

    #[test]
    fn summary_covers_only_this_run() {
        let fx = Fixture::new();
        fx.series.upsert([
            RawRecord::market(t(1), 60.0, "market"),
            RawRecord::market(t(2), 52.0, "market"),
        ]);
        fx.predictions.append([prediction("a", 1, 50.0)]);
        let first = fx.run(t(1));
        assert_eq!(first.summary.mae, Some(10.0));
        assert_eq!(first.summary.within_confidence_interval, Some(0.0));

        fx.predictions.append([prediction("b", 2, 50.0)]);
        let second = fx.run(t(2));
        assert_eq!(second.summary.count, 1);
        assert_eq!(second.summary.mae, Some(2.0));
        assert_eq!(second.summary.within_confidence_interval, Some(1.0));
    }

    #[test]
    fn actual_within_tolerance_is_used() {
        let fx = Fixture::new();
        let mut p = prediction("a", 1, 50.0);
        p.target_timestamp = t(1) - Duration::minutes(20);
        fx.predictions.append([p]);
        fx.series.upsert([RawRecord::market(t(1), 51.0, "market")]);

        assert_eq!(fx.run(t(2)).validated, 1);
    }

    #[test]
    fn zero_actual_has_no_percent_error() {
        let fx = Fixture::new();
        fx.series.upsert([RawRecord::market(t(1), 0.0, "market")]);
        fx.predictions.append([prediction("a", 1, 2.0)]);
        let run = fx.run(t(1));
        assert_eq!(run.results[0].percent_error, None);
        assert_eq!(run.summary.mape, None);
        assert_eq!(run.summary.mae, Some(2.0));
    }

    #[test]
    fn negative_tolerance_rejected() {
        let cfg = ValidatorConfig {
            actual_tolerance_minutes: -1,
        };
        assert!(PredictionValidator::new(cfg).is_err());
    }
}

//! Prediction and ValidationResult — immutable forecast and its reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::ids::{ModelVersion, PredictionId};

/// Practical usability of a forecast, from thresholding `prediction_std`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        f.write_str(s)
    }
}

/// One ensemble forecast for one horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: PredictionId,
    pub issued_at: DateTime<Utc>,
    /// Timestamp of the record whose features produced this forecast.
    pub base_timestamp: DateTime<Utc>,
    pub target_timestamp: DateTime<Utc>,
    pub horizon_hours: usize,
    pub predicted_value: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
    pub prediction_std: f64,
    pub confidence: ConfidenceLevel,
    pub model_version: ModelVersion,
    /// Output of each constituent model, by name.
    #[serde(default)]
    pub constituents: BTreeMap<String, f64>,
}

impl Prediction {
    pub fn contains(&self, actual: f64) -> bool {
        self.confidence_lower <= actual && actual <= self.confidence_upper
    }
}

/// Reconciliation of one prediction against the realized actual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub prediction_id: PredictionId,
    pub target_timestamp: DateTime<Utc>,
    pub horizon_hours: usize,
    pub model_version: ModelVersion,
    pub predicted_value: f64,
    pub actual_value: f64,
    pub absolute_error: f64,
    /// `absolute_error / |actual|` as a percentage, so it stays non-negative
    /// for negative prices. `None` when the actual is zero.
    pub percent_error: Option<f64>,
    pub within_confidence_interval: bool,
    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    pub fn reconcile(prediction: &Prediction, actual: f64, validated_at: DateTime<Utc>) -> Self {
        let absolute_error = (actual - prediction.predicted_value).abs();
        let percent_error = (actual != 0.0).then(|| absolute_error / actual.abs() * 100.0);
        Self {
            prediction_id: prediction.id.clone(),
            target_timestamp: prediction.target_timestamp,
            horizon_hours: prediction.horizon_hours,
            model_version: prediction.model_version,
            predicted_value: prediction.predicted_value,
            actual_value: actual,
            absolute_error,
            percent_error,
            within_confidence_interval: prediction.contains(actual),
            validated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn prediction(value: f64, lower: f64, upper: f64) -> Prediction {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        Prediction {
            id: PredictionId("p1".into()),
            issued_at: base,
            base_timestamp: base,
            target_timestamp: base + chrono::Duration::hours(1),
            horizon_hours: 1,
            predicted_value: value,
            confidence_lower: lower,
            confidence_upper: upper,
            prediction_std: 2.0,
            confidence: ConfidenceLevel::High,
            model_version: ModelVersion(1),
            constituents: BTreeMap::new(),
        }
    }

    #[test]
    fn reconcile_computes_errors() {
        let p = prediction(50.0, 46.0, 54.0);
        let r = ValidationResult::reconcile(&p, 40.0, p.target_timestamp);
        assert_eq!(r.absolute_error, 10.0);
        assert_eq!(r.percent_error, Some(25.0));
        assert!(!r.within_confidence_interval);
    }

    #[test]
    fn zero_actual_leaves_percent_error_undefined() {
        let p = prediction(3.0, -1.0, 7.0);
        let r = ValidationResult::reconcile(&p, 0.0, p.target_timestamp);
        assert_eq!(r.percent_error, None);
        assert!(r.within_confidence_interval);
    }

    #[test]
    fn negative_actual_gives_positive_percent_error() {
        // GIVEN a forecast of 10 for an hour that cleared at -20
        let p = prediction(10.0, 5.0, 15.0);

        // WHEN reconciled
        let r = ValidationResult::reconcile(&p, -20.0, p.target_timestamp);

        // THEN the error is scaled by the magnitude of the actual
        assert_eq!(r.absolute_error, 30.0);
        assert_eq!(r.percent_error, Some(150.0));
    }

    #[test]
    fn bounds_are_inclusive() {
        let p = prediction(50.0, 46.0, 54.0);
        assert!(p.contains(46.0));
        assert!(p.contains(54.0));
        assert!(!p.contains(54.000001));
    }
}

//! CSV and JSON export of predictions and validation results.

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use serde::Serialize;

use pricecast_core::domain::{Prediction, ValidationResult};

// ─── CSV export ─────────────────────────────────────────────────────

/// Columns: id, issued_at, base_timestamp, target_timestamp, horizon_hours,
/// predicted_value, confidence_lower, confidence_upper, prediction_std,
/// confidence, model_version
pub fn export_predictions_csv(predictions: &[Prediction]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "id",
        "issued_at",
        "base_timestamp",
        "target_timestamp",
        "horizon_hours",
        "predicted_value",
        "confidence_lower",
        "confidence_upper",
        "prediction_std",
        "confidence",
        "model_version",
    ])?;

    for p in predictions {
        wtr.write_record([
            &p.id.to_string(),
            &p.issued_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            &p.base_timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            &p.target_timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            &p.horizon_hours.to_string(),
            &format!("{:.4}", p.predicted_value),
            &format!("{:.4}", p.confidence_lower),
            &format!("{:.4}", p.confidence_upper),
            &format!("{:.4}", p.prediction_std),
            &p.confidence.to_string(),
            &p.model_version.to_string(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Columns: prediction_id, target_timestamp, horizon_hours, model_version,
/// predicted_value, actual_value, absolute_error, percent_error,
/// within_confidence_interval, validated_at
///
/// An undefined percent error is written as an empty cell.
pub fn export_validations_csv(results: &[ValidationResult]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "prediction_id",
        "target_timestamp",
        "horizon_hours",
        "model_version",
        "predicted_value",
        "actual_value",
        "absolute_error",
        "percent_error",
        "within_confidence_interval",
        "validated_at",
    ])?;

    for r in results {
        wtr.write_record([
            &r.prediction_id.to_string(),
            &r.target_timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            &r.horizon_hours.to_string(),
            &r.model_version.to_string(),
            &format!("{:.4}", r.predicted_value),
            &format!("{:.4}", r.actual_value),
            &format!("{:.4}", r.absolute_error),
            &r.percent_error.map(|e| format!("{e:.4}")).unwrap_or_default(),
            &r.within_confidence_interval.to_string(),
            &r.validated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("failed to serialize to JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use pricecast_core::domain::{ConfidenceLevel, ModelVersion, PredictionId};
    use std::collections::BTreeMap;

    fn prediction() -> Prediction {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        Prediction {
            id: PredictionId::derive(ModelVersion(2), base, 3, base),
            issued_at: base,
            base_timestamp: base,
            target_timestamp: base + Duration::hours(3),
            horizon_hours: 3,
            predicted_value: 55.0,
            confidence_lower: 50.0,
            confidence_upper: 60.0,
            prediction_std: 2.551,
            confidence: ConfidenceLevel::High,
            model_version: ModelVersion(2),
            constituents: BTreeMap::new(),
        }
    }

    #[test]
    fn predictions_csv_has_header_and_rows() {
        let csv = export_predictions_csv(&[prediction()]).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("id,issued_at,base_timestamp"));
        assert!(lines[1].contains("2024-05-01T13:00:00Z"));
        assert!(lines[1].contains("55.0000"));
    }

    #[test]
    fn undefined_percent_error_is_blank() {
        let p = prediction();
        let result = ValidationResult::reconcile(&p, 0.0, p.target_timestamp);
        assert!(result.percent_error.is_none());

        let csv = export_validations_csv(&[result]).unwrap();
        let row = csv.lines().nth(1).unwrap();
        assert!(row.contains(",,"));
    }
}

//! System health surface: status, metrics, alerts.
//!
//! Status is the worst alert severity. No alerts means healthy.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use pricecast_core::domain::ModelVersion;
use pricecast_core::ValidationSummary;

use crate::state::PipelineState;

/// Alert thresholds (`[health]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Trailing hours scored for data quality.
    pub quality_window_hours: usize,
    pub data_quality_warning: f64,
    pub data_quality_degraded: f64,
    /// Age of the latest record (hours, relative to now).
    pub freshness_warning_hours: f64,
    pub freshness_critical_hours: f64,
    pub model_max_age_hours: f64,
    /// Percent; applied to MAPE over the last 24 h of validations.
    pub mape_warning: f64,
    pub mape_degraded: f64,
    /// Minimum acceptable empirical coverage over the last 24 h.
    pub coverage_warning: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            quality_window_hours: 168,
            data_quality_warning: 0.95,
            data_quality_degraded: 0.80,
            freshness_warning_hours: 3.0,
            freshness_critical_hours: 24.0,
            model_max_age_hours: 168.0,
            mape_warning: 15.0,
            mape_degraded: 30.0,
            coverage_warning: 0.80,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.quality_window_hours == 0 {
            return Err("quality_window_hours must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.data_quality_degraded)
            || !(0.0..=1.0).contains(&self.data_quality_warning)
            || self.data_quality_degraded > self.data_quality_warning
        {
            return Err("data quality thresholds must satisfy 0 <= degraded <= warning <= 1".into());
        }
        if self.freshness_warning_hours > self.freshness_critical_hours {
            return Err("freshness_warning_hours must not exceed freshness_critical_hours".into());
        }
        if self.mape_warning > self.mape_degraded {
            return Err("mape_warning must not exceed mape_degraded".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
    Error,
}

impl From<Option<AlertSeverity>> for HealthStatus {
    fn from(worst: Option<AlertSeverity>) -> Self {
        match worst {
            None => Self::Healthy,
            Some(AlertSeverity::Warning) => Self::Warning,
            Some(AlertSeverity::Degraded) => Self::Degraded,
            Some(AlertSeverity::Critical) => Self::Error,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Degraded => write!(f, "degraded"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub message: String,
    pub metric: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub records: usize,
    pub latest_record: Option<DateTime<Utc>>,
    pub data_age_hours: Option<f64>,
    pub data_quality_score: f64,
    pub model_version: Option<ModelVersion>,
    pub model_trained_at: Option<DateTime<Utc>>,
    pub model_age_hours: Option<f64>,
    /// Holdout metrics of the latest model.
    pub model_rmse: Option<f64>,
    pub model_mae: Option<f64>,
    pub model_r_squared: Option<f64>,
    pub predictions_24h: usize,
    /// Live accuracy over validations from the last 24 h.
    pub recent_accuracy: ValidationSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub metrics: HealthMetrics,
    pub alerts: Vec<Alert>,
}

fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_seconds() as f64 / 3600.0
}

/// Share of the trailing `window` expected hours, ending at the latest
/// record, that are present and well-formed.
fn data_quality(state: &PipelineState, window: usize) -> f64 {
    let records = state.series.snapshot();
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        return 0.0;
    };
    let span = (last.timestamp - first.timestamp).num_hours() as usize + 1;
    let expected = span.min(window);
    let from = last.timestamp - Duration::hours(expected as i64 - 1);
    let good = records
        .iter()
        .rev()
        .take_while(|r| r.timestamp >= from)
        .filter(|r| !r.is_malformed())
        .count();
    good as f64 / expected as f64
}

/// Collect metrics and raise alerts against `config`.
pub fn assess(state: &PipelineState, config: &HealthConfig, now: DateTime<Utc>) -> SystemHealth {
    let mut metrics = HealthMetrics {
        records: state.series.len(),
        data_quality_score: data_quality(state, config.quality_window_hours),
        ..HealthMetrics::default()
    };
    let mut alerts = Vec::new();
    let mut alert = |severity, metric: &str, message: String| {
        alerts.push(Alert {
            severity,
            message,
            metric: metric.to_string(),
        })
    };

    match state.series.latest() {
        None => alert(AlertSeverity::Critical, "records", "no market data".into()),
        Some(latest) => {
            let age = hours_between(latest.timestamp, now);
            metrics.latest_record = Some(latest.timestamp);
            metrics.data_age_hours = Some(age);
            if age > config.freshness_critical_hours {
                alert(
                    AlertSeverity::Critical,
                    "data_age_hours",
                    format!("latest record is {age:.1}h old"),
                );
            } else if age > config.freshness_warning_hours {
                alert(
                    AlertSeverity::Warning,
                    "data_age_hours",
                    format!("latest record is {age:.1}h old"),
                );
            }

            let q = metrics.data_quality_score;
            if q < config.data_quality_degraded {
                alert(
                    AlertSeverity::Degraded,
                    "data_quality_score",
                    format!("data quality {q:.2} below {}", config.data_quality_degraded),
                );
            } else if q < config.data_quality_warning {
                alert(
                    AlertSeverity::Warning,
                    "data_quality_score",
                    format!("data quality {q:.2} below {}", config.data_quality_warning),
                );
            }
        }
    }

    match state.registry.latest() {
        None => alert(AlertSeverity::Critical, "model_version", "no trained model".into()),
        Some(model) => {
            let age = hours_between(model.trained_at, now);
            metrics.model_version = Some(model.version);
            metrics.model_trained_at = Some(model.trained_at);
            metrics.model_age_hours = Some(age);
            metrics.model_rmse = Some(model.performance.rmse);
            metrics.model_mae = Some(model.performance.mae);
            metrics.model_r_squared = model.performance.r_squared;
            if age > config.model_max_age_hours {
                alert(
                    AlertSeverity::Warning,
                    "model_age_hours",
                    format!("model {} is {age:.0}h old", model.version),
                );
            }
        }
    }

    let day_ago = now - Duration::hours(24);
    metrics.predictions_24h = state.predictions.issued_since(day_ago).len();
    if metrics.predictions_24h == 0 && metrics.model_version.is_some() {
        alert(
            AlertSeverity::Warning,
            "predictions_24h",
            "no predictions issued in the last 24h".into(),
        );
    }

    let recent = ValidationSummary::from_results(&state.validations.validated_since(day_ago));
    if let Some(mape) = recent.mape {
        if mape > config.mape_degraded {
            alert(
                AlertSeverity::Degraded,
                "mape",
                format!("MAPE {mape:.1}% above {}%", config.mape_degraded),
            );
        } else if mape > config.mape_warning {
            alert(
                AlertSeverity::Warning,
                "mape",
                format!("MAPE {mape:.1}% above {}%", config.mape_warning),
            );
        }
    }
    if let Some(coverage) = recent.within_confidence_interval {
        if coverage < config.coverage_warning {
            alert(
                AlertSeverity::Warning,
                "within_confidence_interval",
                format!("interval coverage {coverage:.2} below {}", config.coverage_warning),
            );
        }
    }
    metrics.recent_accuracy = recent;

    let status = HealthStatus::from(alerts.iter().map(|a| a.severity).max());
    SystemHealth {
        status,
        checked_at: now,
        metrics,
        alerts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pricecast_core::domain::RawRecord;

    fn hour(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn state_with(hours: impl Iterator<Item = i64>) -> PipelineState {
        let state = PipelineState::default();
        state
            .series
            .upsert(hours.map(|h| RawRecord::market(hour(h), 50.0, "market")));
        state
    }

    #[test]
    fn empty_state_is_error() {
        let health = assess(&PipelineState::default(), &HealthConfig::default(), hour(0));
        assert_eq!(health.status, HealthStatus::Error);
        assert_eq!(health.metrics.data_quality_score, 0.0);
        assert!(health.alerts.iter().any(|a| a.metric == "records"));
    }

    #[test]
    fn gaps_lower_data_quality() {
        // 168 expected hours, every 4th missing
        let state = state_with((0..168).filter(|h| h % 4 != 0));
        let health = assess(&state, &HealthConfig::default(), hour(168));
        // first present hour is 1, so the span is 167 hours
        assert!((health.metrics.data_quality_score - 126.0 / 167.0).abs() < 1e-12);
        assert!(health
            .alerts
            .iter()
            .any(|a| a.metric == "data_quality_score" && a.severity == AlertSeverity::Degraded));
    }

    #[test]
    fn stale_data_is_critical() {
        let state = state_with(0..48);
        let health = assess(&state, &HealthConfig::default(), hour(100));
        let age = health
            .alerts
            .iter()
            .find(|a| a.metric == "data_age_hours")
            .unwrap();
        assert_eq!(age.severity, AlertSeverity::Critical);
        assert_eq!(health.status, HealthStatus::Error);
    }

    #[test]
    fn status_follows_worst_severity() {
        assert_eq!(HealthStatus::from(None), HealthStatus::Healthy);
        assert_eq!(
            HealthStatus::from(Some(AlertSeverity::Degraded)),
            HealthStatus::Degraded
        );
        assert!(AlertSeverity::Critical > AlertSeverity::Warning);
        assert_eq!(HealthStatus::Warning.to_string(), "warning");
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let cfg = HealthConfig {
            mape_warning: 40.0,
            ..HealthConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}

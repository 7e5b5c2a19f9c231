//! Append-only prediction and validation logs.
//!
//! Both logs deduplicate by prediction id, so re-running a prediction or a
//! validation pass after a partial failure never produces duplicates.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashSet;

use crate::domain::{Prediction, PredictionId, ValidationResult};

#[derive(Debug, Default)]
struct PredictionInner {
    predictions: Vec<Prediction>,
    ids: HashSet<PredictionId>,
}

#[derive(Debug, Default)]
pub struct PredictionLog {
    inner: RwLock<PredictionInner>,
}

impl PredictionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(predictions: Vec<Prediction>) -> Self {
        let log = Self::new();
        log.append(predictions);
        log
    }

    /// Append predictions not seen before. Returns how many were new.
    pub fn append(&self, predictions: impl IntoIterator<Item = Prediction>) -> usize {
        let mut inner = self.inner.write();
        let mut added = 0;
        for p in predictions {
            if inner.ids.insert(p.id.clone()) {
                inner.predictions.push(p);
                added += 1;
            }
        }
        added
    }

    pub fn all(&self) -> Vec<Prediction> {
        self.inner.read().predictions.clone()
    }

    /// Predictions issued at or after `since`.
    pub fn issued_since(&self, since: DateTime<Utc>) -> Vec<Prediction> {
        self.inner
            .read()
            .predictions
            .iter()
            .filter(|p| p.issued_at >= since)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().predictions.is_empty()
    }
}

#[derive(Debug, Default)]
struct ValidationInner {
    results: Vec<ValidationResult>,
    ids: HashSet<PredictionId>,
}

#[derive(Debug, Default)]
pub struct ValidationLog {
    inner: RwLock<ValidationInner>,
}

impl ValidationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(results: Vec<ValidationResult>) -> Self {
        let log = Self::new();
        log.append(results);
        log
    }

    pub fn contains(&self, id: &PredictionId) -> bool {
        self.inner.read().ids.contains(id)
    }

    /// Append results for predictions not validated before; returns the accepted ones.
    pub fn append(
        &self,
        results: impl IntoIterator<Item = ValidationResult>,
    ) -> Vec<ValidationResult> {
        let mut inner = self.inner.write();
        let mut accepted = Vec::new();
        for r in results {
            if inner.ids.insert(r.prediction_id.clone()) {
                inner.results.push(r.clone());
                accepted.push(r);
            }
        }
        accepted
    }

    pub fn all(&self) -> Vec<ValidationResult> {
        self.inner.read().results.clone()
    }

    /// Results validated at or after `since`.
    pub fn validated_since(&self, since: DateTime<Utc>) -> Vec<ValidationResult> {
        self.inner
            .read()
            .results
            .iter()
            .filter(|r| r.validated_at >= since)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().results.is_empty()
    }
}

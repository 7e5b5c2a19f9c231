//! Hourly market observations, raw and stored.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::RecordId;

/// Derived calendar field: hour of the record's UTC timestamp (0-23).
pub const HOUR_OF_DAY: &str = "hour_of_day";
/// Derived calendar field: weekday of the record's UTC timestamp (Monday = 0).
pub const DAY_OF_WEEK: &str = "day_of_week";

/// Hourly market record as held by the time series store.
///
/// `revision` starts at 0 and is bumped by the store whenever an upsert
/// actually changes a value. Feature vectors remember the revision they were
/// computed from, which is how staleness is detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRecord {
    pub id: RecordId,
    pub timestamp: DateTime<Utc>,
    pub target_value: f64,
    #[serde(default)]
    pub exogenous: BTreeMap<String, f64>,
    #[serde(default)]
    pub revision: u32,
}

impl TimeSeriesRecord {
    /// Resolve a named field: exogenous values plus the derived calendar fields.
    pub fn field(&self, name: &str) -> Option<f64> {
        match name {
            HOUR_OF_DAY => Some(self.timestamp.hour() as f64),
            DAY_OF_WEEK => Some(self.timestamp.weekday().num_days_from_monday() as f64),
            _ => self.exogenous.get(name).copied(),
        }
    }

    /// Target value if it is usable (finite), else `None`.
    pub fn target(&self) -> Option<f64> {
        self.target_value.is_finite().then_some(self.target_value)
    }

    /// A record is malformed when its target or any exogenous value is non-finite.
    pub fn is_malformed(&self) -> bool {
        !self.target_value.is_finite() || self.exogenous.values().any(|v| !v.is_finite())
    }

    pub fn hour_of_day(&self) -> u32 {
        self.timestamp.hour()
    }
}

/// Record as delivered by an upstream source, before it enters the store.
///
/// Enrichment sources (weather, gas) deliver exogenous fields only and leave
/// `target_value` empty; they can update existing hours but never create one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub timestamp: DateTime<Utc>,
    pub target_value: Option<f64>,
    #[serde(default)]
    pub exogenous: BTreeMap<String, f64>,
    pub source: String,
}

impl RawRecord {
    pub fn market(timestamp: DateTime<Utc>, price: f64, source: impl Into<String>) -> Self {
        Self {
            timestamp,
            target_value: Some(price),
            exogenous: BTreeMap::new(),
            source: source.into(),
        }
    }

    pub fn enrichment(timestamp: DateTime<Utc>, source: impl Into<String>) -> Self {
        Self {
            timestamp,
            target_value: None,
            exogenous: BTreeMap::new(),
            source: source.into(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: f64) -> Self {
        self.exogenous.insert(name.into(), value);
        self
    }
}

/// Truncate a timestamp to the top of its UTC hour.
pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

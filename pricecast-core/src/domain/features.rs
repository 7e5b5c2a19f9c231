//! Derived, recomputable features for one record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::RecordId;

pub fn lag_name(hours: usize) -> String {
    format!("lag_{hours}h")
}

pub fn momentum_name(hours: usize) -> String {
    format!("momentum_{hours}h")
}

pub fn rolling_avg_name(window: usize) -> String {
    format!("rolling_avg_{window}h")
}

pub fn rolling_std_name(window: usize) -> String {
    format!("rolling_std_{window}h")
}

/// Name of the record's own target value as a model input.
pub const CURRENT: &str = "current";

/// Features for the record at index `i`.
///
/// Every lag/rolling/momentum entry referencing index `i - k` is `None` when
/// fewer than `k` usable prior records exist. `current` is the record's own
/// target; it is only ever used to forecast *later* hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub record_id: RecordId,
    pub timestamp: DateTime<Utc>,
    pub record_revision: u32,
    /// Digest of the ids and revisions of the records this vector was
    /// computed from (the record itself plus its lookback window).
    #[serde(default)]
    pub lineage: u64,
    pub current: f64,
    pub lags: BTreeMap<usize, Option<f64>>,
    pub rolling_window: usize,
    pub rolling_avg: Option<f64>,
    pub rolling_std: Option<f64>,
    pub momentum: BTreeMap<usize, Option<f64>>,
    pub interactions: BTreeMap<String, Option<f64>>,
}

impl FeatureVector {
    pub fn lag(&self, hours: usize) -> Option<f64> {
        self.lags.get(&hours).copied().flatten()
    }

    pub fn momentum(&self, hours: usize) -> Option<f64> {
        self.momentum.get(&hours).copied().flatten()
    }

    pub fn interaction(&self, name: &str) -> Option<f64> {
        self.interactions.get(name).copied().flatten()
    }

    /// Resolve a feature by its canonical name (`lag_24h`, `rolling_std_24h`, ...).
    ///
    /// Returns `None` both for unknown names and for null values.
    pub fn get(&self, name: &str) -> Option<f64> {
        if name == CURRENT {
            return Some(self.current);
        }
        if let Some(hours) = parse_hours(name, "lag_") {
            return self.lag(hours);
        }
        if let Some(hours) = parse_hours(name, "momentum_") {
            return self.momentum(hours);
        }
        if let Some(window) = parse_hours(name, "rolling_avg_") {
            return (window == self.rolling_window).then_some(self.rolling_avg).flatten();
        }
        if let Some(window) = parse_hours(name, "rolling_std_") {
            return (window == self.rolling_window).then_some(self.rolling_std).flatten();
        }
        self.interaction(name)
    }

    /// Every feature name this vector carries, in a stable order.
    pub fn names(&self) -> Vec<String> {
        let mut names = vec![CURRENT.to_string()];
        names.extend(self.lags.keys().map(|h| lag_name(*h)));
        names.push(rolling_avg_name(self.rolling_window));
        names.push(rolling_std_name(self.rolling_window));
        names.extend(self.momentum.keys().map(|h| momentum_name(*h)));
        names.extend(self.interactions.keys().cloned());
        names
    }

    /// Names from `required` whose values are null (or unknown) in this vector.
    pub fn missing(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|name| self.get(name).is_none())
            .cloned()
            .collect()
    }

    pub fn is_complete(&self, required: &[String]) -> bool {
        required.iter().all(|name| self.get(name).is_some())
    }
}

fn parse_hours(name: &str, prefix: &str) -> Option<usize> {
    name.strip_prefix(prefix)?.strip_suffix('h')?.parse().ok()
}

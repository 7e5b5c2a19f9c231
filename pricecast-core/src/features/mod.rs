//! Feature Engine — derives lag, rolling, momentum and interaction features.
//!
//! The engine works by index arithmetic over a point-in-time snapshot of the
//! time series store. A refresh recomputes from the first record whose vector
//! is missing or stale, and upserts only the vectors that actually changed, in
//! bounded batches. Re-running a refresh over an unchanged series writes nothing.

pub mod column;
pub mod interaction;

pub use column::{FeatureColumn, Lag, Momentum, RollingMean, RollingStd};
pub use interaction::InteractionPair;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{
    lag_name, momentum_name, rolling_avg_name, rolling_std_name, FeatureVector, RecordId,
    TimeSeriesRecord, CURRENT,
};
use crate::store::{FeatureStore, TimeSeriesStore};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeatureError {
    #[error("invalid feature config: {field} {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> FeatureError {
    FeatureError::InvalidConfig {
        field,
        reason: reason.into(),
    }
}

// ─── Configuration ──────────────────────────────────────────────────

/// Feature Engine tunables (`[features]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub lags: Vec<usize>,
    pub rolling_window: usize,
    pub momentum: Vec<usize>,
    pub interactions: Vec<InteractionPair>,
    pub batch_size: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lags: vec![1, 2, 3, 24],
            rolling_window: 24,
            momentum: vec![1, 3],
            interactions: vec![
                InteractionPair::new("wind_generation", "hour_of_day"),
                InteractionPair::new("temperature", "demand"),
            ],
            batch_size: 1000,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<(), FeatureError> {
        if self.lags.is_empty() {
            return Err(invalid("lags", "must not be empty"));
        }
        if self.lags.contains(&0) {
            return Err(invalid("lags", "must be at least 1 hour"));
        }
        if self.momentum.contains(&0) {
            return Err(invalid("momentum", "must be at least 1 hour"));
        }
        if self.rolling_window < 2 {
            return Err(invalid("rolling_window", "must be at least 2"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be positive"));
        }
        if let Some(pair) = self
            .interactions
            .iter()
            .find(|p| p.left.is_empty() || p.right.is_empty())
        {
            return Err(invalid(
                "interactions",
                format!("empty field name in {pair:?}"),
            ));
        }
        Ok(())
    }
}

// ─── Report ─────────────────────────────────────────────────────────

/// Outcome of one refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureReport {
    /// Records in the snapshot.
    pub scanned: usize,
    /// Vectors recomputed (from the first missing/stale index onward).
    pub computed: usize,
    /// Vectors upserted because they differed from the stored ones.
    pub written: usize,
    pub unchanged: usize,
    pub skipped_malformed: usize,
    /// Malformed records this engine had not reported before.
    pub newly_malformed: usize,
    /// Stored vectors dropped because their record became malformed.
    pub removed: usize,
    pub batches: usize,
}

// ─── Engine ─────────────────────────────────────────────────────────

pub struct FeatureEngine {
    config: FeatureConfig,
    lookback: usize,
    lags: Vec<Lag>,
    rolling_avg: RollingMean,
    rolling_std: RollingStd,
    momentum: Vec<(usize, Momentum)>,
    /// Malformed `(record, revision)` pairs already warned about.
    reported_malformed: Mutex<HashSet<(RecordId, u32)>>,
}

impl FeatureEngine {
    pub fn new(config: FeatureConfig) -> Result<Self, FeatureError> {
        config.validate()?;
        let mut lag_hours = config.lags.clone();
        lag_hours.sort_unstable();
        lag_hours.dedup();
        let mut momentum_hours = config.momentum.clone();
        momentum_hours.sort_unstable();
        momentum_hours.dedup();

        let lookback = lag_hours
            .iter()
            .chain(momentum_hours.iter())
            .copied()
            .chain([config.rolling_window])
            .max()
            .unwrap_or(0);

        Ok(Self {
            lookback,
            lags: lag_hours.into_iter().map(Lag::new).collect(),
            rolling_avg: RollingMean::new(config.rolling_window),
            rolling_std: RollingStd::new(config.rolling_window),
            momentum: momentum_hours
                .into_iter()
                .map(|h| (h, Momentum::new(h)))
                .collect(),
            reported_malformed: Mutex::new(HashSet::new()),
            config,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Names that must be non-null before a vector can be used for forecasting.
    ///
    /// Interaction terms are excluded: they depend on supplementary sources
    /// whose absence only reduces feature richness.
    pub fn required_inputs(&self) -> Vec<String> {
        let mut names = vec![CURRENT.to_string()];
        names.extend(self.lags.iter().map(|l| lag_name(l.hours())));
        names.push(rolling_avg_name(self.config.rolling_window));
        names.push(rolling_std_name(self.config.rolling_window));
        names.extend(self.momentum.iter().map(|(h, _)| momentum_name(*h)));
        names
    }

    /// Largest history any column needs.
    pub fn max_lookback(&self) -> usize {
        self.lookback
    }

    fn lineage(&self, records: &[TimeSeriesRecord], i: usize) -> u64 {
        lineage(records, i, self.lookback)
    }

    /// Compute vectors for every well-formed record of `records`.
    pub fn compute_all(&self, records: &[TimeSeriesRecord]) -> Vec<FeatureVector> {
        self.compute_range(records, 0)
    }

    /// Compute vectors for well-formed records at indices `start..`.
    ///
    /// Windows still read records before `start`.
    pub fn compute_range(&self, records: &[TimeSeriesRecord], start: usize) -> Vec<FeatureVector> {
        let series = target_series(records);
        records
            .iter()
            .enumerate()
            .skip(start)
            .filter(|(_, r)| !r.is_malformed())
            .map(|(i, r)| self.vector_at(records, &series, i, r))
            .collect()
    }

    fn vector_at(
        &self,
        records: &[TimeSeriesRecord],
        series: &[Option<f64>],
        i: usize,
        record: &TimeSeriesRecord,
    ) -> FeatureVector {
        FeatureVector {
            record_id: record.id,
            timestamp: record.timestamp,
            record_revision: record.revision,
            lineage: self.lineage(records, i),
            current: record.target_value,
            lags: self
                .lags
                .iter()
                .map(|l| (l.hours(), l.compute_at(series, i)))
                .collect(),
            rolling_window: self.config.rolling_window,
            rolling_avg: self.rolling_avg.compute_at(series, i),
            rolling_std: self.rolling_std.compute_at(series, i),
            momentum: self
                .momentum
                .iter()
                .map(|(h, m)| (*h, m.compute_at(series, i)))
                .collect(),
            interactions: self
                .config
                .interactions
                .iter()
                .map(|p| (p.name(), p.compute(record)))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    /// A stored vector is current when it was computed from the present
    /// window of records with this engine's column layout.
    fn is_current(&self, stored: &FeatureVector, records: &[TimeSeriesRecord], i: usize) -> bool {
        stored.record_revision == records[i].revision
            && stored.lineage == self.lineage(records, i)
            && stored.rolling_window == self.config.rolling_window
            && stored.lags.keys().copied().eq(self.lags.iter().map(|l| l.hours()))
            && stored.momentum.keys().copied().eq(self.momentum.iter().map(|(h, _)| *h))
            && stored.interactions.len() == self.config.interactions.len()
            && self
                .config
                .interactions
                .iter()
                .all(|p| stored.interactions.contains_key(&p.name()))
    }

    /// Index of the first record whose vector must be recomputed, if any.
    fn first_stale(
        &self,
        records: &[TimeSeriesRecord],
        stored: &HashMap<RecordId, FeatureVector>,
    ) -> Option<usize> {
        (0..records.len()).find(|&i| {
            let r = &records[i];
            match stored.get(&r.id) {
                Some(_) if r.is_malformed() => true,
                Some(fv) => !self.is_current(fv, records, i),
                None => !r.is_malformed(),
            }
        })
    }

    /// Bring the feature store up to date with the time series store.
    pub fn refresh(&self, series: &TimeSeriesStore, features: &FeatureStore) -> FeatureReport {
        let records = series.snapshot();
        let stored = features.snapshot();
        let mut report = FeatureReport {
            scanned: records.len(),
            ..FeatureReport::default()
        };

        {
            let mut seen = self.reported_malformed.lock();
            for record in records.iter().filter(|r| r.is_malformed()) {
                report.skipped_malformed += 1;
                if seen.insert((record.id, record.revision)) {
                    report.newly_malformed += 1;
                    warn!(
                        record_id = %record.id,
                        timestamp = %record.timestamp,
                        "skipping malformed record"
                    );
                }
            }
        }
        if report.skipped_malformed > report.newly_malformed {
            debug!(
                repeated = report.skipped_malformed - report.newly_malformed,
                "malformed records already reported"
            );
        }

        let first_stale = self.first_stale(&records, &stored);
        let Some(start) = first_stale else {
            debug!(records = records.len(), "features already current");
            report.unchanged = stored.len();
            return report;
        };

        let orphaned: Vec<RecordId> = records[start..]
            .iter()
            .filter(|r| r.is_malformed() && stored.contains_key(&r.id))
            .map(|r| r.id)
            .collect();
        if !orphaned.is_empty() {
            report.removed = features.remove(&orphaned);
        }

        let computed = self.compute_range(&records, start);
        report.computed = computed.len();

        let mut pending = Vec::with_capacity(self.config.batch_size.min(computed.len()));
        for fv in computed {
            if stored.get(&fv.record_id) == Some(&fv) {
                report.unchanged += 1;
                continue;
            }
            pending.push(fv);
            if pending.len() == self.config.batch_size {
                report.written += features.upsert_batch(std::mem::take(&mut pending));
                report.batches += 1;
            }
        }
        if !pending.is_empty() {
            report.written += features.upsert_batch(pending);
            report.batches += 1;
        }

        info!(
            start,
            scanned = report.scanned,
            computed = report.computed,
            written = report.written,
            batches = report.batches,
            "feature refresh complete"
        );
        report
    }
}

/// Digest of the records a vector at `i` reads: ids and revisions of
/// `i - lookback ..= i`. Backfills and revisions inside the window change it.
pub fn lineage(records: &[TimeSeriesRecord], i: usize, lookback: usize) -> u64 {
    let from = i.saturating_sub(lookback);
    let mut hasher = blake3::Hasher::new();
    for r in &records[from..=i] {
        hasher.update(&r.id.0.to_le_bytes());
        hasher.update(&r.revision.to_le_bytes());
    }
    let mut head = [0u8; 8];
    head.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
    u64::from_le_bytes(head)
}

/// Target values by index; malformed records contribute `None`.
fn target_series(records: &[TimeSeriesRecord]) -> Vec<Option<f64>> {
    records
        .iter()
        .map(|r| (!r.is_malformed()).then_some(r.target_value))
        .collect()
}

//! Append-only hourly time series store.
//!
//! Records are kept sorted by timestamp in a single indexed sequence; feature
//! computation works by index arithmetic over a snapshot of that sequence.
//! Duplicate timestamps are merged (upsert), never duplicated.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

use crate::domain::{truncate_to_hour, RawRecord, RecordId, TimeSeriesRecord};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("duplicate record id {0} in restored series")]
    DuplicateId(RecordId),
    #[error("duplicate timestamp {0} in restored series")]
    DuplicateTimestamp(DateTime<Utc>),
}

/// Outcome of one upsert batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Enrichment rows for hours that have no market record yet.
    pub orphaned: usize,
}

#[derive(Debug, Default)]
struct SeriesInner {
    records: Vec<TimeSeriesRecord>,
    timestamps: HashMap<RecordId, DateTime<Utc>>,
    next_id: u64,
}

impl SeriesInner {
    fn position(&self, ts: DateTime<Utc>) -> Result<usize, usize> {
        self.records.binary_search_by_key(&ts, |r| r.timestamp)
    }
}

/// Shared, internally synchronised time series store.
#[derive(Debug, Default)]
pub struct TimeSeriesStore {
    inner: RwLock<SeriesInner>,
}

impl TimeSeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from previously persisted records, keeping ids and revisions.
    pub fn restore(mut records: Vec<TimeSeriesRecord>) -> Result<Self, StoreError> {
        records.sort_by_key(|r| r.timestamp);
        if let Some(pair) = records.windows(2).find(|w| w[0].timestamp == w[1].timestamp) {
            return Err(StoreError::DuplicateTimestamp(pair[1].timestamp));
        }
        let mut seen = HashSet::with_capacity(records.len());
        if let Some(dup) = records.iter().find(|r| !seen.insert(r.id)) {
            return Err(StoreError::DuplicateId(dup.id));
        }
        let next_id = records.iter().map(|r| r.id.0 + 1).max().unwrap_or(0);
        let timestamps = records.iter().map(|r| (r.id, r.timestamp)).collect();
        Ok(Self {
            inner: RwLock::new(SeriesInner {
                records,
                timestamps,
                next_id,
            }),
        })
    }

    /// Insert or merge a batch of raw records.
    ///
    /// Timestamps are truncated to the hour. An existing hour keeps its id;
    /// provided values overwrite stored ones and the revision is bumped only
    /// when something actually changed, so replaying a batch is a no-op.
    pub fn upsert<I>(&self, batch: I) -> UpsertReport
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut report = UpsertReport::default();
        let mut inner = self.inner.write();

        for raw in batch {
            let ts = truncate_to_hour(raw.timestamp);
            match inner.position(ts) {
                Ok(idx) => {
                    if merge_into(&mut inner.records[idx], &raw) {
                        report.updated += 1;
                    } else {
                        report.unchanged += 1;
                    }
                }
                Err(idx) => {
                    let Some(target_value) = raw.target_value else {
                        debug!(timestamp = %ts, source = %raw.source, "no market record for enrichment row");
                        report.orphaned += 1;
                        continue;
                    };
                    let id = RecordId(inner.next_id);
                    inner.next_id += 1;
                    inner.timestamps.insert(id, ts);
                    inner.records.insert(
                        idx,
                        TimeSeriesRecord {
                            id,
                            timestamp: ts,
                            target_value,
                            exogenous: raw.exogenous,
                            revision: 0,
                        },
                    );
                    report.inserted += 1;
                }
            }
        }

        report
    }

    /// Point-in-time copy of the whole series, ordered by timestamp.
    pub fn snapshot(&self) -> Vec<TimeSeriesRecord> {
        self.inner.read().records.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    pub fn latest(&self) -> Option<TimeSeriesRecord> {
        self.inner.read().records.last().cloned()
    }

    pub fn get(&self, id: RecordId) -> Option<TimeSeriesRecord> {
        let inner = self.inner.read();
        let ts = *inner.timestamps.get(&id)?;
        let idx = inner.position(ts).ok()?;
        inner.records.get(idx).cloned()
    }

    /// Position of the record at `ts` in the ordered sequence.
    pub fn index_of(&self, ts: DateTime<Utc>) -> Option<usize> {
        self.inner.read().position(truncate_to_hour(ts)).ok()
    }

    pub fn at(&self, ts: DateTime<Utc>) -> Option<TimeSeriesRecord> {
        let inner = self.inner.read();
        let idx = inner.position(ts).ok()?;
        inner.records.get(idx).cloned()
    }

    /// First usable actual at `ts` or within `tolerance` after it.
    pub fn find_actual(&self, ts: DateTime<Utc>, tolerance: Duration) -> Option<TimeSeriesRecord> {
        let inner = self.inner.read();
        let start = inner.records.partition_point(|r| r.timestamp < ts);
        inner.records[start..]
            .iter()
            .take_while(|r| r.timestamp <= ts + tolerance)
            .find(|r| r.target().is_some())
            .cloned()
    }
}

fn merge_into(existing: &mut TimeSeriesRecord, raw: &RawRecord) -> bool {
    let mut changed = false;
    if let Some(value) = raw.target_value {
        if value.to_bits() != existing.target_value.to_bits() {
            existing.target_value = value;
            changed = true;
        }
    }
    for (name, value) in &raw.exogenous {
        let same = existing
            .exogenous
            .get(name)
            .is_some_and(|old| old.to_bits() == value.to_bits());
        if !same {
            existing.exogenous.insert(name.clone(), *value);
            changed = true;
        }
    }
    if changed {
        existing.revision += 1;
    }
    changed
}

/// Deterministic BLAKE3 hash over timestamps and values of a snapshot.
pub fn dataset_hash(records: &[TimeSeriesRecord]) -> String {
    let mut hasher = blake3::Hasher::new();
    for record in records {
        hasher.update(&record.timestamp.timestamp().to_le_bytes());
        hasher.update(&record.target_value.to_le_bytes());
        for (name, value) in &record.exogenous {
            hasher.update(name.as_bytes());
            hasher.update(&value.to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

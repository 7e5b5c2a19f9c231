//! Ingestion boundary: canonicalize source batches and upsert them.
//!
//! Canonical form: timestamps truncated to the UTC hour, sorted, one record
//! per `(timestamp, source)`. Re-ingesting a batch is an idempotent upsert.

use serde::{Deserialize, Serialize};
use tracing::info;

use pricecast_core::domain::{truncate_to_hour, RawRecord};
use pricecast_core::store::TimeSeriesStore;

use crate::sources::{RecordSource, SourceError};

/// Outcome of ingesting one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub source: String,
    pub fetched: usize,
    pub malformed: usize,
    /// Records dropped because a later one had the same `(timestamp, source)`.
    pub duplicates: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Enrichment rows for hours with no market record.
    pub orphaned: usize,
}

/// Sort and dedupe by `(timestamp, source)`; the last delivered record wins.
///
/// Returns the canonical records and the number of duplicates dropped.
pub fn canonicalize(records: Vec<RawRecord>) -> (Vec<RawRecord>, usize) {
    let total = records.len();
    let mut records: Vec<RawRecord> = records
        .into_iter()
        .map(|mut r| {
            r.timestamp = truncate_to_hour(r.timestamp);
            r
        })
        .collect();

    // stable sort keeps delivery order inside each key
    records.sort_by(|a, b| (a.timestamp, &a.source).cmp(&(b.timestamp, &b.source)));

    let mut out: Vec<RawRecord> = Vec::with_capacity(records.len());
    for r in records {
        match out.last_mut() {
            Some(last) if last.timestamp == r.timestamp && last.source == r.source => *last = r,
            _ => out.push(r),
        }
    }
    let duplicates = total - out.len();
    (out, duplicates)
}

/// Fetch from `source`, canonicalize, and upsert into `store`.
pub fn ingest(source: &dyn RecordSource, store: &TimeSeriesStore) -> Result<IngestReport, SourceError> {
    let batch = source.fetch()?;
    let fetched = batch.records.len();
    let (records, duplicates) = canonicalize(batch.records);
    let upsert = store.upsert(records);

    let report = IngestReport {
        source: source.name().to_string(),
        fetched,
        malformed: batch.malformed,
        duplicates,
        inserted: upsert.inserted,
        updated: upsert.updated,
        unchanged: upsert.unchanged,
        orphaned: upsert.orphaned,
    };
    info!(
        source = %report.source,
        fetched = report.fetched,
        inserted = report.inserted,
        updated = report.updated,
        duplicates = report.duplicates,
        malformed = report.malformed,
        "source ingested"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MemorySource;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(h: i64, minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
            + Duration::hours(h)
            + Duration::minutes(minute)
    }

    #[test]
    fn canonicalize_dedupes_by_hour_and_source() {
        let records = vec![
            RawRecord::market(t(1, 0), 10.0, "market"),
            RawRecord::market(t(0, 15), 1.0, "market"),
            RawRecord::market(t(0, 45), 2.0, "market"),
            RawRecord::enrichment(t(0, 0), "weather").with_field("temperature", 3.0),
        ];
        let (out, dups) = canonicalize(records);

        assert_eq!(dups, 1);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].timestamp, t(0, 0));
        assert_eq!(out[0].source, "market");
        // last delivered wins
        assert_eq!(out[0].target_value, Some(2.0));
        assert_eq!(out[1].source, "weather");
        assert_eq!(out[2].timestamp, t(1, 0));
    }

    #[test]
    fn reingest_is_idempotent() {
        let store = TimeSeriesStore::new();
        let market = MemorySource::new(
            "market",
            (0..5).map(|h| RawRecord::market(t(h, 0), 50.0 + h as f64, "market")).collect(),
        );

        let first = ingest(&market, &store).unwrap();
        assert_eq!(first.inserted, 5);

        let again = ingest(&market, &store).unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.unchanged, 5);
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn enrichment_updates_existing_hours_only() {
        let store = TimeSeriesStore::new();
        store.upsert((0..3).map(|h| RawRecord::market(t(h, 0), 40.0, "market")));
        let weather = MemorySource::new(
            "weather",
            (0..5)
                .map(|h| RawRecord::enrichment(t(h, 0), "weather").with_field("temperature", 7.0))
                .collect(),
        );

        let report = ingest(&weather, &store).unwrap();
        assert_eq!(report.updated, 3);
        assert_eq!(report.orphaned, 2);
        assert_eq!(store.len(), 3);
        assert_eq!(store.snapshot()[0].field("temperature"), Some(7.0));
    }
}

//! Upstream record sources.
//!
//! A source delivers already-parsed hourly records into the ingestion
//! boundary. The market source carries the target price; enrichment sources
//! (weather, gas) carry exogenous fields only and can only update hours the
//! market source has already delivered.
//!
//! CSV layout: a timestamp column, the target column (market only), and any
//! number of numeric exogenous columns. Rows that cannot be parsed are skipped
//! with a warning and counted as malformed.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use pricecast_core::domain::RawRecord;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no {0} source configured")]
    NotConfigured(&'static str),

    #[error("source file {path} not found")]
    Missing { path: PathBuf },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },

    #[error("source {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },
}

/// Source file locations and column names (`[sources]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub market_csv: Option<PathBuf>,
    pub weather_csv: Option<PathBuf>,
    pub gas_csv: Option<PathBuf>,
    pub timestamp_column: String,
    pub target_column: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            market_csv: None,
            weather_csv: None,
            gas_csv: None,
            timestamp_column: "timestamp".into(),
            target_column: "price".into(),
        }
    }
}

/// Records delivered by one fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceBatch {
    pub records: Vec<RawRecord>,
    /// Rows the source could not parse and dropped.
    pub malformed: usize,
}

/// A provider of time-stamped records.
pub trait RecordSource: Send + Sync {
    /// Name recorded as the `source` of every delivered record.
    fn name(&self) -> &str;

    fn fetch(&self) -> Result<SourceBatch, SourceError>;
}

// ─── CSV ────────────────────────────────────────────────────────────

/// Whether a CSV file carries the target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    Market,
    Enrichment,
}

pub struct CsvSource {
    name: String,
    path: PathBuf,
    role: SourceRole,
    timestamp_column: String,
    target_column: String,
}

impl CsvSource {
    pub fn market(name: impl Into<String>, path: impl Into<PathBuf>, config: &SourcesConfig) -> Self {
        Self::new(name, path, SourceRole::Market, config)
    }

    pub fn enrichment(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        config: &SourcesConfig,
    ) -> Self {
        Self::new(name, path, SourceRole::Enrichment, config)
    }

    fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        role: SourceRole,
        config: &SourcesConfig,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            role,
            timestamp_column: config.timestamp_column.clone(),
            target_column: config.target_column.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn csv_error(&self, source: csv::Error) -> SourceError {
        SourceError::Csv {
            path: self.path.clone(),
            source,
        }
    }

    fn column(&self, headers: &csv::StringRecord, column: &str) -> Result<usize, SourceError> {
        headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| SourceError::MissingColumn {
                path: self.path.clone(),
                column: column.to_string(),
            })
    }
}

impl RecordSource for CsvSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> Result<SourceBatch, SourceError> {
        if !self.path.exists() {
            return Err(SourceError::Missing {
                path: self.path.clone(),
            });
        }
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| self.csv_error(e))?;
        let headers = reader.headers().map_err(|e| self.csv_error(e))?.clone();

        let ts_col = self.column(&headers, &self.timestamp_column)?;
        let target_col = match self.role {
            SourceRole::Market => Some(self.column(&headers, &self.target_column)?),
            SourceRole::Enrichment => None,
        };

        let mut batch = SourceBatch::default();
        for (line, row) in reader.records().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(source = %self.name, line = line + 2, error = %e, "skipping unreadable row");
                    batch.malformed += 1;
                    continue;
                }
            };
            match parse_row(&row, &headers, ts_col, target_col, &self.name) {
                Some(record) => batch.records.push(record),
                None => {
                    warn!(source = %self.name, line = line + 2, "skipping malformed row");
                    batch.malformed += 1;
                }
            }
        }

        debug!(
            source = %self.name,
            path = %self.path.display(),
            records = batch.records.len(),
            malformed = batch.malformed,
            "csv source read"
        );
        Ok(batch)
    }
}

fn parse_row(
    row: &csv::StringRecord,
    headers: &csv::StringRecord,
    ts_col: usize,
    target_col: Option<usize>,
    source: &str,
) -> Option<RawRecord> {
    let timestamp = parse_timestamp(row.get(ts_col)?)?;
    let mut record = match target_col {
        Some(col) => RawRecord::market(timestamp, row.get(col)?.parse().ok()?, source),
        None => RawRecord::enrichment(timestamp, source),
    };

    for (col, (header, cell)) in headers.iter().zip(row.iter()).enumerate() {
        if col == ts_col || Some(col) == target_col || cell.is_empty() {
            continue;
        }
        record = record.with_field(header, cell.parse().ok()?);
    }
    Some(record)
}

/// Accepts RFC 3339 or naive `YYYY-MM-DD HH:MM[:SS]` (taken as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Write records in the layout [`CsvSource`] reads.
///
/// The target column is written only when `target_column` is given.
pub fn write_csv(
    path: &Path,
    records: &[RawRecord],
    timestamp_column: &str,
    target_column: Option<&str>,
) -> Result<(), SourceError> {
    let csv_error = |source| SourceError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let fields: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.exogenous.keys().map(String::as_str))
        .collect();

    let mut wtr = csv::Writer::from_path(path).map_err(csv_error)?;
    let mut header = vec![timestamp_column];
    header.extend(target_column);
    header.extend(fields.iter().copied());
    wtr.write_record(&header).map_err(csv_error)?;

    for r in records {
        let mut row = vec![r.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)];
        if target_column.is_some() {
            row.push(r.target_value.map(|v| v.to_string()).unwrap_or_default());
        }
        for field in &fields {
            row.push(r.exogenous.get(*field).map(|v| v.to_string()).unwrap_or_default());
        }
        wtr.write_record(&row).map_err(csv_error)?;
    }
    wtr.flush().map_err(|e| csv_error(e.into()))?;
    Ok(())
}

// ─── In-memory ──────────────────────────────────────────────────────

/// Source backed by a fixed list of records, optionally forced to fail.
pub struct MemorySource {
    name: String,
    records: Vec<RawRecord>,
    failure: Option<String>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, records: Vec<RawRecord>) -> Self {
        Self {
            name: name.into(),
            records,
            failure: None,
        }
    }

    pub fn failing(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Vec::new(),
            failure: Some(reason.into()),
        }
    }
}

impl RecordSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> Result<SourceBatch, SourceError> {
        if let Some(reason) = &self.failure {
            return Err(SourceError::Unavailable {
                name: self.name.clone(),
                reason: reason.clone(),
            });
        }
        Ok(SourceBatch {
            records: self.records.clone(),
            malformed: 0,
        })
    }
}

// ─── Source set ─────────────────────────────────────────────────────

/// The sources a pipeline ingests from.
#[derive(Default)]
pub struct SourceSet {
    pub market: Option<Box<dyn RecordSource>>,
    pub weather: Option<Box<dyn RecordSource>>,
    pub gas: Option<Box<dyn RecordSource>>,
}

impl SourceSet {
    pub fn from_config(config: &SourcesConfig) -> Self {
        let boxed = |src: CsvSource| -> Box<dyn RecordSource> { Box::new(src) };
        Self {
            market: config
                .market_csv
                .as_ref()
                .map(|p| boxed(CsvSource::market("market", p, config))),
            weather: config
                .weather_csv
                .as_ref()
                .map(|p| boxed(CsvSource::enrichment("weather", p, config))),
            gas: config
                .gas_csv
                .as_ref()
                .map(|p| boxed(CsvSource::enrichment("gas", p, config))),
        }
    }

    pub fn with_market(mut self, source: impl RecordSource + 'static) -> Self {
        self.market = Some(Box::new(source));
        self
    }

    pub fn with_weather(mut self, source: impl RecordSource + 'static) -> Self {
        self.weather = Some(Box::new(source));
        self
    }

    pub fn with_gas(mut self, source: impl RecordSource + 'static) -> Self {
        self.gas = Some(Box::new(source));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn market_csv_skips_malformed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "market.csv",
            "timestamp,price,demand\n\
             2024-01-01T00:00:00Z,50.5,31000\n\
             not-a-time,51.0,31000\n\
             2024-01-01 02:00,abc,31000\n\
             2024-01-01 03:00:00,52.0,\n",
        );
        let src = CsvSource::market("market", &path, &SourcesConfig::default());
        let batch = src.fetch().unwrap();

        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.malformed, 2);
        assert_eq!(batch.records[0].target_value, Some(50.5));
        assert_eq!(batch.records[0].exogenous.get("demand"), Some(&31000.0));
        // empty cell means the field is absent
        assert!(batch.records[1].exogenous.is_empty());
    }

    #[test]
    fn enrichment_csv_has_no_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "weather.csv",
            "timestamp,temperature,wind_generation\n2024-01-01T05:00:00Z,3.5,4200\n",
        );
        let batch = CsvSource::enrichment("weather", &path, &SourcesConfig::default())
            .fetch()
            .unwrap();
        assert_eq!(batch.records[0].target_value, None);
        assert_eq!(batch.records[0].source, "weather");
        assert_eq!(batch.records[0].exogenous.len(), 2);
    }

    #[test]
    fn missing_file_and_column_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SourcesConfig::default();
        let missing = CsvSource::market("market", dir.path().join("nope.csv"), &cfg);
        assert!(matches!(missing.fetch(), Err(SourceError::Missing { .. })));

        let path = write(&dir, "bad.csv", "time,price\n2024-01-01T00:00:00Z,1\n");
        let src = CsvSource::market("market", &path, &cfg);
        assert!(matches!(
            src.fetch(),
            Err(SourceError::MissingColumn { column, .. }) if column == "timestamp"
        ));
    }

    #[test]
    fn written_csv_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let records = vec![RawRecord::market(ts, 42.25, "market").with_field("demand", 1.5)];
        write_csv(&path, &records, "timestamp", Some("price")).unwrap();

        let back = CsvSource::market("market", &path, &SourcesConfig::default())
            .fetch()
            .unwrap();
        assert_eq!(back.records, records);
    }

    #[test]
    fn memory_source_can_fail() {
        let src = MemorySource::failing("gas", "feed down");
        assert!(matches!(src.fetch(), Err(SourceError::Unavailable { .. })));
    }

    #[test]
    fn parses_naive_timestamps_as_utc() {
        let ts = parse_timestamp("2024-06-01 13:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 6, 1, 13, 0, 0).unwrap());
        assert!(parse_timestamp("yesterday").is_none());
    }
}

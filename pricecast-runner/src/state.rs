//! Pipeline state and its on-disk snapshot.
//!
//! Layout of a state directory:
//! - `records.jsonl`      one TimeSeriesRecord per line
//! - `models.jsonl`       one TrainedModel per line
//! - `predictions.jsonl`  one Prediction per line
//! - `validations.jsonl`  one ValidationResult per line
//! - `ledger.json`        the performance ledger
//!
//! Feature vectors are derived data and are recomputed after loading.
//! Every file is written to a `.tmp` sibling and renamed into place.
//! Loading tolerates missing files and skips malformed lines.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use pricecast_core::store::{
    FeatureStore, PredictionLog, StoreError, TimeSeriesStore, ValidationLog,
};
use pricecast_core::{LedgerSnapshot, ModelRegistry, PerformanceLedger};

pub const RECORDS_FILE: &str = "records.jsonl";
pub const MODELS_FILE: &str = "models.jsonl";
pub const PREDICTIONS_FILE: &str = "predictions.jsonl";
pub const VALIDATIONS_FILE: &str = "validations.jsonl";
pub const LEDGER_FILE: &str = "ledger.json";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("inconsistent records file: {0}")]
    Store(#[from] StoreError),
}

/// Every store a pipeline shares between workflow runs.
#[derive(Debug, Default)]
pub struct PipelineState {
    pub series: TimeSeriesStore,
    pub features: FeatureStore,
    pub registry: ModelRegistry,
    pub predictions: PredictionLog,
    pub validations: ValidationLog,
    pub ledger: PerformanceLedger,
}

impl PipelineState {
    pub fn with_ledger_window(window: usize) -> Self {
        Self {
            ledger: PerformanceLedger::new(window),
            ..Self::default()
        }
    }
}

/// Counts of what a load or save touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub records: usize,
    pub models: usize,
    pub predictions: usize,
    pub validations: usize,
    pub skipped_lines: usize,
}

#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    /// Load a state snapshot. A missing directory yields empty state.
    ///
    /// `ledger_window` applies only when no ledger has been saved yet.
    pub fn load(&self, ledger_window: usize) -> Result<(PipelineState, StateCounts), StateError> {
        let mut counts = StateCounts::default();

        let records = read_jsonl(&self.path(RECORDS_FILE), &mut counts.skipped_lines)?;
        let models = read_jsonl(&self.path(MODELS_FILE), &mut counts.skipped_lines)?;
        let predictions = read_jsonl(&self.path(PREDICTIONS_FILE), &mut counts.skipped_lines)?;
        let validations = read_jsonl(&self.path(VALIDATIONS_FILE), &mut counts.skipped_lines)?;
        counts.records = records.len();
        counts.models = models.len();
        counts.predictions = predictions.len();
        counts.validations = validations.len();

        let ledger = match read_json::<LedgerSnapshot>(&self.path(LEDGER_FILE))? {
            Some(snapshot) => PerformanceLedger::restore(snapshot),
            None => PerformanceLedger::new(ledger_window),
        };

        let state = PipelineState {
            series: TimeSeriesStore::restore(records)?,
            features: FeatureStore::new(),
            registry: ModelRegistry::restore(models),
            predictions: PredictionLog::restore(predictions),
            validations: ValidationLog::restore(validations),
            ledger,
        };
        info!(
            dir = %self.root.display(),
            records = counts.records,
            models = counts.models,
            predictions = counts.predictions,
            validations = counts.validations,
            skipped = counts.skipped_lines,
            "state loaded"
        );
        Ok((state, counts))
    }

    /// Write a full snapshot of `state`.
    pub fn save(&self, state: &PipelineState) -> Result<StateCounts, StateError> {
        fs::create_dir_all(&self.root).map_err(|source| StateError::Io {
            path: self.root.clone(),
            source,
        })?;

        let records = state.series.snapshot();
        let models: Vec<_> = state.registry.all();
        let predictions = state.predictions.all();
        let validations = state.validations.all();

        write_jsonl(&self.path(RECORDS_FILE), "records", &records)?;
        write_jsonl(
            &self.path(MODELS_FILE),
            "models",
            models.iter().map(|m| m.as_ref()),
        )?;
        write_jsonl(&self.path(PREDICTIONS_FILE), "predictions", &predictions)?;
        write_jsonl(&self.path(VALIDATIONS_FILE), "validations", &validations)?;

        let ledger = serde_json::to_vec_pretty(&state.ledger.snapshot()).map_err(|source| {
            StateError::Serialize {
                what: "ledger",
                source,
            }
        })?;
        write_atomic(&self.path(LEDGER_FILE), &ledger)?;

        let counts = StateCounts {
            records: records.len(),
            models: models.len(),
            predictions: predictions.len(),
            validations: validations.len(),
            skipped_lines: 0,
        };
        debug!(dir = %self.root.display(), ?counts, "state saved");
        Ok(counts)
    }
}

// ─── File helpers ───────────────────────────────────────────────────

fn read_jsonl<T: DeserializeOwned>(path: &Path, skipped: &mut usize) -> Result<Vec<T>, StateError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut items = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(item) => items.push(item),
            Err(e) => {
                warn!(
                    file = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "skipping malformed line"
                );
                *skipped += 1;
            }
        }
    }
    Ok(items)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StateError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(file = %path.display(), error = %e, "ignoring unreadable file");
            Ok(None)
        }
    }
}

fn write_jsonl<T: Serialize>(
    path: &Path,
    what: &'static str,
    items: impl IntoIterator<Item = T>,
) -> Result<(), StateError> {
    let mut buf = Vec::new();
    for item in items {
        serde_json::to_writer(&mut buf, &item)
            .map_err(|source| StateError::Serialize { what, source })?;
        buf.push(b'\n');
    }
    write_atomic(path, &buf)
}

/// Write to `<path>.tmp`, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StateError> {
    let tmp = path.with_extension("tmp");
    let io_err = |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = fs::File::create(&tmp).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        StateError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

//! In-process stores shared between concurrent workflow runs.

pub mod features;
pub mod logs;
pub mod series;

pub use features::FeatureStore;
pub use logs::{PredictionLog, ValidationLog};
pub use series::{dataset_hash, StoreError, TimeSeriesStore, UpsertReport};

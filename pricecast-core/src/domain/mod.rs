//! Domain types for Pricecast

pub mod features;
pub mod ids;
pub mod prediction;
pub mod record;

pub use features::{
    lag_name, momentum_name, rolling_avg_name, rolling_std_name, FeatureVector, CURRENT,
};
pub use ids::{ModelVersion, PredictionId, RecordId};
pub use prediction::{ConfidenceLevel, Prediction, ValidationResult};
pub use record::{truncate_to_hour, RawRecord, TimeSeriesRecord, DAY_OF_WEEK, HOUR_OF_DAY};

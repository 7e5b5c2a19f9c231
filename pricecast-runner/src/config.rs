//! Pipeline configuration, loaded from TOML.
//!
//! Every section and field has a default, so an empty file is a valid config.
//!
//! ```toml
//! [features]
//! lags = [1, 2, 3, 24]
//! rolling_window = 24
//!
//! [training]
//! horizons = 24
//! min_training_rows = 200
//!
//! [ensemble]
//! z_multiplier = 1.96
//!
//! [sources]
//! market_csv = "data/market.csv"
//! weather_csv = "data/weather.csv"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use pricecast_core::ledger::DEFAULT_WINDOW;
use pricecast_core::{
    EnsembleConfig, FeatureConfig, FeatureError, PredictError, TrainerConfig, TrainingError,
    ValidationError, ValidatorConfig,
};

use crate::health::HealthConfig;
use crate::sources::SourcesConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Features(#[from] FeatureError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Ensemble(#[from] PredictError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid {section} config: {reason}")]
    Invalid {
        section: &'static str,
        reason: String,
    },
}

/// Prediction request defaults (`[prediction]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Horizons forecast by the `generate_predictions` stage.
    pub hours_ahead: usize,
    /// Validated errors kept per constituent for ensemble weighting.
    pub ledger_window: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            hours_ahead: 24,
            ledger_window: DEFAULT_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub features: FeatureConfig,
    pub training: TrainerConfig,
    pub ensemble: EnsembleConfig,
    pub validation: ValidatorConfig,
    pub prediction: PredictionConfig,
    pub health: HealthConfig,
    pub sources: SourcesConfig,
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;

        // relative source paths are resolved against the config file
        if let Some(dir) = path.parent() {
            config.sources.resolve_relative(dir);
        }
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section and the constraints between sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.features.validate()?;
        self.training.validate()?;
        self.ensemble.validate()?;
        self.validation.validate()?;
        self.health.validate().map_err(|reason| ConfigError::Invalid {
            section: "health",
            reason,
        })?;

        let p = &self.prediction;
        if p.hours_ahead == 0 || p.hours_ahead > self.training.horizons {
            return Err(ConfigError::Invalid {
                section: "prediction",
                reason: format!(
                    "hours_ahead must be in 1..={} (training.horizons), got {}",
                    self.training.horizons, p.hours_ahead
                ),
            });
        }
        if p.ledger_window == 0 {
            return Err(ConfigError::Invalid {
                section: "prediction",
                reason: "ledger_window must be > 0".into(),
            });
        }
        Ok(())
    }

    /// Content hash of the whole configuration, recorded with every model.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&json).to_hex().to_string()
    }
}

impl SourcesConfig {
    fn resolve_relative(&mut self, base: &Path) {
        for path in [&mut self.market_csv, &mut self.weather_csv, &mut self.gas_csv]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.features.lags, vec![1, 2, 3, 24]);
        assert_eq!(config.prediction.hours_ahead, 24);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [features]
            lags = [1, 24, 168]

            [ensemble]
            z_multiplier = 1.645

            [prediction]
            hours_ahead = 6
            "#,
        )
        .unwrap();
        assert_eq!(config.features.lags, vec![1, 24, 168]);
        assert_eq!(config.features.rolling_window, 24);
        assert_eq!(config.ensemble.z_multiplier, 1.645);
        assert_eq!(config.prediction.hours_ahead, 6);
        assert_eq!(config.training.min_training_rows, 200);
    }

    #[test]
    fn invalid_sections_are_rejected() {
        assert!(matches!(
            PipelineConfig::from_toml("[features]\nrolling_window = 0\n"),
            Err(ConfigError::Features(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml("[training]\nholdout_fraction = 1.5\n"),
            Err(ConfigError::Training(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml("[training]\nmin_training_rows = 0\n"),
            Err(ConfigError::Training(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml("[ensemble]\nz_multiplier = -1.0\n"),
            Err(ConfigError::Ensemble(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml("[prediction]\nhours_ahead = 48\n"),
            Err(ConfigError::Invalid { section: "prediction", .. })
        ));
        assert!(matches!(
            PipelineConfig::from_toml("[features\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = PipelineConfig::default();
        let mut b = PipelineConfig::default();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        b.training.ridge_lambda = 2.0;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn relative_source_paths_follow_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "[sources]\nmarket_csv = \"market.csv\"\n").unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.sources.market_csv, Some(dir.path().join("market.csv")));
    }
}

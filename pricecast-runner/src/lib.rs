//! Pricecast Runner — configuration, sources, orchestration, health, state.
//!
//! This crate builds on `pricecast-core` to provide:
//! - TOML pipeline configuration with validation and fingerprinting
//! - CSV and in-memory record sources, canonicalizing ingestion
//! - Deterministic synthetic market data
//! - Stage descriptors, the workflow catalogue and the Pipeline Orchestrator
//! - System health assessment
//! - On-disk state snapshots and CSV export

pub mod config;
pub mod export;
pub mod health;
pub mod ingest;
pub mod orchestrator;
pub mod sources;
pub mod stage;
pub mod state;
pub mod synthetic;
pub mod workflow;

pub use config::{ConfigError, PipelineConfig, PredictionConfig};
pub use health::{Alert, AlertSeverity, HealthConfig, HealthMetrics, HealthStatus, SystemHealth};
pub use ingest::{canonicalize, ingest, IngestReport};
pub use orchestrator::{Pipeline, WorkflowReport};
pub use sources::{
    CsvSource, MemorySource, RecordSource, SourceBatch, SourceError, SourceSet, SourcesConfig,
};
pub use stage::{PipelineContext, Stage, StageError, StageOutcome, StageOutput};
pub use state::{PipelineState, StateCounts, StateDir, StateError};
pub use synthetic::{SyntheticConfig, SyntheticSeries};
pub use workflow::{UnknownWorkflow, Workflow};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn pipeline_is_send_sync() {
        assert_send::<Pipeline>();
        assert_sync::<Pipeline>();
    }

    #[test]
    fn pipeline_state_is_send_sync() {
        assert_send::<PipelineState>();
        assert_sync::<PipelineState>();
    }

    #[test]
    fn reports_are_send_sync() {
        assert_send::<WorkflowReport>();
        assert_sync::<WorkflowReport>();
        assert_send::<SystemHealth>();
        assert_sync::<SystemHealth>();
    }
}

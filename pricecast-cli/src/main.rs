//! Pricecast CLI — workflow, prediction, validation and data commands.
//!
//! Commands:
//! - `run`: execute a named workflow against the state directory
//! - `predict`: forecast the next hours from the latest record
//! - `validate`: reconcile elapsed predictions with actuals
//! - `health`: print the current system health
//! - `synth`: write deterministic synthetic CSV feeds
//! - `export`: dump logged predictions and validations as CSV
//! - `workflows`: list the workflow catalogue

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pricecast_runner::export::{export_json, export_predictions_csv, export_validations_csv};
use pricecast_runner::sources::write_csv;
use pricecast_runner::synthetic::generate;
use pricecast_runner::{
    Pipeline, PipelineConfig, SourceSet, StateDir, SyntheticConfig, Workflow,
};

#[derive(Parser)]
#[command(
    name = "pricecast",
    about = "Pricecast CLI — hourly energy price forecasting pipeline"
)]
struct Cli {
    /// Path to a TOML pipeline config. Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State directory holding records, models and logs.
    #[arg(long, global = true, default_value = "state")]
    state_dir: PathBuf,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow: full_update, data_collection, feature_engineering,
    /// model_training, prediction, validation, daily_maintenance.
    Run {
        workflow: String,

        /// Logical run time (RFC 3339). Defaults to now.
        #[arg(long)]
        at: Option<String>,
    },
    /// Forecast the next hours from the latest record.
    Predict {
        /// Hours to forecast. Defaults to the configured value.
        #[arg(long)]
        hours_ahead: Option<usize>,

        #[arg(long)]
        at: Option<String>,
    },
    /// Validate predictions whose actuals have arrived.
    Validate {
        #[arg(long)]
        at: Option<String>,
    },
    /// Print system health.
    Health {
        #[arg(long)]
        at: Option<String>,
    },
    /// Write synthetic market, weather and gas CSV feeds.
    Synth {
        /// Output directory for market.csv, weather.csv, gas.csv.
        #[arg(long, default_value = "data")]
        out_dir: PathBuf,

        #[arg(long, default_value_t = 24 * 60)]
        hours: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// First hour (YYYY-MM-DD). Defaults to 2024-01-01.
        #[arg(long)]
        start: Option<String>,
    },
    /// Export logged predictions and validations as CSV.
    Export {
        #[arg(long)]
        predictions: Option<PathBuf>,

        #[arg(long)]
        validations: Option<PathBuf>,
    },
    /// List the available workflows and their stages.
    Workflows,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run { ref workflow, ref at } => {
            let workflow: Workflow = workflow.parse()?;
            run_workflow_cmd(&cli, workflow, parse_at(at.as_deref())?)
        }
        Commands::Predict {
            hours_ahead,
            ref at,
        } => run_predict(&cli, hours_ahead, parse_at(at.as_deref())?),
        Commands::Validate { ref at } => run_validate(&cli, parse_at(at.as_deref())?),
        Commands::Health { ref at } => run_health(&cli, parse_at(at.as_deref())?),
        Commands::Synth {
            ref out_dir,
            hours,
            seed,
            ref start,
        } => run_synth(&cli, out_dir, hours, seed, start.as_deref()),
        Commands::Export {
            ref predictions,
            ref validations,
        } => run_export(&cli, predictions.as_deref(), validations.as_deref()),
        Commands::Workflows => {
            for wf in Workflow::ALL {
                let stages: Vec<&str> = wf.stages().iter().map(|s| s.name).collect();
                println!("{:<20} {}", wf.name(), stages.join(" → "));
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn parse_at(raw: Option<&str>) -> Result<DateTime<Utc>> {
    match raw {
        None => Ok(Utc::now()),
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid --at timestamp '{s}'"))?
            .with_timezone(&Utc)),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::from_file(p)
            .with_context(|| format!("failed to load config {}", p.display())),
        None => Ok(PipelineConfig::default()),
    }
}

/// Build a pipeline over the persisted state.
fn open_pipeline(cli: &Cli) -> Result<(Pipeline, StateDir)> {
    let config = load_config(cli.config.as_deref())?;
    let state_dir = StateDir::new(&cli.state_dir);
    let (state, counts) = state_dir
        .load(config.prediction.ledger_window)
        .with_context(|| format!("failed to load state from {}", cli.state_dir.display()))?;
    if counts.skipped_lines > 0 {
        warn!(
            skipped_lines = counts.skipped_lines,
            "state directory has damaged lines; they will be dropped on the next save"
        );
    }
    let sources = SourceSet::from_config(&config.sources);
    let pipeline = Pipeline::with_state(config, sources, Arc::new(state))?;
    Ok((pipeline, state_dir))
}

fn save(pipeline: &Pipeline, state_dir: &StateDir) -> Result<()> {
    let counts = state_dir
        .save(pipeline.state())
        .with_context(|| format!("failed to save state to {}", state_dir.root().display()))?;
    info!(records = counts.records, models = counts.models, "state saved");
    Ok(())
}

fn run_workflow_cmd(cli: &Cli, workflow: Workflow, now: DateTime<Utc>) -> Result<()> {
    let (pipeline, state_dir) = open_pipeline(cli)?;
    let report = pipeline.run_workflow_at(workflow, now);
    // State is saved even when the run fails.
    save(&pipeline, &state_dir)?;
    println!("{}", export_json(&report)?);

    if !report.success {
        bail!(
            "workflow {} failed: {}",
            report.workflow,
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn run_predict(cli: &Cli, hours_ahead: Option<usize>, now: DateTime<Utc>) -> Result<()> {
    let (pipeline, state_dir) = open_pipeline(cli)?;
    let hours = hours_ahead.unwrap_or(pipeline.config().prediction.hours_ahead);
    pipeline.refresh_features();
    let batch = pipeline.predict(hours, now)?;
    save(&pipeline, &state_dir)?;
    println!("{}", export_json(&batch)?);
    Ok(())
}

fn run_validate(cli: &Cli, now: DateTime<Utc>) -> Result<()> {
    let (pipeline, state_dir) = open_pipeline(cli)?;
    let run = pipeline.validate(now);
    save(&pipeline, &state_dir)?;
    let out = json!({
        "validated": run.validated,
        "pending": run.pending,
        "not_due": run.not_due,
        "summary": run.summary,
    });
    println!("{}", export_json(&out)?);
    Ok(())
}

fn run_health(cli: &Cli, now: DateTime<Utc>) -> Result<()> {
    let (pipeline, _) = open_pipeline(cli)?;
    let health = pipeline.health(now);
    println!("{}", export_json(&health)?);
    Ok(())
}

fn run_synth(
    cli: &Cli,
    out_dir: &Path,
    hours: usize,
    seed: u64,
    start: Option<&str>,
) -> Result<()> {
    let mut synth = SyntheticConfig {
        hours,
        seed,
        ..SyntheticConfig::default()
    };
    if let Some(s) = start {
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid --start date '{s}'"))?;
        let midnight = date.and_hms_opt(0, 0, 0).context("invalid start time")?;
        synth.start = Utc.from_utc_datetime(&midnight);
    }

    let config = load_config(cli.config.as_deref())?;
    let ts = config.sources.timestamp_column.as_str();
    let target = config.sources.target_column.as_str();

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let series = generate(&synth);
    write_csv(&out_dir.join("market.csv"), &series.market, ts, Some(target))?;
    write_csv(&out_dir.join("weather.csv"), &series.weather, ts, None)?;
    write_csv(&out_dir.join("gas.csv"), &series.gas, ts, None)?;

    println!(
        "Wrote {} hours of synthetic data (seed {}) to {}",
        hours,
        seed,
        out_dir.display()
    );
    Ok(())
}

fn run_export(cli: &Cli, predictions: Option<&Path>, validations: Option<&Path>) -> Result<()> {
    if predictions.is_none() && validations.is_none() {
        bail!("nothing to export: pass --predictions and/or --validations");
    }
    let (pipeline, _) = open_pipeline(cli)?;
    let state = pipeline.state();

    if let Some(path) = predictions {
        let csv = export_predictions_csv(&state.predictions.all())?;
        std::fs::write(path, csv).with_context(|| format!("failed to write {}", path.display()))?;
        println!("Predictions written to: {}", path.display());
    }
    if let Some(path) = validations {
        let csv = export_validations_csv(&state.validations.all())?;
        std::fs::write(path, csv).with_context(|| format!("failed to write {}", path.display()))?;
        println!("Validations written to: {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_global_options() {
        let cli = Cli::try_parse_from([
            "pricecast",
            "run",
            "full-update",
            "--state-dir",
            "/tmp/s",
            "--at",
            "2024-03-01T12:00:00Z",
        ])
        .unwrap();
        assert_eq!(cli.state_dir, PathBuf::from("/tmp/s"));
        match cli.command {
            Commands::Run { workflow, at } => {
                assert_eq!(workflow.parse::<Workflow>().unwrap(), Workflow::FullUpdate);
                assert_eq!(
                    parse_at(at.as_deref()).unwrap(),
                    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
                );
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        assert!(parse_at(Some("yesterday")).is_err());
    }
}

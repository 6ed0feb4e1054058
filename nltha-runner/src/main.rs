mod batch;
mod executor;
mod generator;
mod models;
mod output;

use std::path::PathBuf;
use std::process::{Command, ExitCode, Stdio};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueHint};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use nltha_core::results::CapacitySummary;

use batch::{BatchRunner, DriverKind};
use executor::ExecutorSettings;
use models::{BatchConfig, IdaBundle, RecordStatus};
use output::OutputWriter;

#[derive(Parser, Debug)]
#[command(author, version, about = "IDA/MSA nonlinear time-history batches on OpenSees models", long_about = None)]
struct Cli {
    /// Batch configuration (JSON)
    #[arg(value_hint = ValueHint::FilePath)]
    config: PathBuf,

    /// Records traced in parallel (overrides the config)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Output directory (overrides the config)
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    output_dir: Option<PathBuf>,

    /// Replace OpenSees with a deterministic threshold stub
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,

    /// Scale factor above which the dry-run stub stops converging
    #[arg(long, default_value_t = 1.0)]
    dry_run_threshold: f64,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nltha_runner=info,nltha_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = BatchConfig::load(&cli.config)
        .with_context(|| format!("failed to read batch config {}", cli.config.display()))?;
    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }
    if let Some(dir) = cli.output_dir {
        config = config.with_output_dir(dir);
    }

    // Everything below this line is validated before a record is read
    let plan = config.validate(cli.dry_run).context("invalid batch configuration")?;
    let writer = OutputWriter::new(&config.output_dir)?;

    // Manifests are read up front so their errors abort before the solver is touched
    let ida = match plan.ida_analysis() {
        Some(ida) => {
            let store = config.record_store(&config.gm_dir)?;
            let entries = store.entries()?;
            tracing::info!("IDA manifest: {} record(s)", entries.len());
            Some((ida, store))
        }
        None => None,
    };
    let stripes = match plan.stripe_analysis() {
        Some(msa) => {
            let dirs = batch::discover_stripes(&config.gm_dir)?;
            msa.check_stripe_count(dirs.len())?;
            let stores = dirs
                .iter()
                .map(|d| config.record_store(&d.dir))
                .collect::<Result<Vec<_>, _>>()?;
            batch::read_manifests(&stores)?;
            Some((msa, dirs, stores))
        }
        None => None,
    };

    let driver = if cli.dry_run {
        if !(cli.dry_run_threshold > 0.0) {
            bail!("--dry-run-threshold must be positive, got {}", cli.dry_run_threshold);
        }
        tracing::info!("Dry run: threshold stub at scale {}", cli.dry_run_threshold);
        DriverKind::DryRun {
            threshold: cli.dry_run_threshold,
            drift_per_unit: config.options.drift_capacity / (2.0 * cli.dry_run_threshold),
        }
    } else {
        let command = config.solver.command.clone().unwrap_or_else(executor::resolve_opensees_path);
        tracing::info!("Using OpenSees command: {}", command);
        check_solver(&command);
        DriverKind::OpenSees(ExecutorSettings {
            command,
            solver: config.solver.clone(),
            export_dir: config.options.export_at_each_step.then(|| writer.nltha_dir().join("runs")),
        })
    };

    let runner = BatchRunner::new(driver, config.workers);
    let batch_id = Uuid::new_v4();
    let mut output_failures = 0usize;

    if let Some((ida, store)) = ida {
        tracing::info!("[INITIATE] IDA started (batch {})", batch_id);
        let export = plan.analysis.export_at_each_step;
        let reports = runner
            .run_ida(&ida, &store, |report| {
                if export {
                    if let Err(e) = writer.write_record(report) {
                        tracing::error!("{}", e);
                        output_failures += 1;
                    }
                }
            })
            .await?;

        let capacities: Vec<_> = reports.iter().filter_map(|r| r.capacity.clone()).collect();
        let summary = CapacitySummary::build(&capacities, &plan.aggregation);
        let bundle = IdaBundle::new(batch_id, &reports, &summary, plan.aggregation.demand);

        if let Err(e) = writer.write_ida_bundle(&bundle) {
            tracing::error!("{}", e);
            output_failures += 1;
        }
        if let Err(e) = writer.write_im_table(&reports) {
            tracing::error!("{}", e);
            output_failures += 1;
        }

        let count = |status| reports.iter().filter(|r| r.status == status).count();
        tracing::info!(
            "[SUCCESS] IDA done: {} complete, {} incomplete, {} failed",
            count(RecordStatus::Complete),
            count(RecordStatus::Incomplete),
            count(RecordStatus::Failed)
        );
    }

    if let Some((msa, dirs, stores)) = stripes {
        tracing::info!("[INITIATE] MSA started: {} stripe(s)", dirs.len());
        let results = runner.run_msa(&msa, dirs, stores).await?;

        for stripe in &results {
            if let Err(e) = writer.write_stripe(stripe) {
                tracing::error!("{}", e);
                output_failures += 1;
            }
        }
        tracing::info!("[SUCCESS] MSA done");
    }

    if output_failures > 0 {
        tracing::error!("{} output file(s) could not be written", output_failures);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Warn early when the solver cannot be started; runs would all fail
fn check_solver(command: &str) {
    match Command::new(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(_) => tracing::info!("OpenSees found and accessible"),
        Err(e) => {
            tracing::warn!("OpenSees not found or not accessible: {}", e);
            tracing::warn!("Set OPENSEES_PATH or solver.command to the correct path");
        }
    }
}

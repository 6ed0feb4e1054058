//! Run one record of a batch at a single scale factor and print the run as JSON

#![allow(dead_code)]

#[path = "../generator.rs"]
mod generator;
#[path = "../executor.rs"]
mod executor;
#[path = "../models.rs"]
mod models;

use anyhow::{anyhow, Context, Result};

use nltha_core::driver::SolverSession;
use nltha_core::intensity::intensity;
use nltha_core::results::Run;

use executor::{ExecutorSettings, OpenSeesExecutor};
use models::BatchConfig;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args.get(1).map(|s| s.as_str()).unwrap_or("batch.json");
    let record_name = args
        .get(2)
        .ok_or_else(|| anyhow!("usage: manual_run <config.json> <record> [scale]"))?;
    let scale: f64 = match args.get(3) {
        Some(s) => s.parse().with_context(|| format!("invalid scale '{}'", s))?,
        None => 1.0,
    };

    let mut config = BatchConfig::load(config_path.as_ref())?;
    let plan = config.validate(false)?;

    let store = config.record_store(&config.gm_dir)?;
    let entry = store
        .entries()?
        .into_iter()
        .find(|e| &e.name == record_name)
        .ok_or_else(|| anyhow!("record '{}' is not in the manifest", record_name))?;
    let record = store.load(&entry)?;

    let command = config.solver.command.clone().unwrap_or_else(executor::resolve_opensees_path);
    let mut executor = OpenSeesExecutor::new(ExecutorSettings {
        command,
        solver: config.solver.clone(),
        export_dir: Some(config.output_dir.join("NLTHA").join("runs")),
    });

    let mut analysis = plan.analysis.clone();
    analysis.export_at_each_step = true;

    let response = {
        let mut session = SolverSession::open(&mut executor);
        session.run(&record, scale, &analysis)?
    };
    let im = intensity(&record, scale, &plan.im)?;
    let run = Run::new(0, None, scale, scale, im, response, analysis.drift_capacity);

    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}

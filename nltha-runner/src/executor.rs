use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use regex::Regex;
use tempfile::TempDir;
use uuid::Uuid;

use nltha_core::driver::{AnalysisSettings, Response, ResponseDriver};
use nltha_core::error::{NlthaError, NlthaResult};
use nltha_core::records::Record;

use crate::generator::{GeneratorError, OpenSeesGenerator, TransientJob, RESULT_MARKER};
use crate::models::SolverConfig;

/// Resolve the OpenSees command: `OPENSEES_PATH`, then a repo-local
/// `./bin/OpenSees`, then `OpenSees` on the `PATH`
pub fn resolve_opensees_path() -> String {
    let path = std::env::var("OPENSEES_PATH").unwrap_or_else(|_| {
        if Path::new("./bin/OpenSees").exists() {
            "./bin/OpenSees".to_string()
        } else {
            "OpenSees".to_string()
        }
    });

    // Runs execute from a temp working directory, so relative paths would break
    fs::canonicalize(&path)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or(path)
}

/// Parsed result line of one run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub converged: bool,
    pub peak_drift: f64,
    pub roof_displacement: f64,
    /// Analysis time reached (s)
    pub time: f64,
}

fn result_pattern() -> Result<Regex, ExecutorError> {
    let number = r"([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)";
    let pattern = format!(
        r"{} converged=([01]) peak_drift={n} roof_disp={n} time={n}",
        RESULT_MARKER,
        n = number
    );
    Regex::new(&pattern).map_err(|e| ExecutorError::ParsingError(e.to_string()))
}

/// Find the last result line in the solver output
pub fn parse_result(output: &str) -> Result<Option<RunSummary>, ExecutorError> {
    let pattern = result_pattern()?;
    let Some(caps) = pattern.captures_iter(output).last() else {
        return Ok(None);
    };

    let number = |i: usize| -> Result<f64, ExecutorError> {
        caps[i]
            .parse::<f64>()
            .map_err(|e| ExecutorError::ParsingError(format!("'{}': {}", &caps[i], e)))
    };

    Ok(Some(RunSummary {
        converged: &caps[1] == "1",
        peak_drift: number(2)?,
        roof_displacement: number(3)?,
        time: number(4)?,
    }))
}

/// Settings shared by every executor of a batch
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub command: String,
    pub solver: SolverConfig,
    /// Where generated scripts and solver logs are copied when exporting each step
    pub export_dir: Option<PathBuf>,
}

/// Runs one OpenSees process per transient analysis
pub struct OpenSeesExecutor {
    command: String,
    generator: OpenSeesGenerator,
    export_dir: Option<PathBuf>,
    /// Working directory of the current run, released by `wipe`
    workspace: Option<TempDir>,
}

impl OpenSeesExecutor {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self {
            command: settings.command,
            generator: OpenSeesGenerator::new(settings.solver),
            export_dir: settings.export_dir,
            workspace: None,
        }
    }

    /// Write the scaled components and the Tcl script, run OpenSees and read its result line
    pub fn execute(
        &mut self,
        record: &Record,
        scale: f64,
        settings: &AnalysisSettings,
    ) -> Result<Response, ExecutorError> {
        let run_id = Uuid::new_v4();
        let temp_dir = TempDir::new().map_err(|e| ExecutorError::IoError(e.to_string()))?;
        let work_path = temp_dir.path().to_path_buf();
        self.workspace = Some(temp_dir);

        tracing::debug!("Run {} ({} x {:.4}) in {:?}", run_id, record.name, scale, work_path);

        let mut files = Vec::with_capacity(record.num_components());
        for i in 0..record.num_components() {
            let file_name = format!("gm_{}.txt", i + 1);
            let values: Vec<String> = record
                .scaled_component(i, scale)
                .iter()
                .map(|a| format!("{:.10e}", a))
                .collect();
            fs::write(work_path.join(&file_name), values.join("\n"))
                .map_err(|e| ExecutorError::IoError(format!("Failed to write {}: {}", file_name, e)))?;
            files.push(file_name);
        }

        let job = TransientJob {
            record: record.name.clone(),
            scale,
            acceleration_files: files,
            record_dt: record.dt,
            duration: record.duration(),
        };
        let tcl = self.generator.generate_tcl(&job, settings)?;
        let script_path = work_path.join("run.tcl");
        fs::write(&script_path, &tcl)
            .map_err(|e| ExecutorError::IoError(format!("Failed to write Tcl script: {}", e)))?;

        let output = Command::new(&self.command)
            .arg("run.tcl")
            .current_dir(&work_path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ExecutorError::ExecutionError(format!("Failed to execute {}: {}", self.command, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let log = format!("{}\n{}", stdout, stderr);

        if settings.export_at_each_step {
            let log_path = work_path.join("run.log");
            match fs::write(&log_path, &log) {
                Ok(()) => self.export_file(&log_path, &record.name, scale, "log"),
                Err(e) => tracing::warn!("Failed to write solver log for {}: {}", record.name, e),
            }
            self.export_file(&script_path, &record.name, scale, "tcl");
        }

        if !output.status.success() {
            tracing::warn!(
                "OpenSees exited with {} on {} x {:.4}; counted as non-convergence",
                output.status,
                record.name,
                scale
            );
            return Ok(Response::NonConvergence);
        }

        match parse_result(&log)? {
            Some(summary) if summary.converged => Ok(Response::Converged {
                peak_drift: summary.peak_drift,
                roof_displacement: Some(summary.roof_displacement),
            }),
            Some(summary) => {
                tracing::debug!(
                    "{} x {:.4} failed to converge at t = {:.3}s",
                    record.name,
                    scale,
                    summary.time
                );
                Ok(Response::NonConvergence)
            }
            None => {
                tracing::warn!(
                    "No result line from OpenSees for {} x {:.4}; counted as non-convergence",
                    record.name,
                    scale
                );
                Ok(Response::NonConvergence)
            }
        }
    }

    fn export_file(&self, path: &Path, record: &str, scale: f64, extension: &str) {
        let Some(dest_dir) = &self.export_dir else {
            return;
        };
        if let Err(err) = fs::create_dir_all(dest_dir) {
            tracing::warn!("Failed to create export directory {:?}: {}", dest_dir, err);
            return;
        }

        let dest_file = dest_dir.join(format!("{}_{:.4}.{}", record, scale, extension));
        if let Err(err) = fs::copy(path, &dest_file) {
            tracing::warn!("Failed to export {:?}: {}", dest_file, err);
        } else {
            tracing::debug!("Exported {:?}", dest_file);
        }
    }
}

impl ResponseDriver for OpenSeesExecutor {
    fn run(&mut self, record: &Record, scale: f64, settings: &AnalysisSettings) -> NlthaResult<Response> {
        self.execute(record, scale, settings).map_err(|e| NlthaError::Driver {
            record: record.name.clone(),
            scale,
            reason: e.to_string(),
        })
    }

    fn wipe(&mut self) {
        if let Some(workspace) = self.workspace.take() {
            let path = workspace.path().to_path_buf();
            if let Err(e) = workspace.close() {
                tracing::warn!("Failed to remove run directory {:?}: {}", path, e);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Execution error: {0}")]
    ExecutionError(String),
    #[error("Parsing error: {0}")]
    ParsingError(String),
    #[error(transparent)]
    Generation(#[from] GeneratorError),
}

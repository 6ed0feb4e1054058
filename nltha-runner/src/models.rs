use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nltha_core::analysis::{AnalysisOptions, AnalysisPlan, Termination};
use nltha_core::error::{NlthaError, NlthaResult};
use nltha_core::records::{GroundMotionManifest, RecordStore};
use nltha_core::results::{CapacityPoint, CapacitySummary, DemandMeasure, Quantiles, RecordCapacity};

/// Batch configuration read from the JSON file given on the command line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Directory holding the manifest and acceleration files
    pub gm_dir: PathBuf,
    /// `[names1, dts]` or `[names1, names2, dts]`
    pub gm_file_names: Vec<String>,
    /// Optional per-record units scale list inside `gm_dir`
    #[serde(default)]
    pub units_file: Option<String>,
    /// Units scale applied to every record when there is no `units_file`
    #[serde(default = "default_units_scale")]
    pub units_scale: f64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Records traced in parallel
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(flatten)]
    pub options: AnalysisOptions,
}

fn default_units_scale() -> f64 {
    1.0
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_workers() -> usize {
    1
}

/// OpenSees model and transient analysis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// OpenSees executable; falls back to `OPENSEES_PATH`, `./bin/OpenSees`, `OpenSees`
    pub command: Option<String>,
    /// Tcl script that builds the model and applies gravity loads
    pub model_script: PathBuf,
    /// Base node followed by one node per floor, bottom to top
    pub control_nodes: Vec<u32>,
    /// Storey heights, bottom to top
    pub storey_heights: Vec<f64>,
    /// Convergence test tolerance (NormDispIncr)
    pub test_tolerance: f64,
    pub max_iterations: u32,
    /// Times a failed step may be halved before the run is declared non-converged
    pub max_subdivisions: u32,
    /// Free-vibration time appended after the record ends (s)
    pub free_vibration: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            command: None,
            model_script: PathBuf::new(),
            control_nodes: Vec::new(),
            storey_heights: Vec::new(),
            test_tolerance: 1.0e-6,
            max_iterations: 50,
            max_subdivisions: 4,
            free_vibration: 0.0,
        }
    }
}

impl SolverConfig {
    /// Check the solver section and make `model_script` absolute.
    /// OpenSees runs inside a temp directory, so a relative script would not be found there.
    pub fn validate(&mut self) -> NlthaResult<()> {
        if self.model_script.as_os_str().is_empty() {
            return Err(NlthaError::config("solver.model_script", "no model script given"));
        }
        if !self.model_script.is_file() {
            return Err(NlthaError::config(
                "solver.model_script",
                format!("{} does not exist", self.model_script.display()),
            ));
        }
        self.model_script = fs::canonicalize(&self.model_script).map_err(|e| {
            NlthaError::config(
                "solver.model_script",
                format!("cannot resolve {}: {}", self.model_script.display(), e),
            )
        })?;
        if self.storey_heights.is_empty() {
            return Err(NlthaError::config("solver.storey_heights", "at least one storey is needed"));
        }
        if self.control_nodes.len() != self.storey_heights.len() + 1 {
            return Err(NlthaError::config(
                "solver.control_nodes",
                format!(
                    "expected {} nodes (base + one per floor) for {} storeys, got {}",
                    self.storey_heights.len() + 1,
                    self.storey_heights.len(),
                    self.control_nodes.len()
                ),
            ));
        }
        if let Some(h) = self.storey_heights.iter().find(|h| !(**h > 0.0)) {
            return Err(NlthaError::config(
                "solver.storey_heights",
                format!("storey heights must be positive, got {}", h),
            ));
        }
        if !(self.test_tolerance > 0.0) || self.max_iterations == 0 {
            return Err(NlthaError::config(
                "solver.test_tolerance",
                "tolerance and iteration count must be positive",
            ));
        }
        if !(self.free_vibration >= 0.0) {
            return Err(NlthaError::config("solver.free_vibration", "must not be negative"));
        }
        Ok(())
    }
}

impl BatchConfig {
    /// Read a batch configuration from a JSON file
    pub fn load(path: &Path) -> NlthaResult<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_output_dir(mut self, output_dir: PathBuf) -> Self {
        self.output_dir = output_dir;
        self
    }

    /// Validate the whole batch without touching any record file.
    /// The solver section is skipped for dry runs; otherwise its paths are made absolute.
    pub fn validate(&mut self, dry_run: bool) -> NlthaResult<AnalysisPlan> {
        let plan = self.options.plan()?;
        self.manifest()?;

        if self.workers == 0 {
            return Err(NlthaError::config("workers", "at least one worker is needed"));
        }
        if !(self.units_scale > 0.0) {
            return Err(NlthaError::config(
                "units_scale",
                format!("must be positive, got {}", self.units_scale),
            ));
        }
        if self.options.flag3d && self.gm_file_names.len() != 3 {
            return Err(NlthaError::config(
                "gm_file_names",
                "3D analysis needs two component name lists and a dt list",
            ));
        }
        // A planar model is excited by one component only
        if !self.options.flag3d && self.gm_file_names.len() == 3 {
            return Err(NlthaError::config(
                "gm_file_names",
                "2D analysis takes one component name list and a dt list; set flag3d for two components",
            ));
        }
        if !dry_run {
            self.solver.validate()?;
        }
        Ok(plan)
    }

    pub fn manifest(&self) -> NlthaResult<GroundMotionManifest> {
        let mut manifest = GroundMotionManifest::from_file_names(&self.gm_file_names)?;
        manifest.units_file = self.units_file.clone();
        Ok(manifest)
    }

    /// Record store over `dir` with this batch's manifest and units
    pub fn record_store(&self, dir: &Path) -> NlthaResult<RecordStore> {
        Ok(RecordStore::new(dir, self.manifest()?).with_units_scale(self.units_scale))
    }
}

/// Final state of one record in an IDA batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    /// A collapse was bracketed
    Complete,
    /// No collapse within the run budget
    Incomplete,
    /// The record could not be loaded or the solver could not be run
    Failed,
}

/// Outcome of one record in an IDA batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordReport {
    pub index: usize,
    pub record: String,
    pub status: RecordStatus,
    pub capacity: Option<RecordCapacity>,
    pub error: Option<String>,
}

impl RecordReport {
    pub fn traced(index: usize, capacity: RecordCapacity) -> Self {
        let status = if capacity.is_complete() {
            RecordStatus::Complete
        } else {
            RecordStatus::Incomplete
        };
        Self {
            index,
            record: capacity.record.clone(),
            status,
            capacity: Some(capacity),
            error: None,
        }
    }

    pub fn failed(index: usize, record: &str, error: impl ToString) -> Self {
        Self {
            index,
            record: record.to_string(),
            status: RecordStatus::Failed,
            capacity: None,
            error: Some(error.to_string()),
        }
    }

    /// IM of every run in issue order; empty for failed records
    pub fn im_row(&self) -> Vec<f64> {
        self.capacity.as_ref().map(RecordCapacity::im_row).unwrap_or_default()
    }
}

/// Per-record entry of the IDA bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSummary {
    pub record: String,
    pub status: RecordStatus,
    pub termination: Option<Termination>,
    /// IM of every run in issue order
    pub im: Vec<f64>,
    /// Demand points of the monotone curve (empty when skipped)
    pub demand: Vec<f64>,
    pub curve_im: Vec<f64>,
    /// Curve IM on the bundle grid
    pub im_grid: Vec<f64>,
    pub capacity: Option<CapacityPoint>,
}

/// Serialized capacity-curve bundle of an IDA batch (`IDA.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdaBundle {
    pub batch_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub demand_measure: DemandMeasure,
    /// Demand grid shared by every record curve
    pub grid: Vec<f64>,
    /// 16/50/84th percentile IM on the grid
    pub quantiles: Quantiles,
    pub records: Vec<RecordSummary>,
    /// Records left out of the quantiles
    pub skipped: Vec<String>,
}

impl IdaBundle {
    pub fn new(batch_id: Uuid, reports: &[RecordReport], summary: &CapacitySummary, demand: DemandMeasure) -> Self {
        let records = reports
            .iter()
            .map(|report| {
                let curve = summary.curves.iter().find(|c| c.record == report.record);
                RecordSummary {
                    record: report.record.clone(),
                    status: report.status,
                    termination: report.capacity.as_ref().map(|c| c.termination),
                    im: report.im_row(),
                    demand: curve.map(|c| c.demand.clone()).unwrap_or_default(),
                    curve_im: curve.map(|c| c.im.clone()).unwrap_or_default(),
                    im_grid: curve.map(|c| c.im_grid.clone()).unwrap_or_default(),
                    capacity: report.capacity.as_ref().and_then(|c| c.capacity),
                }
            })
            .collect();

        Self {
            batch_id,
            created_at: Utc::now(),
            demand_measure: demand,
            grid: summary.grid.clone(),
            quantiles: summary.quantiles.clone(),
            records,
            skipped: summary.skipped.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nltha_core::analysis::{AnalysisType, IntensityBasis};
    use std::io::Write;

    fn config_json(extra: &str) -> String {
        format!(
            r#"{{
                "gm_dir": "records",
                "gm_file_names": ["GMR_names1.txt", "GMR_dts.txt"],
                "analysis_type": ["IDA"],
                "periods_ida": [0.96],
                "max_runs": 12{}
            }}"#,
            extra
        )
    }

    #[test]
    fn test_batch_config_defaults() {
        let config: BatchConfig = serde_json::from_str(&config_json("")).unwrap();
        assert_eq!(config.workers, 1);
        assert_eq!(config.units_scale, 1.0);
        assert_eq!(config.output_dir, PathBuf::from("outputs"));
        assert_eq!(config.options.max_runs, Some(12));
        assert_eq!(config.options.intensity_basis, IntensityBasis::SpectralAcceleration);
        assert_eq!(config.solver.max_iterations, 50);

        let plan = config.clone().validate(true).unwrap();
        assert_eq!(plan.ida.unwrap().max_runs, 12);
        assert_eq!(AnalysisType::parse(&config.options.analysis_type[0]).unwrap(), AnalysisType::Ida);

        let mut idle: BatchConfig = serde_json::from_str(&config_json(r#", "workers": 0"#)).unwrap();
        assert!(idle.validate(true).unwrap_err().to_string().contains("workers"));
    }

    #[test]
    fn test_validate_rejects_bad_manifest() {
        let config: BatchConfig = serde_json::from_str(&config_json("")).unwrap();
        let mut config = BatchConfig {
            gm_file_names: vec!["only_one.txt".into()],
            ..config
        };
        let err = config.validate(true).unwrap_err();
        assert!(err.to_string().contains("gm_file_names"));
    }

    #[test]
    fn test_validate_checks_solver_unless_dry_run() {
        let mut config: BatchConfig = serde_json::from_str(&config_json("")).unwrap();
        assert!(config.validate(true).is_ok());
        let err = config.validate(false).unwrap_err();
        assert!(err.to_string().contains("solver.model_script"));
    }

    #[test]
    fn test_solver_config_validation() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("model.tcl");
        let mut file = fs::File::create(&script).unwrap();
        writeln!(file, "model basic -ndm 2 -ndf 3").unwrap();

        let mut solver = SolverConfig {
            model_script: script,
            control_nodes: vec![1, 2, 3],
            storey_heights: vec![3.5, 3.0],
            ..SolverConfig::default()
        };
        assert!(solver.validate().is_ok());

        solver.control_nodes.pop();
        assert!(solver.validate().unwrap_err().to_string().contains("control_nodes"));
    }

    #[test]
    fn test_planar_batch_rejects_two_components() {
        let mut config: BatchConfig = serde_json::from_str(&config_json("")).unwrap();
        config.gm_file_names = vec!["GMR_names1.txt".into(), "GMR_names2.txt".into(), "GMR_dts.txt".into()];
        let err = config.validate(true).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("gm_file_names"));

        config.options.flag3d = true;
        assert!(config.validate(true).is_ok());
    }

    #[test]
    fn test_relative_model_script_is_made_absolute() {
        // Tests run from the package root
        let mut solver = SolverConfig {
            model_script: PathBuf::from("Cargo.toml"),
            control_nodes: vec![1, 2],
            storey_heights: vec![3.0],
            ..SolverConfig::default()
        };
        solver.validate().unwrap();
        assert!(solver.model_script.is_absolute());
        assert!(solver.model_script.ends_with("nltha-runner/Cargo.toml"));

        let mut config: BatchConfig = serde_json::from_str(&config_json("")).unwrap();
        config.solver = SolverConfig {
            model_script: PathBuf::from("./Cargo.toml"),
            ..solver
        };
        config.validate(false).unwrap();
        assert!(config.solver.model_script.is_absolute());
    }

    #[test]
    fn test_report_status() {
        let capacity = RecordCapacity::new("GM1", Vec::new(), Termination::CapacityNotFound);
        let report = RecordReport::traced(3, capacity);
        assert_eq!(report.status, RecordStatus::Incomplete);
        assert!(report.im_row().is_empty());

        let failed = RecordReport::failed(4, "GM2", "missing file");
        assert_eq!(failed.status, RecordStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("missing file"));
    }
}

use std::f64::consts::PI;
use std::path::Path;

use nltha_core::driver::AnalysisSettings;

use crate::models::SolverConfig;

/// Marker of the machine-readable line printed at the end of every run
pub const RESULT_MARKER: &str = "NLTHA_RESULT";

/// One scaled record ready to be written as a Tcl transient run
#[derive(Debug, Clone)]
pub struct TransientJob {
    pub record: String,
    pub scale: f64,
    /// Acceleration file of each component, relative to the run directory
    pub acceleration_files: Vec<String>,
    /// Sampling step of the acceleration files (s)
    pub record_dt: f64,
    /// Record duration (s)
    pub duration: f64,
}

pub struct OpenSeesGenerator {
    solver: SolverConfig,
}

impl OpenSeesGenerator {
    const SERIES_TAG: usize = 101;
    const PATTERN_TAG: usize = 201;

    pub fn new(solver: SolverConfig) -> Self {
        Self { solver }
    }

    /// Rayleigh mass and stiffness coefficients giving `damping` at the target periods.
    /// With a single period both anchors coincide.
    pub fn rayleigh_coefficients(periods: &[f64], damping: f64) -> Option<(f64, f64)> {
        let (wi, wj) = match periods {
            [t] => (2.0 * PI / t, 2.0 * PI / t),
            [t1, t2, ..] => (2.0 * PI / t1, 2.0 * PI / t2),
            [] => return None,
        };
        let alpha_m = 2.0 * damping * wi * wj / (wi + wj);
        let beta_k = 2.0 * damping / (wi + wj);
        Some((alpha_m, beta_k))
    }

    /// DOFs excited by each component: X/Y for bidirectional 3D runs, else the loading direction
    fn excitation_dofs(components: usize, settings: &AnalysisSettings) -> Vec<usize> {
        if settings.flag3d && components == 2 {
            vec![1, 2]
        } else {
            vec![settings.direction + 1]
        }
    }

    fn drift_dofs(settings: &AnalysisSettings) -> Vec<usize> {
        if settings.flag3d {
            vec![1, 2]
        } else {
            vec![settings.direction + 1]
        }
    }

    fn tcl_path(path: &Path) -> String {
        format!("{{{}}}", path.to_string_lossy().replace('\\', "/"))
    }

    fn tcl_list<T: ToString>(values: &[T]) -> String {
        let items: Vec<String> = values.iter().map(ToString::to_string).collect();
        format!("{{{}}}", items.join(" "))
    }

    pub fn generate_tcl(&self, job: &TransientJob, settings: &AnalysisSettings) -> Result<String, GeneratorError> {
        if job.acceleration_files.is_empty() {
            return Err(GeneratorError::GenerationError(format!(
                "record {} has no acceleration file",
                job.record
            )));
        }
        if !(job.record_dt > 0.0) {
            return Err(GeneratorError::GenerationError(format!(
                "record {} has a non-positive time step",
                job.record
            )));
        }
        // The script is sourced from the run directory
        if !self.solver.model_script.is_absolute() {
            return Err(GeneratorError::GenerationError(format!(
                "model script {} is not an absolute path",
                self.solver.model_script.display()
            )));
        }
        let analysis_dt = settings.time_step.unwrap_or(job.record_dt);
        if !(analysis_dt > 0.0) {
            return Err(GeneratorError::GenerationError("analysis time step must be positive".to_string()));
        }

        let mut tcl = String::new();

        // 1. Header and model
        tcl.push_str("# NLTHA transient run\n");
        tcl.push_str(&format!("# record {}, scale {:.6}\n", job.record, job.scale));
        tcl.push_str("wipe\n");
        tcl.push_str(&format!("source {}\n", Self::tcl_path(&self.solver.model_script)));
        tcl.push_str("loadConst -time 0.0\n\n");

        // 2. Damping
        match Self::rayleigh_coefficients(&settings.periods, settings.damping) {
            Some((alpha_m, beta_k)) => {
                tcl.push_str(&format!(
                    "# Rayleigh damping, {:.2}% at T = {:?}\n",
                    settings.damping * 100.0,
                    settings.periods
                ));
                tcl.push_str(&format!("rayleigh {:.8e} 0.0 0.0 {:.8e}\n\n", alpha_m, beta_k));
            }
            None => {
                tracing::debug!("No damping periods for {}; model script damping applies", job.record);
                tcl.push_str("# no damping periods given, model script damping applies\n\n");
            }
        }

        // 3. Ground motion
        let dofs = Self::excitation_dofs(job.acceleration_files.len(), settings);
        for (i, (file, dof)) in job.acceleration_files.iter().zip(&dofs).enumerate() {
            let series = Self::SERIES_TAG + i;
            tcl.push_str(&format!(
                "timeSeries Path {} -dt {:.8} -filePath {} -factor 1.0\n",
                series,
                job.record_dt,
                Self::tcl_path(Path::new(file))
            ));
            tcl.push_str(&format!(
                "pattern UniformExcitation {} {} -accel {}\n",
                Self::PATTERN_TAG + i,
                dof,
                series
            ));
        }
        tcl.push('\n');

        // 4. Run parameters
        tcl.push_str(&format!("set control_nodes {}\n", Self::tcl_list(&self.solver.control_nodes)));
        tcl.push_str(&format!("set storey_heights {}\n", Self::tcl_list(&self.solver.storey_heights)));
        tcl.push_str(&format!("set drift_dofs {}\n", Self::tcl_list(&Self::drift_dofs(settings))));
        tcl.push_str(&format!("set drift_capacity {}\n", settings.drift_capacity));
        tcl.push_str(&format!("set dt_analysis {:.8}\n", analysis_dt));
        tcl.push_str(&format!("set t_final {:.6}\n", job.duration + self.solver.free_vibration));
        tcl.push_str(&format!("set max_subdivisions {}\n\n", self.solver.max_subdivisions));

        // 5. Transient analysis objects
        tcl.push_str("wipeAnalysis\n");
        tcl.push_str("constraints Transformation\n");
        tcl.push_str("numberer RCM\n");
        tcl.push_str("system UmfPack\n");
        tcl.push_str(&format!(
            "test NormDispIncr {:e} {}\n",
            self.solver.test_tolerance, self.solver.max_iterations
        ));
        tcl.push_str("algorithm Newton\n");
        tcl.push_str("integrator Newmark 0.5 0.25\n");
        tcl.push_str("analysis Transient\n\n");

        // 6. Drift tracking, convergence fallbacks and the time loop
        tcl.push_str(TIME_LOOP);
        tcl.push_str(&format!(
            "puts \"{} converged=$converged peak_drift=$max_drift roof_disp=$max_roof time=[getTime]\"\n",
            RESULT_MARKER
        ));
        tcl.push_str("wipe\n");

        Ok(tcl)
    }
}

const TIME_LOOP: &str = r#"proc peak_storey_drift {} {
    global control_nodes storey_heights drift_dofs
    set peak 0.0
    for {set i 0} {$i < [llength $storey_heights]} {incr i} {
        set bottom [lindex $control_nodes $i]
        set top [lindex $control_nodes [expr {$i + 1}]]
        set h [lindex $storey_heights $i]
        foreach dof $drift_dofs {
            set d [expr {100.0 * abs([nodeDisp $top $dof] - [nodeDisp $bottom $dof]) / $h}]
            if {$d > $peak} { set peak $d }
        }
    }
    return $peak
}

proc roof_displacement {} {
    global control_nodes drift_dofs
    set base [lindex $control_nodes 0]
    set roof [lindex $control_nodes end]
    set peak 0.0
    foreach dof $drift_dofs {
        set d [expr {abs([nodeDisp $roof $dof] - [nodeDisp $base $dof])}]
        if {$d > $peak} { set peak $d }
    }
    return $peak
}

proc advance {dt level} {
    global max_subdivisions
    if {[analyze 1 $dt] == 0} { return 0 }
    foreach alg {ModifiedNewton KrylovNewton} {
        algorithm $alg
        set ok [analyze 1 $dt]
        algorithm Newton
        if {$ok == 0} { return 0 }
    }
    if {$level >= $max_subdivisions} { return -1 }
    set half [expr {$dt / 2.0}]
    if {[advance $half [expr {$level + 1}]] != 0} { return -1 }
    return [advance $half [expr {$level + 1}]]
}

set converged 1
set max_drift 0.0
set max_roof 0.0
while {[getTime] < $t_final - 0.5 * $dt_analysis} {
    if {[advance $dt_analysis 0] != 0} {
        set converged 0
        break
    }
    set drift [peak_storey_drift]
    if {$drift > $max_drift} { set max_drift $drift }
    set roof [roof_displacement]
    if {$roof > $max_roof} { set max_roof $roof }
    if {$max_drift >= $drift_capacity} { break }
}

"#;

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("Generation error: {0}")]
    GenerationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::path::PathBuf;

    fn generator() -> OpenSeesGenerator {
        OpenSeesGenerator::new(SolverConfig {
            model_script: PathBuf::from("/models/frame.tcl"),
            control_nodes: vec![1, 2, 3],
            storey_heights: vec![3.5, 3.0],
            ..SolverConfig::default()
        })
    }

    fn job(files: &[&str]) -> TransientJob {
        TransientJob {
            record: "GM1".to_string(),
            scale: 0.35,
            acceleration_files: files.iter().map(|f| f.to_string()).collect(),
            record_dt: 0.01,
            duration: 20.0,
        }
    }

    fn settings(periods: Vec<f64>) -> AnalysisSettings {
        AnalysisSettings {
            periods,
            time_step: Some(0.005),
            ..AnalysisSettings::default()
        }
    }

    #[test]
    fn test_rayleigh_single_period() {
        let (alpha_m, beta_k) = OpenSeesGenerator::rayleigh_coefficients(&[1.0], 0.05).unwrap();
        let w = 2.0 * PI;
        assert_relative_eq!(alpha_m, 0.05 * w, epsilon = 1e-12);
        assert_relative_eq!(beta_k, 0.05 / w, epsilon = 1e-12);
        // Damping ratio is recovered at the anchor frequency
        assert_relative_eq!(alpha_m / (2.0 * w) + beta_k * w / 2.0, 0.05, epsilon = 1e-12);
        assert!(OpenSeesGenerator::rayleigh_coefficients(&[], 0.05).is_none());
    }

    #[test]
    fn test_rayleigh_two_periods() {
        let (alpha_m, beta_k) = OpenSeesGenerator::rayleigh_coefficients(&[1.0, 0.5], 0.03).unwrap();
        for t in [1.0, 0.5] {
            let w = 2.0 * PI / t;
            assert_relative_eq!(alpha_m / (2.0 * w) + beta_k * w / 2.0, 0.03, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_planar_script() {
        let tcl = generator().generate_tcl(&job(&["gm_1.txt"]), &settings(vec![0.96])).unwrap();

        assert!(tcl.contains("source {/models/frame.tcl}"));
        assert!(tcl.contains("timeSeries Path 101 -dt 0.01000000 -filePath {gm_1.txt} -factor 1.0"));
        assert!(tcl.contains("pattern UniformExcitation 201 1 -accel 101"));
        assert!(tcl.contains("set control_nodes {1 2 3}"));
        assert!(tcl.contains("set storey_heights {3.5 3}"));
        assert!(tcl.contains("set drift_dofs {1}"));
        assert!(tcl.contains("set dt_analysis 0.00500000"));
        assert!(tcl.contains("rayleigh "));
        assert!(tcl.contains("integrator Newmark 0.5 0.25"));
        assert!(tcl.contains("algorithm $alg"));
        assert!(tcl.contains("puts \"NLTHA_RESULT converged=$converged"));
        assert!(tcl.trim_end().ends_with("wipe"));
    }

    #[test]
    fn test_bidirectional_script() {
        let mut analysis = settings(vec![0.96, 1.03]);
        analysis.flag3d = true;
        let tcl = generator().generate_tcl(&job(&["gm_1.txt", "gm_2.txt"]), &analysis).unwrap();

        assert!(tcl.contains("pattern UniformExcitation 201 1 -accel 101"));
        assert!(tcl.contains("pattern UniformExcitation 202 2 -accel 102"));
        assert!(tcl.contains("set drift_dofs {1 2}"));
    }

    #[test]
    fn test_y_direction_without_periods() {
        let mut analysis = settings(Vec::new());
        analysis.direction = 1;
        let tcl = generator().generate_tcl(&job(&["gm_1.txt"]), &analysis).unwrap();

        assert!(tcl.contains("pattern UniformExcitation 201 2 -accel 101"));
        assert!(!tcl.contains("rayleigh "));
    }

    #[test]
    fn test_missing_files_rejected() {
        assert!(generator().generate_tcl(&job(&[]), &settings(vec![1.0])).is_err());
    }

    #[test]
    fn test_relative_model_script_rejected() {
        let generator = OpenSeesGenerator::new(SolverConfig {
            model_script: PathBuf::from("models/frame.tcl"),
            control_nodes: vec![1, 2],
            storey_heights: vec![3.0],
            ..SolverConfig::default()
        });
        let err = generator.generate_tcl(&job(&["gm_1.txt"]), &settings(vec![1.0])).unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }
}

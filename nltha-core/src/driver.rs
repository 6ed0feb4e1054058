//! Structural response driver interface
//!
//! A driver runs one transient analysis of the structure under a scaled
//! record. Solver non-convergence is a normal outcome
//! ([`Response::NonConvergence`]) and is read as collapse by the callers;
//! `Err` is reserved for failures to run the solver at all.

use serde::{Deserialize, Serialize};

use crate::error::NlthaResult;
use crate::records::Record;

/// Global settings passed to every transient run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Integration time step (s); `None` uses the record time step
    pub time_step: Option<f64>,
    /// Critical damping ratio
    pub damping: f64,
    /// Periods used to anchor Rayleigh damping (s)
    pub periods: Vec<f64>,
    /// 3D model with bidirectional excitation
    pub flag3d: bool,
    /// Loading direction for 2D models (0: X, 1: Y)
    pub direction: usize,
    /// Drift capacity (%) at which a run counts as collapse
    pub drift_capacity: f64,
    /// Keep per-run solver artifacts
    pub export_at_each_step: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            time_step: None,
            damping: 0.05,
            periods: Vec::new(),
            flag3d: false,
            direction: 0,
            drift_capacity: 10.0,
            export_at_each_step: false,
        }
    }
}

impl AnalysisSettings {
    /// Time step to integrate `record` with
    pub fn time_step_for(&self, record: &Record) -> f64 {
        self.time_step.unwrap_or(record.dt)
    }
}

/// Outcome of one transient run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Converged {
        /// Peak inter-storey drift (%)
        peak_drift: f64,
        /// Peak roof displacement, when the driver reports it
        roof_displacement: Option<f64>,
    },
    NonConvergence,
}

impl Response {
    pub fn converged(peak_drift: f64) -> Self {
        Self::Converged {
            peak_drift,
            roof_displacement: None,
        }
    }

    pub fn peak_drift(&self) -> Option<f64> {
        match self {
            Self::Converged { peak_drift, .. } => Some(*peak_drift),
            Self::NonConvergence => None,
        }
    }

    pub fn roof_displacement(&self) -> Option<f64> {
        match self {
            Self::Converged {
                roof_displacement, ..
            } => *roof_displacement,
            Self::NonConvergence => None,
        }
    }

    /// Collapse: non-convergence or drift at or above the capacity (%)
    pub fn is_collapse(&self, drift_capacity: f64) -> bool {
        match self {
            Self::Converged { peak_drift, .. } => *peak_drift >= drift_capacity,
            Self::NonConvergence => true,
        }
    }
}

/// Runs the external transient solver for one scaled record
pub trait ResponseDriver {
    fn run(&mut self, record: &Record, scale: f64, settings: &AnalysisSettings) -> NlthaResult<Response>;

    /// Release the solver's global model state
    fn wipe(&mut self) {}
}

impl<D: ResponseDriver + ?Sized> ResponseDriver for Box<D> {
    fn run(&mut self, record: &Record, scale: f64, settings: &AnalysisSettings) -> NlthaResult<Response> {
        (**self).run(record, scale, settings)
    }

    fn wipe(&mut self) {
        (**self).wipe()
    }
}

/// Scoped hold on a driver: the solver state is wiped when the session ends,
/// whichever way the run exits
pub struct SolverSession<'a, D: ResponseDriver + ?Sized> {
    driver: &'a mut D,
}

impl<'a, D: ResponseDriver + ?Sized> SolverSession<'a, D> {
    pub fn open(driver: &'a mut D) -> Self {
        Self { driver }
    }

    pub fn run(&mut self, record: &Record, scale: f64, settings: &AnalysisSettings) -> NlthaResult<Response> {
        self.driver.run(record, scale, settings)
    }
}

impl<D: ResponseDriver + ?Sized> Drop for SolverSession<'_, D> {
    fn drop(&mut self) {
        self.driver.wipe();
    }
}

/// How [`ThresholdDriver`] reports drift below its threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DriftModel {
    /// Same drift (%) at every surviving scale
    Constant(f64),
    /// Drift (%) proportional to the scale factor
    Proportional(f64),
}

/// Deterministic stand-in for the solver: survives up to `threshold_scale`,
/// fails to converge above it
#[derive(Debug, Clone)]
pub struct ThresholdDriver {
    pub threshold_scale: f64,
    pub drift: DriftModel,
    /// Scale factors received, in call order
    pub calls: Vec<f64>,
    pub wipes: usize,
}

impl ThresholdDriver {
    pub fn new(threshold_scale: f64, drift: DriftModel) -> Self {
        Self {
            threshold_scale,
            drift,
            calls: Vec::new(),
            wipes: 0,
        }
    }
}

impl ResponseDriver for ThresholdDriver {
    fn run(&mut self, _record: &Record, scale: f64, _settings: &AnalysisSettings) -> NlthaResult<Response> {
        self.calls.push(scale);
        if scale > self.threshold_scale {
            return Ok(Response::NonConvergence);
        }
        let peak_drift = match self.drift {
            DriftModel::Constant(drift) => drift,
            DriftModel::Proportional(per_unit) => per_unit * scale,
        };
        Ok(Response::Converged {
            peak_drift,
            roof_displacement: Some(peak_drift / 100.0),
        })
    }

    fn wipe(&mut self) {
        self.wipes += 1;
    }
}

//! Result types for IDA runs and the cross-record capacity summary

use serde::{Deserialize, Serialize};

use crate::analysis::ida::{Phase, Termination};
use crate::driver::Response;
use crate::error::{NlthaError, NlthaResult};
use crate::math::{self, CubicSpline};

/// Solver outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Converged below the drift capacity
    Survived,
    /// Converged at or above the drift capacity
    Collapsed,
    /// Solver failed to converge (read as collapse)
    NonConvergence,
}

/// One transient analysis of one record at one scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Position in the record's run sequence
    pub index: usize,
    /// IDA phase that issued the run; `None` for stripe runs
    pub phase: Option<Phase>,
    /// Intensity level targeted by the state machine
    pub level: f64,
    pub scale: f64,
    /// Intensity measure of the scaled record
    pub im: f64,
    /// Peak inter-storey drift (%)
    pub peak_drift: Option<f64>,
    pub roof_displacement: Option<f64>,
    pub status: RunStatus,
}

impl Run {
    pub fn new(
        index: usize,
        phase: Option<Phase>,
        level: f64,
        scale: f64,
        im: f64,
        response: Response,
        drift_capacity: f64,
    ) -> Self {
        let status = match response {
            Response::NonConvergence => RunStatus::NonConvergence,
            r if r.is_collapse(drift_capacity) => RunStatus::Collapsed,
            _ => RunStatus::Survived,
        };
        Self {
            index,
            phase,
            level,
            scale,
            im,
            peak_drift: response.peak_drift(),
            roof_displacement: response.roof_displacement(),
            status,
        }
    }

    pub fn is_collapse(&self) -> bool {
        self.status != RunStatus::Survived
    }

    /// Demand value of the run for the given measure
    pub fn demand(&self, measure: DemandMeasure) -> Option<f64> {
        match measure {
            DemandMeasure::PeakDrift => self.peak_drift,
            DemandMeasure::RoofDisplacement => self.roof_displacement,
        }
    }
}

/// The lowest collapsing run of a record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityPoint {
    pub run_index: usize,
    pub level: f64,
    pub scale: f64,
    pub im: f64,
}

/// Runs of one record and its capacity point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordCapacity {
    pub record: String,
    /// Runs in the order they were issued
    pub runs: Vec<Run>,
    pub termination: Termination,
    pub capacity: Option<CapacityPoint>,
}

impl RecordCapacity {
    pub fn new(record: &str, runs: Vec<Run>, termination: Termination) -> Self {
        let capacity = runs
            .iter()
            .filter(|run| run.is_collapse())
            .min_by(|a, b| a.level.total_cmp(&b.level))
            .map(|run| CapacityPoint {
                run_index: run.index,
                level: run.level,
                scale: run.scale,
                im: run.im,
            });

        Self {
            record: record.to_string(),
            runs,
            termination,
            capacity,
        }
    }

    /// False when no collapse was found within the run budget
    pub fn is_complete(&self) -> bool {
        self.termination != Termination::CapacityNotFound
    }

    /// Intensity measures in run order
    pub fn im_row(&self) -> Vec<f64> {
        self.runs.iter().map(|run| run.im).collect()
    }

    /// Monotone demand–IM curve from the origin through the surviving runs.
    ///
    /// Runs are ordered by IM and a point is kept only when its demand exceeds
    /// every earlier one. Fails with `InsufficientData` below two surviving runs.
    pub fn curve(&self, measure: DemandMeasure) -> NlthaResult<(Vec<f64>, Vec<f64>)> {
        let mut points: Vec<(f64, f64)> = self
            .runs
            .iter()
            .filter(|run| !run.is_collapse())
            .filter_map(|run| run.demand(measure).map(|d| (d, run.im)))
            .filter(|(d, im)| d.is_finite() && im.is_finite())
            .collect();

        if points.len() < 2 {
            return Err(NlthaError::InsufficientData {
                record: self.record.clone(),
                reason: format!("{} valid run(s), at least 2 needed", points.len()),
            });
        }

        points.sort_by(|a, b| a.1.total_cmp(&b.1));
        let mut demand = vec![0.0];
        let mut im = vec![0.0];
        for (d, i) in points {
            if d > demand[demand.len() - 1] {
                demand.push(d);
                im.push(i);
            }
        }

        Ok((demand, im))
    }
}

/// Demand axis of the capacity curves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DemandMeasure {
    #[default]
    PeakDrift,
    RoofDisplacement,
}

/// Interpolation of record curves onto the demand grid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    Linear,
    #[default]
    CubicSpline,
}

/// Options for the capacity summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    pub demand: DemandMeasure,
    pub interpolation: Interpolation,
    pub grid_points: usize,
    /// Upper end of the demand grid; defaults to the largest demand observed
    pub grid_max: Option<f64>,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            demand: DemandMeasure::PeakDrift,
            interpolation: Interpolation::CubicSpline,
            grid_points: 200,
            grid_max: None,
        }
    }
}

/// One record's curve and its values on the demand grid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordCurve {
    pub record: String,
    pub demand: Vec<f64>,
    pub im: Vec<f64>,
    /// IM on the summary grid; NaN past the last point of an incomplete record
    pub im_grid: Vec<f64>,
    pub capacity_im: Option<f64>,
}

/// 16th, 50th and 84th percentile IM on the demand grid
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Quantiles {
    pub p16: Vec<f64>,
    pub p50: Vec<f64>,
    pub p84: Vec<f64>,
}

/// Cross-record capacity summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacitySummary {
    pub grid: Vec<f64>,
    pub curves: Vec<RecordCurve>,
    pub quantiles: Quantiles,
    /// Records left out for lack of data
    pub skipped: Vec<String>,
}

impl CapacitySummary {
    /// Build the summary. Records with fewer than two surviving runs are
    /// skipped with a warning.
    pub fn build(records: &[RecordCapacity], settings: &AggregationSettings) -> Self {
        let mut curves = Vec::new();
        let mut skipped = Vec::new();

        for capacity in records {
            match capacity.curve(settings.demand) {
                Ok((demand, im)) => curves.push(RecordCurve {
                    record: capacity.record.clone(),
                    demand,
                    im,
                    im_grid: Vec::new(),
                    capacity_im: capacity.capacity.map(|c| c.im),
                }),
                Err(e) => {
                    log::warn!("Skipping record in capacity summary: {}", e);
                    skipped.push(capacity.record.clone());
                }
            }
        }

        let grid_max = settings.grid_max.unwrap_or_else(|| {
            curves
                .iter()
                .filter_map(|c| c.demand.last().copied())
                .fold(0.0, f64::max)
        });
        let grid = if curves.is_empty() || !(grid_max > 0.0) {
            Vec::new()
        } else {
            math::linspace(0.0, grid_max, settings.grid_points)
        };

        for curve in &mut curves {
            curve.im_grid = project(curve, &grid, settings.interpolation);
        }

        let quantiles = if grid.is_empty() {
            Quantiles::default()
        } else {
            let at = |q: f64| -> Vec<f64> {
                (0..grid.len())
                    .map(|g| {
                        let column: Vec<f64> = curves.iter().map(|c| c.im_grid[g]).collect();
                        math::percentile(&column, q)
                    })
                    .collect()
            };
            Quantiles {
                p16: at(16.0),
                p50: at(50.0),
                p84: at(84.0),
            }
        };

        log::info!(
            "Capacity summary: {} record(s) used, {} skipped, {} grid points",
            curves.len(),
            skipped.len(),
            grid.len()
        );

        Self {
            grid,
            curves,
            quantiles,
            skipped,
        }
    }
}

/// Values of a record curve on the grid; the capacity IM extends a collapsed
/// record past its last point
fn project(curve: &RecordCurve, grid: &[f64], interpolation: Interpolation) -> Vec<f64> {
    let spline = match interpolation {
        Interpolation::CubicSpline => CubicSpline::natural(&curve.demand, &curve.im),
        Interpolation::Linear => None,
    };
    let last = curve.demand.last().copied().unwrap_or(0.0);

    grid.iter()
        .map(|&d| {
            if d <= last {
                spline
                    .as_ref()
                    .and_then(|s| s.eval_bounded(d))
                    .or_else(|| math::interp_linear(&curve.demand, &curve.im, d))
                    .unwrap_or(f64::NAN)
            } else {
                curve.capacity_im.unwrap_or(f64::NAN)
            }
        })
        .collect()
}

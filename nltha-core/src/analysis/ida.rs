//! Incremental dynamic analysis: hunt, bisect and fill
//!
//! [`IdaStateMachine`] only decides which intensity level to run next; it
//! never touches a record or a solver. [`IdaAnalysis`] drives it against a
//! [`ResponseDriver`] for one record.
//!
//! Hunting starts at `first_int` and grows the step by `incr_step` after every
//! surviving run (0.05, 0.10, 0.20, 0.35, 0.55, ... for the defaults). The
//! first collapse brackets the capacity between the highest surviving level
//! (or zero) and the collapsing level; bisection halves that bracket until it
//! is narrower than `tolerance`. Filling then runs the midpoint of the widest
//! gap between surviving levels until the budget is spent or every gap is
//! narrower than `tolerance`.

use serde::{Deserialize, Serialize};

use crate::driver::{AnalysisSettings, ResponseDriver, SolverSession};
use crate::error::{NlthaError, NlthaResult};
use crate::intensity::{intensity, ImSettings};
use crate::records::Record;
use crate::results::{RecordCapacity, Run};

/// Phase of the IDA state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Hunting,
    Bisecting,
    Filling,
    Done,
}

/// Why a record's run sequence ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Bisection converged; filling ran out of budget or gaps
    Converged,
    /// Budget spent while the capacity bracket was still wider than the tolerance
    BudgetExhausted,
    /// No collapse within the run budget; the record is incomplete
    CapacityNotFound,
}

/// What the intensity levels of the state machine measure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntensityBasis {
    /// Levels are scale factors applied to the record
    ScaleFactor,
    /// Levels are target intensity measures; the record is scaled to reach them
    #[default]
    SpectralAcceleration,
}

/// Hunt/bisect/fill parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdaSettings {
    pub first_int: f64,
    pub incr_step: f64,
    pub max_runs: usize,
    /// Absolute bracket width at which bisection stops
    pub tolerance: f64,
    /// Drift capacity (%)
    pub drift_capacity: f64,
    pub basis: IntensityBasis,
}

impl Default for IdaSettings {
    fn default() -> Self {
        Self {
            first_int: 0.05,
            incr_step: 0.05,
            max_runs: 15,
            tolerance: 0.01,
            drift_capacity: 10.0,
            basis: IntensityBasis::SpectralAcceleration,
        }
    }
}

impl IdaSettings {
    pub fn with_max_runs(mut self, max_runs: usize) -> Self {
        self.max_runs = max_runs;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_basis(mut self, basis: IntensityBasis) -> Self {
        self.basis = basis;
        self
    }

    pub fn with_increments(mut self, first_int: f64, incr_step: f64) -> Self {
        self.first_int = first_int;
        self.incr_step = incr_step;
        self
    }

    pub fn with_drift_capacity(mut self, drift_capacity: f64) -> Self {
        self.drift_capacity = drift_capacity;
        self
    }

    pub fn validate(&self) -> NlthaResult<()> {
        let positive = [
            ("first_int", self.first_int),
            ("incr_step", self.incr_step),
            ("tolerance", self.tolerance),
            ("drift_capacity", self.drift_capacity),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(NlthaError::config(name, format!("must be positive, got {}", value)));
            }
        }
        if self.max_runs == 0 {
            return Err(NlthaError::config("max_runs", "run budget must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Hunting { next: f64, step: f64 },
    Bisecting { lower: f64, upper: f64 },
    Filling,
    Done(Termination),
}

/// Chooses intensity levels for one record from the outcomes of earlier runs
#[derive(Debug, Clone)]
pub struct IdaStateMachine {
    settings: IdaSettings,
    state: State,
    issued: usize,
    pending: Option<(f64, Phase)>,
    /// Every level run so far with its survival flag, ascending by level
    visited: Vec<(f64, bool)>,
    /// Bracket at the hunt -> bisect transition
    hunt_bracket: Option<(f64, f64)>,
}

impl IdaStateMachine {
    pub fn new(settings: IdaSettings) -> Self {
        let state = State::Hunting {
            next: settings.first_int,
            step: settings.incr_step,
        };
        Self {
            settings,
            state,
            issued: 0,
            pending: None,
            visited: Vec::new(),
            hunt_bracket: None,
        }
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::Hunting { .. } => Phase::Hunting,
            State::Bisecting { .. } => Phase::Bisecting,
            State::Filling => Phase::Filling,
            State::Done(_) => Phase::Done,
        }
    }

    pub fn termination(&self) -> Option<Termination> {
        match self.state {
            State::Done(termination) => Some(termination),
            _ => None,
        }
    }

    /// Current capacity bracket while bisecting
    pub fn bracket(&self) -> Option<(f64, f64)> {
        match self.state {
            State::Bisecting { lower, upper } => Some((lower, upper)),
            _ => None,
        }
    }

    /// Bracket established when the hunt first found a collapse
    pub fn hunt_bracket(&self) -> Option<(f64, f64)> {
        self.hunt_bracket
    }

    /// Levels issued so far
    pub fn runs_issued(&self) -> usize {
        self.issued
    }

    /// Next level to run and the phase issuing it; `None` once done.
    /// Until [`observe`](Self::observe) is called the same level is returned.
    pub fn next_level(&mut self) -> Option<(f64, Phase)> {
        if let Some(pending) = self.pending {
            return Some(pending);
        }

        if self.issued >= self.settings.max_runs {
            let termination = match self.state {
                State::Hunting { .. } => Termination::CapacityNotFound,
                State::Bisecting { .. } => Termination::BudgetExhausted,
                State::Filling => Termination::Converged,
                State::Done(termination) => termination,
            };
            self.state = State::Done(termination);
            return None;
        }

        let state = self.state;
        let issued = match state {
            State::Hunting { next, .. } => (next, Phase::Hunting),
            State::Bisecting { lower, upper } => (0.5 * (lower + upper), Phase::Bisecting),
            State::Filling => match self.widest_gap() {
                Some((lower, upper)) if upper - lower >= self.settings.tolerance => {
                    (0.5 * (lower + upper), Phase::Filling)
                }
                _ => {
                    self.state = State::Done(Termination::Converged);
                    return None;
                }
            },
            State::Done(_) => return None,
        };

        self.issued += 1;
        self.pending = Some(issued);
        Some(issued)
    }

    /// Report whether the pending level collapsed
    pub fn observe(&mut self, collapsed: bool) {
        let Some((level, _)) = self.pending.take() else {
            log::warn!("IDA outcome reported with no pending level; ignored");
            return;
        };

        let at = self.visited.partition_point(|&(l, _)| l < level);
        self.visited.insert(at, (level, !collapsed));

        let state = self.state;
        self.state = match state {
            State::Hunting { step, .. } if !collapsed => State::Hunting {
                next: level + step,
                step: step + self.settings.incr_step,
            },
            State::Hunting { .. } => {
                let lower = self
                    .visited
                    .iter()
                    .rev()
                    .find(|(_, survived)| *survived)
                    .map(|(l, _)| *l)
                    .unwrap_or(0.0);
                log::debug!("Collapse at level {:.4}; bracket [{:.4}, {:.4}]", level, lower, level);
                self.hunt_bracket = Some((lower, level));
                self.narrowed(lower, level)
            }
            State::Bisecting { lower, upper } => {
                if collapsed {
                    self.narrowed(lower, level)
                } else {
                    self.narrowed(level, upper)
                }
            }
            other => other,
        };
    }

    fn narrowed(&self, lower: f64, upper: f64) -> State {
        if upper - lower < self.settings.tolerance {
            State::Filling
        } else {
            State::Bisecting { lower, upper }
        }
    }

    /// Widest interval between neighbouring levels that both survived
    fn widest_gap(&self) -> Option<(f64, f64)> {
        self.visited
            .windows(2)
            .filter(|w| w[0].1 && w[1].1)
            .map(|w| (w[0].0, w[1].0))
            .max_by(|a, b| (a.1 - a.0).total_cmp(&(b.1 - b.0)))
    }
}

/// Runs the state machine for a record against a response driver
#[derive(Debug, Clone)]
pub struct IdaAnalysis {
    pub settings: IdaSettings,
    pub im: ImSettings,
    pub analysis: AnalysisSettings,
}

impl IdaAnalysis {
    pub fn new(settings: IdaSettings, im: ImSettings, analysis: AnalysisSettings) -> Self {
        Self {
            settings,
            im,
            analysis,
        }
    }

    /// Trace the IDA curve of one record.
    ///
    /// Non-convergence becomes a collapsed run. Driver errors abort the record
    /// (the solver state is still wiped).
    pub fn trace<D: ResponseDriver + ?Sized>(&self, record: &Record, driver: &mut D) -> NlthaResult<RecordCapacity> {
        let unit_im = intensity(record, 1.0, &self.im)?;
        if self.settings.basis == IntensityBasis::SpectralAcceleration && !(unit_im > 0.0) {
            return Err(NlthaError::InsufficientData {
                record: record.name.clone(),
                reason: "unscaled intensity is zero, record cannot be scaled to a target".to_string(),
            });
        }

        let mut machine = IdaStateMachine::new(self.settings.clone());
        let mut runs = Vec::new();

        while let Some((level, phase)) = machine.next_level() {
            let scale = match self.settings.basis {
                IntensityBasis::ScaleFactor => level,
                IntensityBasis::SpectralAcceleration => level / unit_im,
            };
            let im = intensity(record, scale, &self.im)?;

            let response = {
                let mut session = SolverSession::open(driver);
                session.run(record, scale, &self.analysis)?
            };

            let run = Run::new(runs.len(), Some(phase), level, scale, im, response, self.settings.drift_capacity);
            log::info!(
                "[{}] run {} {:?}: level {:.4}, scale {:.4}, IM {:.4} -> {:?}",
                record.name,
                run.index + 1,
                phase,
                level,
                scale,
                im,
                run.status
            );

            machine.observe(run.is_collapse());
            runs.push(run);
        }

        let termination = machine.termination().unwrap_or(Termination::BudgetExhausted);
        if termination == Termination::CapacityNotFound {
            log::warn!(
                "[{}] no collapse within {} runs; record marked incomplete",
                record.name,
                self.settings.max_runs
            );
        }

        Ok(RecordCapacity::new(&record.name, runs, termination))
    }
}

//! NLTHA Core - record scaling and collapse capacity for nonlinear time-history analysis
//!
//! This library holds the solver-independent part of incremental dynamic
//! analysis (IDA) and multiple stripe analysis (MSA) of building frames:
//! - Ground-motion records and their plain-text manifests
//! - Intensity measures (PGA, spectral acceleration)
//! - The hunt/bisect/fill state machine that picks the next record scale
//! - Fixed-intensity stripes
//! - Quantile capacity curves across records
//!
//! The structural solver is reached through the [`driver::ResponseDriver`]
//! trait.
//!
//! ## Example
//! ```rust
//! use nltha_core::prelude::*;
//!
//! let plan = AnalysisOptions::ida(vec![1.0])
//!     .with_max_runs(10)
//!     .with_intensity_basis(IntensityBasis::ScaleFactor)
//!     .plan()
//!     .unwrap();
//! let ida = plan.ida_analysis().unwrap();
//!
//! let record = Record::new("GM1", 0.01, vec![vec![0.0, 0.3, -0.2, 0.1]]).unwrap();
//!
//! // Survives up to a scale of 0.5, fails to converge above
//! let mut driver = ThresholdDriver::new(0.5, DriftModel::Constant(2.0));
//! let capacity = ida.trace(&record, &mut driver).unwrap();
//!
//! assert!(capacity.runs.len() <= 10);
//! assert!(capacity.capacity.unwrap().scale > 0.5);
//! ```

pub mod analysis;
pub mod driver;
pub mod error;
pub mod intensity;
pub mod math;
pub mod records;
pub mod results;

// Re-export common types
pub mod prelude {
    pub use crate::analysis::{
        AnalysisOptions, AnalysisPlan, AnalysisType, IdaAnalysis, IdaSettings, IdaStateMachine,
        IntensityBasis, MsaSettings, Phase, StripeAnalysis, StripeResult, Termination,
    };
    pub use crate::driver::{
        AnalysisSettings, DriftModel, Response, ResponseDriver, SolverSession, ThresholdDriver,
    };
    pub use crate::error::{NlthaError, NlthaResult};
    pub use crate::intensity::{ImSettings, ImType};
    pub use crate::records::{GroundMotionManifest, Record, RecordEntry, RecordStore};
    pub use crate::results::{
        AggregationSettings, CapacityPoint, CapacitySummary, DemandMeasure, Interpolation,
        RecordCapacity, Run, RunStatus,
    };
}

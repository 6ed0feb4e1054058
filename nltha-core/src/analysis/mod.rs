//! Analysis types, options and the validated analysis plan

pub mod ida;
pub mod msa;

use serde::{Deserialize, Serialize};

use crate::driver::AnalysisSettings;
use crate::error::{NlthaError, NlthaResult};
use crate::intensity::{ImSettings, ImType};
use crate::results::AggregationSettings;

pub use ida::{IdaAnalysis, IdaSettings, IdaStateMachine, IntensityBasis, Phase, Termination};
pub use msa::{MsaSettings, StripeAnalysis, StripeResult};

/// Type of nonlinear time-history analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisType {
    /// Incremental dynamic analysis
    #[serde(rename = "IDA")]
    Ida,
    /// Multiple stripe analysis
    #[serde(rename = "MSA")]
    Msa,
}

impl AnalysisType {
    /// Parse an analysis tag ("IDA" or "MSA")
    pub fn parse(tag: &str) -> NlthaResult<Self> {
        match tag.trim() {
            "IDA" => Ok(Self::Ida),
            "MSA" => Ok(Self::Msa),
            other => Err(NlthaError::config(
                "analysis_type",
                format!("unsupported analysis type '{}'; only 'IDA' and 'MSA' are available", other),
            )),
        }
    }
}

/// Options for a batch of nonlinear time-history analyses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Requested analysis tags; a single tag or a list
    #[serde(deserialize_with = "one_or_many")]
    pub analysis_type: Vec<String>,
    /// Fundamental periods (s); required for IDA
    pub periods_ida: Option<Vec<f64>>,
    pub damping: f64,
    pub im_type: ImType,
    /// IDA run budget per record
    pub max_runs: Option<usize>,
    pub first_int: f64,
    pub incr_step: f64,
    pub tolerance: f64,
    pub intensity_basis: IntensityBasis,
    /// Drift capacity (%)
    pub drift_capacity: f64,
    pub analysis_time_step: Option<f64>,
    pub flag3d: bool,
    pub direction: usize,
    pub export_at_each_step: bool,
    /// Target IM per MSA stripe; records run unscaled when absent
    pub msa_targets: Option<Vec<f64>>,
    /// Capacity summary options (`demand`, `interpolation`, `grid_points`, `grid_max`)
    #[serde(flatten)]
    pub aggregation: AggregationSettings,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        let ida = IdaSettings::default();
        Self {
            analysis_type: Vec::new(),
            periods_ida: None,
            damping: 0.05,
            im_type: ImType::Sa,
            max_runs: Some(ida.max_runs),
            first_int: ida.first_int,
            incr_step: ida.incr_step,
            tolerance: ida.tolerance,
            intensity_basis: ida.basis,
            drift_capacity: ida.drift_capacity,
            analysis_time_step: None,
            flag3d: false,
            direction: 0,
            export_at_each_step: true,
            msa_targets: None,
            aggregation: AggregationSettings::default(),
        }
    }
}

impl AnalysisOptions {
    /// Options for an IDA batch
    pub fn ida(periods: Vec<f64>) -> Self {
        Self {
            analysis_type: vec!["IDA".to_string()],
            periods_ida: Some(periods),
            ..Self::default()
        }
    }

    /// Options for an MSA batch
    pub fn msa() -> Self {
        Self {
            analysis_type: vec!["MSA".to_string()],
            ..Self::default()
        }
    }

    pub fn with_max_runs(mut self, max_runs: usize) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    pub fn with_time_step(mut self, dt: f64) -> Self {
        self.analysis_time_step = Some(dt);
        self
    }

    pub fn with_drift_capacity(mut self, drift_capacity: f64) -> Self {
        self.drift_capacity = drift_capacity;
        self
    }

    pub fn with_intensity_basis(mut self, basis: IntensityBasis) -> Self {
        self.intensity_basis = basis;
        self
    }

    /// Validate every option and resolve the plan. Nothing is loaded or run.
    pub fn plan(&self) -> NlthaResult<AnalysisPlan> {
        if self.analysis_type.is_empty() {
            return Err(NlthaError::config("analysis_type", "no analysis requested"));
        }
        let mut types = Vec::new();
        for tag in &self.analysis_type {
            let analysis_type = AnalysisType::parse(tag)?;
            if !types.contains(&analysis_type) {
                types.push(analysis_type);
            }
        }

        if !(0.0..1.0).contains(&self.damping) {
            return Err(NlthaError::config(
                "damping",
                format!("damping ratio must be in [0, 1), got {}", self.damping),
            ));
        }
        if let Some(dt) = self.analysis_time_step {
            if !(dt > 0.0) {
                return Err(NlthaError::config(
                    "analysis_time_step",
                    format!("must be positive, got {}", dt),
                ));
            }
        }
        if self.direction > 1 {
            return Err(NlthaError::config(
                "direction",
                format!("expected 0 (X) or 1 (Y), got {}", self.direction),
            ));
        }
        if self.aggregation.grid_points < 2 {
            return Err(NlthaError::config("grid_points", "at least 2 grid points are needed"));
        }

        let periods = self.periods_ida.clone().unwrap_or_default();
        let wants_ida = types.contains(&AnalysisType::Ida);
        let wants_msa = types.contains(&AnalysisType::Msa);

        let ida = if wants_ida {
            match &self.periods_ida {
                None => {
                    return Err(NlthaError::config(
                        "periods_ida",
                        "IDA requested but 'periods_ida' was not provided",
                    ))
                }
                Some(p) if p.is_empty() => {
                    return Err(NlthaError::config("periods_ida", "IDA requested with an empty period list"))
                }
                Some(_) => {}
            }
            let max_runs = self.max_runs.ok_or_else(|| {
                NlthaError::config("max_runs", "IDA requested but no run budget was given")
            })?;
            let settings = IdaSettings {
                first_int: self.first_int,
                incr_step: self.incr_step,
                max_runs,
                tolerance: self.tolerance,
                drift_capacity: self.drift_capacity,
                basis: self.intensity_basis,
            };
            settings.validate()?;
            Some(settings)
        } else {
            None
        };

        let msa = if wants_msa {
            if self.msa_targets.is_some() && periods.is_empty() && self.im_type == ImType::Sa {
                return Err(NlthaError::config(
                    "periods_ida",
                    "MSA stripe targets in Sa need 'periods_ida'",
                ));
            }
            if let Some(targets) = &self.msa_targets {
                if let Some(bad) = targets.iter().find(|t| !(**t > 0.0)) {
                    return Err(NlthaError::config(
                        "msa_targets",
                        format!("stripe targets must be positive, got {}", bad),
                    ));
                }
            }
            Some(MsaSettings {
                targets: self.msa_targets.clone(),
            })
        } else {
            None
        };

        // Without periods only PGA can be computed (MSA-only batches)
        let im_type = if periods.is_empty() { ImType::Pga } else { self.im_type };
        let im = ImSettings::new(periods.clone(), self.damping).with_im_type(im_type);
        if !periods.is_empty() {
            im.validate()?;
        }

        let analysis = AnalysisSettings {
            time_step: self.analysis_time_step,
            damping: self.damping,
            periods,
            flag3d: self.flag3d,
            direction: self.direction,
            drift_capacity: self.drift_capacity,
            export_at_each_step: self.export_at_each_step,
        };

        Ok(AnalysisPlan {
            ida,
            msa,
            im,
            analysis,
            aggregation: self.aggregation.clone(),
        })
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(tag) => vec![tag],
        OneOrMany::Many(tags) => tags,
    })
}

/// Validated settings for every requested analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisPlan {
    pub ida: Option<IdaSettings>,
    pub msa: Option<MsaSettings>,
    pub im: ImSettings,
    pub analysis: AnalysisSettings,
    pub aggregation: AggregationSettings,
}

impl AnalysisPlan {
    /// IDA driver for the plan, if IDA was requested
    pub fn ida_analysis(&self) -> Option<IdaAnalysis> {
        self.ida
            .clone()
            .map(|settings| IdaAnalysis::new(settings, self.im.clone(), self.analysis.clone()))
    }

    /// MSA driver for the plan, if MSA was requested
    pub fn stripe_analysis(&self) -> Option<StripeAnalysis> {
        self.msa
            .clone()
            .map(|settings| StripeAnalysis::new(settings, self.im.clone(), self.analysis.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_analysis_type() {
        assert_eq!(AnalysisType::parse("IDA").unwrap(), AnalysisType::Ida);
        assert_eq!(AnalysisType::parse("MSA").unwrap(), AnalysisType::Msa);
        let err = AnalysisType::parse("Pushover").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("analysis_type"));
    }

    #[test]
    fn test_ida_without_periods_is_rejected() {
        let options = AnalysisOptions {
            analysis_type: vec!["IDA".to_string()],
            ..AnalysisOptions::default()
        };
        let err = options.plan().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("periods_ida"));
    }

    #[test]
    fn test_ida_without_budget_is_rejected() {
        let options = AnalysisOptions {
            max_runs: None,
            ..AnalysisOptions::ida(vec![1.0])
        };
        let err = options.plan().unwrap_err();
        assert!(err.to_string().contains("max_runs"));
    }

    #[test]
    fn test_non_positive_period_is_rejected() {
        let err = AnalysisOptions::ida(vec![-1.0]).plan().unwrap_err();
        assert!(matches!(err, NlthaError::InvalidPeriod(_)));
        assert!(AnalysisOptions::ida(vec![]).plan().is_err());
    }

    #[test]
    fn test_nothing_requested_is_rejected() {
        assert!(AnalysisOptions::default().plan().unwrap_err().is_configuration());
    }

    #[test]
    fn test_ida_plan() {
        let plan = AnalysisOptions::ida(vec![0.96, 1.03])
            .with_max_runs(10)
            .with_time_step(0.01)
            .plan()
            .unwrap();
        let ida = plan.ida.unwrap();
        assert_eq!(ida.max_runs, 10);
        assert_eq!(plan.im.periods, vec![0.96, 1.03]);
        assert_eq!(plan.analysis.time_step, Some(0.01));
        assert!(plan.msa.is_none());
    }

    #[test]
    fn test_msa_only_falls_back_to_pga() {
        let plan = AnalysisOptions::msa().plan().unwrap();
        assert!(plan.ida.is_none());
        assert_eq!(plan.im.im_type, ImType::Pga);
    }

    #[test]
    fn test_options_from_json_defaults() {
        let options: AnalysisOptions =
            serde_json::from_str(r#"{"analysis_type": ["IDA"], "periods_ida": [0.96]}"#).unwrap();
        assert_eq!(options.max_runs, Some(15));
        assert_eq!(options.aggregation.grid_points, 200);
        assert!(options.plan().is_ok());

        let coarse: AnalysisOptions =
            serde_json::from_str(r#"{"analysis_type": "IDA", "periods_ida": [1.0], "grid_points": 50}"#).unwrap();
        assert_eq!(coarse.aggregation.grid_points, 50);

        let single: AnalysisOptions =
            serde_json::from_str(r#"{"analysis_type": "MSA"}"#).unwrap();
        assert_eq!(single.analysis_type, vec!["MSA".to_string()]);
    }
}

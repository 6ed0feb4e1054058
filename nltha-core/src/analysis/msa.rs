//! Multiple stripe analysis
//!
//! Every record of a stripe is run once, at a scale fixed before the run:
//! either unscaled (records already selected for the stripe's intensity) or
//! scaled to the stripe's target IM.

use serde::{Deserialize, Serialize};

use crate::driver::{AnalysisSettings, ResponseDriver, SolverSession};
use crate::error::{NlthaError, NlthaResult};
use crate::intensity::{intensity, ImSettings};
use crate::records::Record;
use crate::results::Run;

/// Stripe options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MsaSettings {
    /// Target IM per stripe, in stripe order
    pub targets: Option<Vec<f64>>,
}

/// Outcome of one record in a stripe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeRecord {
    pub record: String,
    pub run: Option<Run>,
    /// Why the record has no run
    pub error: Option<String>,
}

/// All records of one stripe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripeResult {
    pub name: String,
    pub target_im: Option<f64>,
    pub records: Vec<StripeRecord>,
}

impl StripeResult {
    /// Fraction of completed runs that collapsed
    pub fn collapse_fraction(&self) -> Option<f64> {
        let runs: Vec<&Run> = self.records.iter().filter_map(|r| r.run.as_ref()).collect();
        if runs.is_empty() {
            return None;
        }
        let collapsed = runs.iter().filter(|run| run.is_collapse()).count();
        Some(collapsed as f64 / runs.len() as f64)
    }
}

/// Runs stripes against a response driver
#[derive(Debug, Clone)]
pub struct StripeAnalysis {
    pub settings: MsaSettings,
    pub im: ImSettings,
    pub analysis: AnalysisSettings,
}

impl StripeAnalysis {
    pub fn new(settings: MsaSettings, im: ImSettings, analysis: AnalysisSettings) -> Self {
        Self {
            settings,
            im,
            analysis,
        }
    }

    /// Check that there is one target per stripe when targets are given
    pub fn check_stripe_count(&self, stripes: usize) -> NlthaResult<()> {
        match &self.settings.targets {
            Some(targets) if targets.len() != stripes => Err(NlthaError::config(
                "msa_targets",
                format!("{} targets given for {} stripes", targets.len(), stripes),
            )),
            _ => Ok(()),
        }
    }

    /// Run every record of a stripe once. Record-level failures are kept in
    /// the result and do not stop the stripe.
    pub fn run_stripe<D: ResponseDriver + ?Sized>(
        &self,
        name: &str,
        index: usize,
        records: &[Record],
        driver: &mut D,
    ) -> StripeResult {
        let target_im = self
            .settings
            .targets
            .as_ref()
            .and_then(|targets| targets.get(index).copied());

        let outcomes = records
            .iter()
            .map(|record| match self.run_record(record, target_im, driver) {
                Ok(run) => StripeRecord {
                    record: record.name.clone(),
                    run: Some(run),
                    error: None,
                },
                Err(e) => {
                    log::warn!("[{}] record {} failed: {}", name, record.name, e);
                    StripeRecord {
                        record: record.name.clone(),
                        run: None,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect();

        let result = StripeResult {
            name: name.to_string(),
            target_im,
            records: outcomes,
        };
        log::info!(
            "[{}] stripe done: {} record(s), collapse fraction {:?}",
            name,
            result.records.len(),
            result.collapse_fraction()
        );
        result
    }

    fn run_record<D: ResponseDriver + ?Sized>(
        &self,
        record: &Record,
        target_im: Option<f64>,
        driver: &mut D,
    ) -> NlthaResult<Run> {
        let scale = match target_im {
            Some(target) => {
                let unit_im = intensity(record, 1.0, &self.im)?;
                if !(unit_im > 0.0) {
                    return Err(NlthaError::InsufficientData {
                        record: record.name.clone(),
                        reason: "unscaled intensity is zero".to_string(),
                    });
                }
                target / unit_im
            }
            None => 1.0,
        };
        let im = intensity(record, scale, &self.im)?;

        let response = {
            let mut session = SolverSession::open(driver);
            session.run(record, scale, &self.analysis)?
        };

        Ok(Run::new(0, None, scale, scale, im, response, self.analysis.drift_capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriftModel, ThresholdDriver};
    use crate::intensity::ImType;
    use approx::assert_relative_eq;

    fn records() -> Vec<Record> {
        vec![
            Record::new("a", 0.01, vec![vec![0.0, 0.2, -0.1]]).unwrap(),
            Record::new("b", 0.01, vec![vec![0.0, -0.4, 0.1]]).unwrap(),
        ]
    }

    fn analysis(targets: Option<Vec<f64>>) -> StripeAnalysis {
        StripeAnalysis::new(
            MsaSettings { targets },
            ImSettings::new(Vec::new(), 0.05).with_im_type(ImType::Pga),
            AnalysisSettings::default(),
        )
    }

    #[test]
    fn test_unscaled_stripe() {
        let mut driver = ThresholdDriver::new(2.0, DriftModel::Constant(1.0));
        let result = analysis(None).run_stripe("stripe_1", 0, &records(), &mut driver);

        assert_eq!(driver.calls, vec![1.0, 1.0]);
        assert_eq!(driver.wipes, 2);
        assert_relative_eq!(result.records[1].run.as_ref().unwrap().im, 0.4);
        assert_eq!(result.collapse_fraction(), Some(0.0));
    }

    #[test]
    fn test_stripe_scaled_to_target() {
        let mut driver = ThresholdDriver::new(1.0, DriftModel::Constant(1.0));
        let result = analysis(Some(vec![0.8])).run_stripe("stripe_1", 0, &records(), &mut driver);

        // a: 0.8 / 0.2 = 4.0 (collapse), b: 0.8 / 0.4 = 2.0 (collapse)
        assert_relative_eq!(driver.calls[0], 4.0);
        assert_relative_eq!(driver.calls[1], 2.0);
        for record in &result.records {
            assert_relative_eq!(record.run.as_ref().unwrap().im, 0.8, epsilon = 1e-12);
        }
        assert_eq!(result.collapse_fraction(), Some(1.0));
    }

    #[test]
    fn test_stripe_count_mismatch() {
        let err = analysis(Some(vec![0.2, 0.4])).check_stripe_count(3).unwrap_err();
        assert!(err.is_configuration());
        assert!(analysis(None).check_stripe_count(3).is_ok());
    }
}

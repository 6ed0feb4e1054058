//! Intensity measures of scaled ground-motion records
//!
//! Spectral accelerations are pseudo-accelerations `ω² · max|u|` of a linear
//! single-degree-of-freedom oscillator with unit mass, integrated with
//! Newmark's average-acceleration scheme. Everything here is a pure function
//! of its inputs.

use serde::{Deserialize, Serialize};

use crate::error::{NlthaError, NlthaResult};
use crate::records::Record;

/// Intensity measure type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImType {
    /// Peak ground acceleration
    Pga,
    /// Spectral acceleration at the target period(s)
    #[default]
    Sa,
}

/// Settings for intensity measure computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImSettings {
    pub im_type: ImType,
    /// One or two target periods (s)
    pub periods: Vec<f64>,
    /// Critical damping ratio of the oscillator
    pub damping: f64,
}

impl ImSettings {
    pub fn new(periods: Vec<f64>, damping: f64) -> Self {
        Self {
            im_type: ImType::Sa,
            periods,
            damping,
        }
    }

    pub fn with_im_type(mut self, im_type: ImType) -> Self {
        self.im_type = im_type;
        self
    }

    /// Check the period count, period signs and damping ratio
    pub fn validate(&self) -> NlthaResult<()> {
        if self.periods.is_empty() || self.periods.len() > 2 {
            return Err(NlthaError::config(
                "periods_ida",
                format!("expected one or two periods, got {}", self.periods.len()),
            ));
        }
        for &period in &self.periods {
            check_period(period)?;
        }
        if !(0.0..1.0).contains(&self.damping) {
            return Err(NlthaError::config(
                "damping",
                format!("damping ratio must be in [0, 1), got {}", self.damping),
            ));
        }
        Ok(())
    }
}

fn check_period(period: f64) -> NlthaResult<()> {
    if period > 0.0 && period.is_finite() {
        Ok(())
    } else {
        Err(NlthaError::InvalidPeriod(period))
    }
}

/// Peak absolute value of an acceleration series
pub fn peak_ground_acceleration(accel: &[f64]) -> f64 {
    accel.iter().fold(0.0_f64, |peak, a| peak.max(a.abs()))
}

/// Pseudo-spectral acceleration of a series at one period
pub fn spectral_acceleration(accel: &[f64], dt: f64, period: f64, damping: f64) -> NlthaResult<f64> {
    check_period(period)?;
    let omega = 2.0 * std::f64::consts::PI / period;
    Ok(omega * omega * peak_sdof_displacement(accel, dt, omega, damping))
}

/// Pseudo-spectral accelerations at several periods
pub fn response_spectrum(accel: &[f64], dt: f64, periods: &[f64], damping: f64) -> NlthaResult<Vec<f64>> {
    periods
        .iter()
        .map(|&period| spectral_acceleration(accel, dt, period, damping))
        .collect()
}

/// Intensity of `record` multiplied by `scale`
///
/// With two periods the result is the geometric mean of the two spectral
/// ordinates: component 0 at the first period and component 1 (or component 0
/// again for single-component records) at the second. With one period and two
/// components it is the geometric mean of both components at that period.
pub fn intensity(record: &Record, scale: f64, settings: &ImSettings) -> NlthaResult<f64> {
    let first = record.scaled_component(0, scale);
    let second = if record.num_components() > 1 {
        Some(record.scaled_component(1, scale))
    } else {
        None
    };

    match settings.im_type {
        ImType::Pga => {
            let pga = peak_ground_acceleration(&first);
            Ok(match &second {
                Some(second) => (pga * peak_ground_acceleration(second)).sqrt(),
                None => pga,
            })
        }
        ImType::Sa => match settings.periods.as_slice() {
            [] => Err(NlthaError::config("periods_ida", "no target period given")),
            [period] => {
                let sa = spectral_acceleration(&first, record.dt, *period, settings.damping)?;
                match &second {
                    Some(second) => {
                        let sa2 = spectral_acceleration(second, record.dt, *period, settings.damping)?;
                        Ok((sa * sa2).sqrt())
                    }
                    None => Ok(sa),
                }
            }
            [t1, t2] => {
                let sa1 = spectral_acceleration(&first, record.dt, *t1, settings.damping)?;
                let other = second.as_deref().unwrap_or(&first);
                let sa2 = spectral_acceleration(other, record.dt, *t2, settings.damping)?;
                Ok((sa1 * sa2).sqrt())
            }
            periods => Err(NlthaError::config(
                "periods_ida",
                format!("expected one or two periods, got {}", periods.len()),
            )),
        },
    }
}

/// Peak relative displacement of a unit-mass oscillator under base excitation
fn peak_sdof_displacement(accel: &[f64], dt: f64, omega: f64, damping: f64) -> f64 {
    if accel.is_empty() {
        return 0.0;
    }

    // Sub-step so that each integration step stays below T/20
    let period = 2.0 * std::f64::consts::PI / omega;
    let substeps = ((20.0 * dt / period).ceil() as usize).max(1);
    let h = dt / substeps as f64;

    let (beta, gamma) = (0.25, 0.5);
    let k = omega * omega;
    let c = 2.0 * damping * omega;

    let k_hat = k + gamma / (beta * h) * c + 1.0 / (beta * h * h);
    let a1 = 1.0 / (beta * h) + gamma / beta * c;
    let a2 = 1.0 / (2.0 * beta) + h * (gamma / (2.0 * beta) - 1.0) * c;

    let mut u = 0.0_f64;
    let mut v = 0.0_f64;
    let mut a = -accel[0];
    let mut p_prev = -accel[0];
    let mut peak = 0.0_f64;

    for i in 1..accel.len() {
        let (ag0, ag1) = (accel[i - 1], accel[i]);
        for s in 1..=substeps {
            let frac = s as f64 / substeps as f64;
            let p = -(ag0 + (ag1 - ag0) * frac);

            let dp_hat = (p - p_prev) + a1 * v + a2 * a;
            let du = dp_hat / k_hat;
            let dv = gamma / (beta * h) * du - gamma / beta * v + h * (1.0 - gamma / (2.0 * beta)) * a;
            let da = du / (beta * h * h) - v / (beta * h) - a / (2.0 * beta);

            u += du;
            v += dv;
            a += da;
            p_prev = p;
            peak = peak.max(u.abs());
        }
    }

    peak
}

//! Numeric helpers for capacity curves: grids, interpolation and percentiles

use nalgebra::{DMatrix, DVector};

/// `n` evenly spaced values from `start` to `end` inclusive
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Index `i` of the segment `[xs[i], xs[i + 1]]` containing `x`
fn segment(xs: &[f64], x: f64) -> Option<usize> {
    let n = xs.len();
    if n < 2 || x < xs[0] || x > xs[n - 1] {
        return None;
    }
    let upper = xs.partition_point(|&xi| xi <= x);
    Some(upper.saturating_sub(1).min(n - 2))
}

/// Piecewise-linear interpolation; `None` outside the data range
pub fn interp_linear(xs: &[f64], ys: &[f64], x: f64) -> Option<f64> {
    let i = segment(xs, x)?;
    let h = xs[i + 1] - xs[i];
    if h <= 0.0 {
        return Some(ys[i]);
    }
    let t = (x - xs[i]) / h;
    Some(ys[i] + t * (ys[i + 1] - ys[i]))
}

/// Natural cubic spline through strictly increasing abscissae
#[derive(Debug, Clone)]
pub struct CubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Second derivatives at the knots
    moments: Vec<f64>,
}

impl CubicSpline {
    /// Fit a natural spline. Returns `None` for fewer than two knots,
    /// non-increasing abscissae or a singular system.
    pub fn natural(xs: &[f64], ys: &[f64]) -> Option<Self> {
        let n = xs.len();
        if n < 2 || ys.len() != n || xs.windows(2).any(|w| w[1] <= w[0]) {
            return None;
        }

        let mut moments = vec![0.0; n];
        if n > 2 {
            let m = n - 2;
            let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
            let mut a = DMatrix::<f64>::zeros(m, m);
            let mut rhs = DVector::<f64>::zeros(m);

            for row in 0..m {
                let i = row + 1;
                a[(row, row)] = 2.0 * (h[i - 1] + h[i]);
                if row > 0 {
                    a[(row, row - 1)] = h[i - 1];
                }
                if row + 1 < m {
                    a[(row, row + 1)] = h[i];
                }
                rhs[row] = 6.0 * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]);
            }

            let solution = a.lu().solve(&rhs)?;
            moments[1..n - 1].copy_from_slice(solution.as_slice());
        }

        Some(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            moments,
        })
    }

    /// Spline value at `x`; `None` outside the knot range
    pub fn eval(&self, x: f64) -> Option<f64> {
        let i = segment(&self.xs, x)?;
        let (x0, x1) = (self.xs[i], self.xs[i + 1]);
        let (y0, y1) = (self.ys[i], self.ys[i + 1]);
        let (m0, m1) = (self.moments[i], self.moments[i + 1]);
        let h = x1 - x0;

        Some(
            m0 * (x1 - x).powi(3) / (6.0 * h)
                + m1 * (x - x0).powi(3) / (6.0 * h)
                + (y0 / h - m0 * h / 6.0) * (x1 - x)
                + (y1 / h - m1 * h / 6.0) * (x - x0),
        )
    }

    /// Spline value limited to the range of the two knots bracketing `x`
    pub fn eval_bounded(&self, x: f64) -> Option<f64> {
        let i = segment(&self.xs, x)?;
        let lo = self.ys[i].min(self.ys[i + 1]);
        let hi = self.ys[i].max(self.ys[i + 1]);
        self.eval(x).map(|y| y.clamp(lo, hi))
    }
}

/// Percentile `q` (0–100) of the finite entries of `values`, interpolating
/// linearly between order statistics. NaN when no entry is finite.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.sort_by(|a, b| a.total_cmp(b));

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (finite.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    finite[lower] + frac * (finite[upper] - finite[lower])
}

//! Univariate slice sampling with stepping out and shrinkage,
//! applied coordinate by coordinate (Neal, 2003).
//!
//! The sampler is made robust to ill-behaved densities: non finite
//! log-densities are read as zero density, stepping out and shrinkage are
//! bounded so that a pathological coordinate keeps its current value instead
//! of looping forever. Fixed coordinates are left untouched (constant step).
use crate::deadline::{self, MaxTime};
use crate::density::{robust_logp, LogDensity};
use crate::errors::{EngineError, Result};
use log::debug;
use ndarray::{Array1, Array2, ArrayView1};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::{Distribution, Exp1};

/// Slice sampler settings
#[derive(Clone, Debug, PartialEq)]
pub struct SliceParams {
    /// Initial width of the slice bracket
    pub width: f64,
    /// Maximum number of stepping out expansions per coordinate
    pub max_steps_out: usize,
    /// Maximum number of shrinkage proposals per coordinate
    pub max_shrink: usize,
}

impl Default for SliceParams {
    fn default() -> Self {
        SliceParams {
            width: 1.0,
            max_steps_out: 32,
            max_shrink: 100,
        }
    }
}

/// Sequence of draws with their log-densities
#[derive(Clone, Debug)]
pub struct Draws {
    /// Draws as rows `(n_draws, dim)`
    pub points: Array2<f64>,
    /// Log-density of each draw
    pub logp: Array1<f64>,
}

/// Robust coordinate-wise slice sampler
#[derive(Clone, Debug, Default)]
pub struct SliceSampler {
    params: SliceParams,
}

impl SliceSampler {
    /// Constructor
    pub fn new(params: SliceParams) -> Self {
        SliceSampler { params }
    }

    /// Settings
    pub fn params(&self) -> &SliceParams {
        &self.params
    }

    fn logp_at(density: &dyn LogDensity, x: &mut Array1<f64>, i: usize, v: f64) -> f64 {
        let saved = x[i];
        x[i] = v;
        let lp = robust_logp(density, &x.view());
        x[i] = saved;
        lp
    }

    /// One sweep over free coordinates, updates `x` and its log-density in place
    pub fn step<R: Rng>(
        &self,
        density: &dyn LogDensity,
        x: &mut Array1<f64>,
        logp: &mut f64,
        fixed: &[bool],
        rng: &mut R,
    ) {
        let w = self.params.width;
        let m = self.params.max_steps_out;
        for i in 0..x.len() {
            if fixed.get(i).copied().unwrap_or(false) {
                continue;
            }
            let e: f64 = Exp1.sample(rng);
            let level = *logp - e;
            let x0 = x[i];

            let mut left = x0 - w * rng.gen::<f64>();
            let mut right = left + w;
            let mut j = (m as f64 * rng.gen::<f64>()).floor() as usize;
            let mut k = m.saturating_sub(1).saturating_sub(j);
            while j > 0 && Self::logp_at(density, x, i, left) > level {
                left -= w;
                j -= 1;
            }
            while k > 0 && Self::logp_at(density, x, i, right) > level {
                right += w;
                k -= 1;
            }

            for _ in 0..self.params.max_shrink {
                let candidate = left + rng.gen::<f64>() * (right - left);
                let lp = Self::logp_at(density, x, i, candidate);
                if lp > level {
                    x[i] = candidate;
                    *logp = lp;
                    break;
                }
                if candidate < x0 {
                    left = candidate;
                } else {
                    right = candidate;
                }
            }
        }
    }

    /// Draw `n_draws` points starting from `x0`
    ///
    /// Coordinates flagged in `fixed` keep their starting value in every draw.
    pub fn sample<R: Rng>(
        &self,
        density: &dyn LogDensity,
        x0: &ArrayView1<f64>,
        fixed: &[bool],
        n_draws: usize,
        deadline: Option<&MaxTime>,
        rng: &mut R,
    ) -> Result<Draws> {
        if x0.len() != density.dim() {
            return Err(EngineError::InvalidValue(format!(
                "starting point of dimension {} for a density of dimension {}",
                x0.len(),
                density.dim()
            )));
        }
        let mut x = x0.to_owned();
        let mut logp = robust_logp(density, &x.view());
        let mut points = Array2::zeros((n_draws, x.len()));
        let mut logps = Array1::zeros(n_draws);
        for n in 0..n_draws {
            deadline::check(deadline)?;
            self.step(density, &mut x, &mut logp, fixed, rng);
            points.row_mut(n).assign(&x);
            logps[n] = logp;
        }
        debug!("Slice sampling: {} draws, last logp={}", n_draws, logp);
        Ok(Draws {
            points,
            logp: logps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::FnDensity;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_rand::rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    #[test]
    fn test_gaussian_moments() {
        let density = FnDensity::new(2, |x| {
            -0.5 * ((x[0] - 1.) / 0.5).powi(2) - 0.5 * (x[1] + 2.).powi(2)
        });
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let draws = SliceSampler::default()
            .sample(&density, &array![0., 0.].view(), &[false, false], 4000, None, &mut rng)
            .unwrap();
        let mean = draws.points.mean_axis(ndarray::Axis(0)).unwrap();
        assert_abs_diff_eq!(mean, array![1., -2.], epsilon = 0.1);
        let std0 = draws.points.column(0).std(0.);
        assert_abs_diff_eq!(std0, 0.5, epsilon = 0.05);
    }

    #[test]
    fn test_fixed_coordinate_held() {
        let density = FnDensity::new(2, |x| -0.5 * x.dot(x));
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let draws = SliceSampler::default()
            .sample(&density, &array![0., 3.].view(), &[false, true], 50, None, &mut rng)
            .unwrap();
        assert!(draws.points.column(1).iter().all(|&v| v == 3.));
        assert!(draws.points.column(0).iter().any(|&v| v != 0.));
    }

    #[test]
    fn test_non_finite_density() {
        // zero density outside [0, 1], NaN at the very center
        let density = FnDensity::new(1, |x| {
            if x[0] == 0.5 {
                f64::NAN
            } else if (0. ..=1.).contains(&x[0]) {
                0.
            } else {
                f64::NEG_INFINITY
            }
        });
        let mut rng = Xoshiro256Plus::seed_from_u64(1);
        let draws = SliceSampler::default()
            .sample(&density, &array![0.2].view(), &[false], 200, None, &mut rng)
            .unwrap();
        assert!(draws.points.iter().all(|v| (0. ..=1.).contains(v)));
        assert!(draws.logp.iter().all(|v| v.is_finite()));
    }
}

//! Mean-field automatic differentiation variational inference.
//!
//! The posterior is approximated by a diagonal gaussian `N(mu, diag(exp(omega))^2)`
//! fitted by stochastic gradient ascent on the evidence lower bound, using the
//! reparameterization `z = mu + exp(omega) * eps`. Gradients of the
//! log-density are computed by central finite differences and the ascent
//! steps follow the Adam update rule.
use crate::deadline::{self, MaxTime};
use crate::density::{robust_logp, LogDensity};
use crate::errors::{EngineError, Result};
use finitediff::FiniteDiff;
use log::{debug, warn};
use ndarray::{Array1, ArrayView1, Zip};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;

/// ADVI settings
#[derive(Clone, Debug, PartialEq)]
pub struct AdviParams {
    /// Number of gradient steps
    pub n_iter: usize,
    /// Number of Monte Carlo draws per gradient estimate
    pub n_mc: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// First moment decay rate
    pub beta1: f64,
    /// Second moment decay rate
    pub beta2: f64,
    /// Small constant for numerical stability
    pub epsilon: f64,
    /// Initial log standard deviation
    pub init_log_std: f64,
}

impl Default for AdviParams {
    fn default() -> Self {
        AdviParams {
            n_iter: 500,
            n_mc: 1,
            learning_rate: 0.05,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            init_log_std: -1.0,
        }
    }
}

/// Fitted mean-field approximation
#[derive(Clone, Debug)]
pub struct Approximation {
    /// Mean of each coordinate
    pub mean: Array1<f64>,
    /// Log standard deviation of each coordinate
    pub log_std: Array1<f64>,
    /// Evidence lower bound estimates along iterations
    pub elbo: Vec<f64>,
}

impl Approximation {
    /// Standard deviation of each coordinate
    pub fn std(&self) -> Array1<f64> {
        self.log_std.mapv(f64::exp)
    }
}

#[derive(Clone, Debug)]
struct AdamState {
    m: Array1<f64>,
    v: Array1<f64>,
    t: i32,
}

impl AdamState {
    fn new(dim: usize) -> Self {
        AdamState {
            m: Array1::zeros(dim),
            v: Array1::zeros(dim),
            t: 0,
        }
    }

    /// Ascent step on `x` along `gradient`
    fn advance(&mut self, params: &AdviParams, x: &mut Array1<f64>, gradient: &Array1<f64>) {
        self.t += 1;
        let (b1, b2) = (params.beta1, params.beta2);
        Zip::from(&mut self.m)
            .and(gradient)
            .for_each(|m, &g| *m = b1 * *m + (1. - b1) * g);
        Zip::from(&mut self.v)
            .and(gradient)
            .for_each(|v, &g| *v = b2 * *v + (1. - b2) * g * g);
        let m_corr = 1. - b1.powi(self.t);
        let v_corr = 1. - b2.powi(self.t);
        Zip::from(x)
            .and(&self.m)
            .and(&self.v)
            .for_each(|x, &m, &v| {
                *x += params.learning_rate * (m / m_corr) / ((v / v_corr).sqrt() + params.epsilon)
            });
    }
}

/// Mean-field ADVI
#[derive(Clone, Debug, Default)]
pub struct Advi {
    params: AdviParams,
}

impl Advi {
    /// Constructor
    pub fn new(params: AdviParams) -> Self {
        Advi { params }
    }

    /// Fit the approximation starting from `x0`, coordinates flagged in `fixed`
    /// keep their starting value and a zero variance
    pub fn fit<R: Rng>(
        &self,
        density: &dyn LogDensity,
        x0: &ArrayView1<f64>,
        fixed: &[bool],
        deadline: Option<&MaxTime>,
        rng: &mut R,
    ) -> Result<Approximation> {
        let dim = density.dim();
        if x0.len() != dim {
            return Err(EngineError::InvalidValue(format!(
                "starting point of dimension {} for a density of dimension {}",
                x0.len(),
                dim
            )));
        }
        let free = Array1::from_shape_fn(dim, |i| {
            if fixed.get(i).copied().unwrap_or(false) {
                0.
            } else {
                1.
            }
        });
        let mut mu = x0.to_owned();
        let mut omega = Array1::from_elem(dim, self.params.init_log_std);
        let mut adam_mu = AdamState::new(dim);
        let mut adam_omega = AdamState::new(dim);
        let mut elbo = Vec::with_capacity(self.params.n_iter);
        let n_mc = self.params.n_mc.max(1);

        for iter in 0..self.params.n_iter {
            if let Err(err) = deadline::check(deadline) {
                warn!("ADVI stopped at iteration {iter}: {err}");
                break;
            }
            let sigma = omega.mapv(f64::exp) * &free;
            let mut grad_mu = Array1::zeros(dim);
            let mut grad_omega = Array1::zeros(dim);
            let mut elbo_est = 0.;
            let mut valid = true;
            for _ in 0..n_mc {
                let eps: Array1<f64> = Array1::random_using(dim, StandardNormal, rng);
                let z = &mu + &(&sigma * &eps);
                let lp = robust_logp(density, &z.view());
                let f = |x: &Vec<f64>| -> f64 { density.logp(&ArrayView1::from(x.as_slice())) };
                let g = Array1::from(z.to_vec().central_diff(&f));
                if !lp.is_finite() || g.iter().any(|v| !v.is_finite()) {
                    valid = false;
                    break;
                }
                elbo_est += lp;
                grad_mu += &g;
                grad_omega += &(&g * &eps * &sigma);
            }
            if !valid {
                // restart the step from the current mean with a shrunk spread
                omega.mapv_inplace(|o| o - 0.5);
                continue;
            }
            grad_mu = grad_mu / n_mc as f64 * &free;
            // entropy term contributes +1 per free coordinate
            grad_omega = (grad_omega / n_mc as f64 + 1.) * &free;
            elbo.push(elbo_est / n_mc as f64 + (&omega * &free).sum());
            adam_mu.advance(&self.params, &mut mu, &grad_mu);
            adam_omega.advance(&self.params, &mut omega, &grad_omega);
        }
        debug!(
            "ADVI: {} iterations, last elbo={:?}",
            elbo.len(),
            elbo.last()
        );
        Ok(Approximation {
            mean: mu,
            log_std: omega,
            elbo,
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
    fn test_gaussian_target() {
        let density = FnDensity::new(2, |x| {
            -0.5 * ((x[0] - 2.) / 0.5).powi(2) - 0.5 * ((x[1] + 1.) / 2.).powi(2)
        });
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let advi = Advi::new(AdviParams {
            n_iter: 3000,
            learning_rate: 0.02,
            ..AdviParams::default()
        });
        let approx = advi
            .fit(&density, &array![0., 0.].view(), &[false, false], None, &mut rng)
            .unwrap();
        assert_abs_diff_eq!(approx.mean, array![2., -1.], epsilon = 0.3);
        assert_abs_diff_eq!(approx.std(), array![0.5, 2.], epsilon = 0.5);
    }

    #[test]
    fn test_fixed_coordinate() {
        let density = FnDensity::new(2, |x| -0.5 * x.dot(x));
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let approx = Advi::default()
            .fit(&density, &array![1., 5.].view(), &[false, true], None, &mut rng)
            .unwrap();
        assert_eq!(approx.mean[1], 5.);
        assert!(approx.mean[0].abs() < 0.5);
    }
}

//! Symbolic definition of prior and posterior quantities.
//!
//! [`BaseTensors`] gathers the mean, covariance and mapped outputs of a
//! process as expressions over the [`Placeholders`]. A [`Definition`] turns
//! them into the prior and posterior [`Quantities`] and the log-likelihood
//! of the observations:
//! * [`GaussianDefinition`]: gaussian process with identity mapping,
//! * [`TransformedDefinition`]: latent gaussian or Student-t process pushed
//!   through a mapping.
use crate::errors::{Result, TgpError};
use crate::kernels::Kernel;
use crate::mappings::Mapping;
use crate::mean_models::Mean;
use crate::regularizer::{regularize, to_finite, RegularizerParams};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::{PI, SQRT_2};
use std::fmt;
use tgp_symbolic::Expr;

/// Probability of the upper quantile, bands hold 95% of the mass
pub const QUANTILE_LEVEL: f64 = 0.975;

/// Gauss-Hermite nodes and weights of order 10
const GAUSS_HERMITE: [(f64, f64); 10] = [
    (-3.4361591188377376, 7.640432855232621e-06),
    (-2.5327316742327897, 0.0013436457467812327),
    (-1.7566836492998818, 0.03387439445548106),
    (-1.0366108297895136, 0.2401386110823147),
    (-0.3429013272237046, 0.6108626337353258),
    (0.3429013272237046, 0.6108626337353258),
    (1.0366108297895136, 0.2401386110823147),
    (1.7566836492998818, 0.03387439445548106),
    (2.5327316742327897, 0.0013436457467812327),
    (3.4361591188377376, 7.640432855232621e-06),
];

/// Positional inputs of every expression
#[derive(Clone, Debug)]
pub struct Placeholders {
    /// Query points `(m, d)`
    pub space: Expr,
    /// Observed inputs `(n, d)`
    pub inputs: Expr,
    /// Observed outputs `(n, 1)`
    pub outputs: Expr,
    /// Standard normal draws `(m, 1)`
    pub random: Expr,
    /// Chi-squared draw `(1, 1)` scaling Student-t samples
    pub random_scalar: Expr,
}

/// Building blocks shared by prior and posterior quantities
///
/// `kernel_*` use the full kernel (signal and noise), `kernel_f_*` the
/// signal kernel only. Covariances are regularized, cross-covariances made
/// finite.
#[derive(Clone, Debug)]
pub struct BaseTensors {
    /// Positional inputs
    pub placeholders: Placeholders,
    /// Mean at query points
    pub location_space: Expr,
    /// Mean at observed inputs
    pub location_inputs: Expr,
    /// Full covariance of query points
    pub kernel_space: Expr,
    /// Full covariance of observed inputs
    pub kernel_inputs: Expr,
    /// Full cross-covariance between query points and observed inputs
    pub kernel_space_inputs: Expr,
    /// Signal covariance of query points
    pub kernel_f_space: Expr,
    /// Signal covariance of observed inputs
    pub kernel_f_inputs: Expr,
    /// Signal cross-covariance between query points and observed inputs
    pub kernel_f_space_inputs: Expr,
    /// Latent values of the observed outputs
    pub mapping_outputs: Expr,
    /// `sum log |d mapping^-1 / dy|` at the observed outputs
    pub log_det_jac: Expr,
    /// Whether a noise kernel is part of the full kernel
    pub has_noise: bool,
    /// Regularization applied to derived covariances
    pub regularizer: RegularizerParams,
}

impl BaseTensors {
    /// Build the base tensors of a process
    pub fn build(
        placeholders: Placeholders,
        mean: &dyn Mean,
        signal: &dyn Kernel,
        noise: Option<&dyn Kernel>,
        mapping: &dyn Mapping,
        regularizer: RegularizerParams,
    ) -> Result<Self> {
        let ph = &placeholders;
        let full_cov = |x: &Expr| -> Result<Expr> {
            let k = signal.cov(x)?;
            Ok(match noise {
                Some(n) => k + n.cov(x)?,
                None => k,
            })
        };
        let kernel_f_space_inputs = signal.cross(&ph.space, &ph.inputs)?;
        let kernel_space_inputs = match noise {
            Some(n) => &kernel_f_space_inputs + n.cross(&ph.space, &ph.inputs)?,
            None => kernel_f_space_inputs.clone(),
        };
        Ok(BaseTensors {
            location_space: mean.evaluate(&ph.space)?,
            location_inputs: mean.evaluate(&ph.inputs)?,
            kernel_space: regularize(&full_cov(&ph.space)?, &regularizer),
            kernel_inputs: regularize(&full_cov(&ph.inputs)?, &regularizer),
            kernel_space_inputs: to_finite(&kernel_space_inputs),
            kernel_f_space: regularize(&signal.cov(&ph.space)?, &regularizer),
            kernel_f_inputs: regularize(&signal.cov(&ph.inputs)?, &regularizer),
            kernel_f_space_inputs: to_finite(&kernel_f_space_inputs),
            mapping_outputs: mapping.inverse(&ph.outputs)?,
            log_det_jac: mapping.log_det_jac_inverse(&ph.outputs)?,
            has_noise: noise.is_some(),
            regularizer,
            placeholders,
        })
    }

    /// Observed latent outputs minus the mean at observed inputs
    fn residuals(&self) -> Expr {
        &self.mapping_outputs - &self.location_inputs
    }
}

/// Predictive quantities at the query points
#[derive(Clone, Debug)]
pub struct Quantities {
    /// Mean `(m, 1)`
    pub mean: Expr,
    /// Covariance `(m, m)`
    pub covariance: Expr,
    /// Variance `(m, 1)`
    pub variance: Expr,
    /// Standard deviation `(m, 1)`
    pub std: Expr,
    /// Median `(m, 1)`
    pub median: Expr,
    /// Upper quantile `(m, 1)`
    pub quantile_up: Expr,
    /// Lower quantile `(m, 1)`
    pub quantile_down: Expr,
    /// Standard deviation including observation noise, absent without noise kernel
    pub noise: Option<Expr>,
    /// Upper quantile including observation noise
    pub noise_up: Option<Expr>,
    /// Lower quantile including observation noise
    pub noise_down: Option<Expr>,
    /// Sample from draws of the `random` (and `random_scalar`) placeholders
    pub sampler: Expr,
}

/// Latent gaussian (or Student-t) marginals before any mapping
struct Latent {
    mean: Expr,
    cov: Expr,
    std: Expr,
    noise: Option<Expr>,
    /// degrees of freedom of a Student-t latent process
    freedom: Option<Expr>,
}

impl Latent {
    fn prior(base: &BaseTensors, freedom: Option<&Expr>) -> Latent {
        let cov = base.kernel_f_space.clone();
        Latent {
            mean: base.location_space.clone(),
            std: cov.diag().sqrt(),
            cov,
            noise: base.has_noise.then(|| base.kernel_space.diag().sqrt()),
            freedom: freedom.cloned(),
        }
    }

    /// Conditioning on the observations, Student-t covariances scaled by
    /// `(nu + beta - 2) / (nu + n - 2)` with `beta = r' K^-1 r`
    fn posterior(base: &BaseTensors, freedom: Option<&Expr>) -> Latent {
        let r = base.residuals();
        let kxx = &base.kernel_inputs;
        let cross = &base.kernel_f_space_inputs;
        let alpha = kxx.solve(&r);
        let mean = &base.location_space + cross.dot(&alpha);
        let reduction = cross.dot(&kxx.solve(&cross.t()));

        let (scale, freedom) = match freedom {
            Some(nu) => {
                let beta = r.t().dot(&alpha);
                let n = r.rows();
                let scale = (nu + &beta - 2.) / (nu + &n - 2.);
                (Some(scale), Some(nu + &n))
            }
            None => (None, None),
        };
        let scaled = |m: Expr| match &scale {
            Some(s) => m * s,
            None => m,
        };
        let cov = regularize(&scaled(&base.kernel_f_space - &reduction), &base.regularizer);
        let noise = base.has_noise.then(|| {
            scaled((&base.kernel_space - &reduction).diag())
                .maximum(&Expr::scalar(0.))
                .sqrt()
        });
        Latent {
            mean,
            std: cov.diag().sqrt(),
            cov,
            noise,
            freedom,
        }
    }

    /// Multiplier of the standard deviation giving the upper quantile
    fn z(&self, gaussian_z: f64) -> Expr {
        match &self.freedom {
            Some(nu) => nu.student_t_ppf(QUANTILE_LEVEL) * ((nu - 2.) / nu).sqrt(),
            None => Expr::scalar(gaussian_z),
        }
    }

    /// `mean + L r`, scaled by `sqrt((nu - 2) / w)` for Student-t processes
    fn sampler(&self, ph: &Placeholders) -> Expr {
        let draw = self.cov.cholesky().dot(&ph.random);
        match &self.freedom {
            Some(nu) => &self.mean + ((nu - 2.) / &ph.random_scalar).sqrt() * draw,
            None => &self.mean + draw,
        }
    }
}

/// Quantile of the standard normal distribution at [`QUANTILE_LEVEL`]
pub fn gaussian_z() -> Result<f64> {
    let normal = Normal::new(0., 1.).map_err(|e| TgpError::InvalidValue(e.to_string()))?;
    Ok(normal.inverse_cdf(QUANTILE_LEVEL))
}

/// A trait for the symbolic definition of a process
pub trait Definition: fmt::Debug {
    /// Quantities before conditioning
    fn prior(&self, base: &BaseTensors) -> Result<Quantities>;

    /// Quantities after conditioning on the observations
    fn posterior(&self, base: &BaseTensors) -> Result<Quantities>;

    /// Log-density of the observed outputs
    fn log_likelihood(&self, base: &BaseTensors) -> Result<Expr>;
}

/// Gaussian log-density of the latent outputs plus the change of variables
fn gaussian_log_likelihood(base: &BaseTensors) -> Expr {
    let r = base.residuals();
    let k = &base.kernel_inputs;
    let beta = r.t().dot(&k.solve(&r));
    let n = r.rows();
    beta * -0.5 - k.logdet() * 0.5 - n * (0.5 * (2. * PI).ln()) + &base.log_det_jac
}

/// Multivariate Student-t log-density (covariance parametrization) of the
/// latent outputs plus the change of variables
fn student_log_likelihood(base: &BaseTensors, nu: &Expr) -> Expr {
    let r = base.residuals();
    let k = &base.kernel_inputs;
    let beta = r.t().dot(&k.solve(&r));
    let n = r.rows();
    let nu_n = nu + &n;
    (&nu_n * 0.5).ln_gamma() - (nu * 0.5).ln_gamma() - &n * 0.5 * ((nu - 2.) * PI).ln()
        - k.logdet() * 0.5
        - &nu_n * 0.5 * (beta / (nu - 2.) + 1.).ln()
        + &base.log_det_jac
}

/// Gaussian process with identity mapping
#[derive(Clone, Debug)]
pub struct GaussianDefinition {
    z: f64,
}

impl GaussianDefinition {
    /// Constructor
    pub fn new() -> Result<Self> {
        Ok(GaussianDefinition { z: gaussian_z()? })
    }

    fn quantities(&self, latent: Latent, ph: &Placeholders) -> Quantities {
        let z = latent.z(self.z);
        let band = |s: &Expr| (&latent.mean + &(&z * s), &latent.mean - &(&z * s));
        let (quantile_up, quantile_down) = band(&latent.std);
        let noise_band = latent.noise.as_ref().map(band);
        let sampler = latent.sampler(ph);
        Quantities {
            median: latent.mean.clone(),
            variance: latent.cov.diag(),
            quantile_up,
            quantile_down,
            noise_up: noise_band.as_ref().map(|b| b.0.clone()),
            noise_down: noise_band.map(|b| b.1),
            sampler,
            mean: latent.mean,
            covariance: latent.cov,
            std: latent.std,
            noise: latent.noise,
        }
    }
}

impl Definition for GaussianDefinition {
    fn prior(&self, base: &BaseTensors) -> Result<Quantities> {
        Ok(self.quantities(Latent::prior(base, None), &base.placeholders))
    }

    fn posterior(&self, base: &BaseTensors) -> Result<Quantities> {
        Ok(self.quantities(Latent::posterior(base, None), &base.placeholders))
    }

    fn log_likelihood(&self, base: &BaseTensors) -> Result<Expr> {
        Ok(gaussian_log_likelihood(base))
    }
}

/// Latent gaussian process, or Student-t process with `freedom` degrees of
/// freedom, pushed through a mapping
///
/// Median, quantiles and samples are mapped directly, mean and variance are
/// computed by Gauss-Hermite quadrature and the covariance by the delta method.
///
/// For a Student-t latent the quadrature runs over the gaussian of same mean
/// and variance. The mapped moments are then an approximation, exact for
/// affine mappings only, since the Student-t tails are heavier.
#[derive(Debug)]
pub struct TransformedDefinition<'a> {
    mapping: &'a dyn Mapping,
    freedom: Option<Expr>,
    z: f64,
}

impl<'a> TransformedDefinition<'a> {
    /// Constructor
    pub fn new(mapping: &'a dyn Mapping, freedom: Option<Expr>) -> Result<Self> {
        Ok(TransformedDefinition {
            mapping,
            freedom,
            z: gaussian_z()?,
        })
    }

    /// `(E[f(X)], E[f(X)^2])` for `X ~ N(m, s^2)`, also used when the
    /// latent is Student-t of mean `m` and std `s`
    fn moments(&self, m: &Expr, s: &Expr) -> Result<(Expr, Expr)> {
        let mut first: Option<Expr> = None;
        let mut second: Option<Expr> = None;
        for &(node, weight) in GAUSS_HERMITE.iter() {
            let w = weight / PI.sqrt();
            let v = self.mapping.forward(&(m + &(s * (SQRT_2 * node))))?;
            let (f1, f2) = (&v * w, v.square() * w);
            first = Some(first.map_or(f1.clone(), |acc| acc + &f1));
            second = Some(second.map_or(f2.clone(), |acc| acc + &f2));
        }
        first
            .zip(second)
            .ok_or_else(|| TgpError::InvalidState("empty quadrature".to_string()))
    }

    fn quantities(&self, latent: Latent, base: &BaseTensors) -> Result<Quantities> {
        let forward = |e: &Expr| self.mapping.forward(e);
        let z = latent.z(self.z);
        let m = &latent.mean;

        let (mean, second) = self.moments(m, &latent.std)?;
        let variance = (second - mean.square()).maximum(&Expr::scalar(0.));
        let d = self.mapping.derivative(m)?;
        let covariance = regularize(&(d.dot(&d.t()) * &latent.cov), &base.regularizer);

        let (noise, noise_up, noise_down) = match &latent.noise {
            Some(s) => (
                Some(d.abs() * s),
                Some(forward(&(m + &(&z * s)))?),
                Some(forward(&(m - &(&z * s)))?),
            ),
            None => (None, None, None),
        };
        Ok(Quantities {
            std: variance.sqrt(),
            median: forward(m)?,
            quantile_up: forward(&(m + &(&z * &latent.std)))?,
            quantile_down: forward(&(m - &(&z * &latent.std)))?,
            sampler: forward(&latent.sampler(&base.placeholders))?,
            mean,
            variance,
            covariance,
            noise,
            noise_up,
            noise_down,
        })
    }
}

impl<'a> Definition for TransformedDefinition<'a> {
    fn prior(&self, base: &BaseTensors) -> Result<Quantities> {
        self.quantities(Latent::prior(base, self.freedom.as_ref()), base)
    }

    fn posterior(&self, base: &BaseTensors) -> Result<Quantities> {
        self.quantities(Latent::posterior(base, self.freedom.as_ref()), base)
    }

    fn log_likelihood(&self, base: &BaseTensors) -> Result<Expr> {
        Ok(match &self.freedom {
            Some(nu) => student_log_likelihood(base, nu),
            None => gaussian_log_likelihood(base),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypers::{HyperSpec, Hypers, ModelContext, Transform};
    use crate::kernels::{SquaredExponential, WhiteNoise};
    use crate::mappings::{Affine, Identity};
    use crate::mean_models::ConstantMean;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use tgp_symbolic::{Backend, Signature, TapeBackend};

    struct Fixture {
        ctx: ModelContext,
        base: BaseTensors,
        hypers: Hypers,
    }

    fn placeholders() -> Placeholders {
        Placeholders {
            space: Expr::input("space"),
            inputs: Expr::input("inputs"),
            outputs: Expr::input("outputs"),
            random: Expr::input("random"),
            random_scalar: Expr::input("random_scalar"),
        }
    }

    fn fixture(mapping: &mut dyn Mapping) -> Fixture {
        let mut ctx = ModelContext::new();
        let mut mean = ConstantMean::default();
        let mut kernel = SquaredExponential::new(1);
        let mut noise = WhiteNoise::default();
        mean.register_hypers(&mut ctx, "gp_").unwrap();
        kernel.register_hypers(&mut ctx, "gp_").unwrap();
        noise.register_hypers(&mut ctx, "gp_").unwrap();
        mapping.register_hypers(&mut ctx, "gp_").unwrap();
        let base = BaseTensors::build(
            placeholders(),
            &mean,
            &kernel,
            Some(&noise),
            mapping,
            RegularizerParams::default(),
        )
        .unwrap();
        let hypers = ctx
            .schema()
            .defaults()
            .with("gp_mean_constant", 0.5)
            .with("gp_se_var", 1.)
            .with("gp_se_ls", 1.)
            .with("gp_noise_var", 0.01);
        Fixture { ctx, base, hypers }
    }

    fn eval(f: &Fixture, expr: &Expr, args: &[(&str, Array2<f64>)]) -> Array2<f64> {
        let names: Vec<&str> = args.iter().map(|a| a.0).collect();
        let views: Vec<_> = args.iter().map(|a| a.1.view()).collect();
        TapeBackend::new()
            .compile(&Signature::new(names, f.ctx.schema().names()), expr)
            .unwrap()
            .call(&views, &f.hypers)
            .unwrap()
    }

    #[test]
    fn test_gaussian_z() {
        assert_abs_diff_eq!(gaussian_z().unwrap(), 1.959963984540054, epsilon = 1e-9);
    }

    #[test]
    fn test_gaussian_log_likelihood() {
        let f = fixture(&mut Identity);
        let ll = GaussianDefinition::new()
            .unwrap()
            .log_likelihood(&f.base)
            .unwrap();
        let x = array![[0.], [1.5]];
        let y = array![[1.], [-0.5]];
        let value = eval(&f, &ll, &[("inputs", x), ("outputs", y)])[[0, 0]];

        let a = 1.01 + 1e-6;
        let b = (-0.5f64 * 1.5 * 1.5).exp();
        let (r1, r2) = (0.5, -1.);
        let det = a * a - b * b;
        let beta = (a * (r1 * r1 + r2 * r2) - 2. * b * r1 * r2) / det;
        let expected = -0.5 * beta - 0.5 * det.ln() - (2. * PI).ln();
        assert_abs_diff_eq!(value, expected, epsilon = 1e-8);
    }

    #[test]
    fn test_affine_moments_are_exact() {
        let mut mapping = Affine::default();
        let mut f = fixture(&mut mapping);
        f.hypers = f
            .hypers
            .with("gp_affine_shift", 1.)
            .with("gp_affine_scale", 2.);
        let def = TransformedDefinition::new(&mapping, None).unwrap();
        let prior = def.prior(&f.base).unwrap();
        let s = array![[0.], [1.]];
        let mean = eval(&f, &prior.mean, &[("space", s.clone())]);
        let var = eval(&f, &prior.variance, &[("space", s.clone())]);
        let median = eval(&f, &prior.median, &[("space", s.clone())]);
        // latent N(0.5, 1 + 1e-6) mapped by 1 + 2z
        assert_abs_diff_eq!(mean, array![[2.], [2.]], epsilon = 1e-8);
        assert_abs_diff_eq!(median, array![[2.], [2.]], epsilon = 1e-8);
        assert_abs_diff_eq!(var, array![[4.], [4.]], epsilon = 1e-4);
        let cov = eval(&f, &prior.covariance, &[("space", s)]);
        assert_abs_diff_eq!(cov[[0, 1]], 4. * (-0.5f64).exp(), epsilon = 1e-6);
    }

    #[test]
    fn test_student_affine_moments_match_latent() {
        let mut mapping = Affine::default();
        let mut f = fixture(&mut mapping);
        let nu = f
            .ctx
            .declare(HyperSpec {
                name: "gp_freedom".to_string(),
                len: 1,
                transform: Transform::Positive { lower: 2. },
                default: array![4.],
            })
            .unwrap();
        f.hypers = f
            .hypers
            .with("gp_freedom", 4.)
            .with("gp_affine_shift", 1.)
            .with("gp_affine_scale", 2.);
        let def = TransformedDefinition::new(&mapping, Some(nu)).unwrap();
        let q = def.posterior(&f.base).unwrap();
        let args = || {
            vec![
                ("space", array![[0.5], [3.]]),
                ("inputs", array![[0.], [1.]]),
                ("outputs", array![[1.], [-1.]]),
            ]
        };
        let mean = eval(&f, &q.mean, &args());
        let var = eval(&f, &q.variance, &args());
        let median = eval(&f, &q.median, &args());
        // unit variance Student-t quantile, 4 + 2 degrees of freedom after conditioning
        let z = 2.446911851144969 * (4f64 / 6.).sqrt();
        let half = (eval(&f, &q.quantile_up, &args()) - eval(&f, &q.quantile_down, &args()))
            / (2. * z);
        assert_abs_diff_eq!(mean, median, epsilon = 1e-8);
        assert_abs_diff_eq!(var, half.mapv(|h| h * h), epsilon = 1e-4);
        assert!(var.iter().all(|v| v.is_finite() && *v > 0.));
    }

    #[test]
    fn test_student_posterior_band_is_wider() {
        let mut f = fixture(&mut Identity);
        let nu = f
            .ctx
            .declare(HyperSpec {
                name: "gp_freedom".to_string(),
                len: 1,
                transform: Transform::Positive { lower: 2. },
                default: array![5.],
            })
            .unwrap();
        f.hypers = f.hypers.with("gp_freedom", 5.);
        let student = TransformedDefinition::new(&Identity, Some(nu)).unwrap();
        let gaussian = GaussianDefinition::new().unwrap();
        let args = || {
            vec![
                ("space", array![[0.5], [4.]]),
                ("inputs", array![[0.], [1.]]),
                ("outputs", array![[1.], [-1.]]),
            ]
        };
        let q_t = student.posterior(&f.base).unwrap();
        let q_g = gaussian.posterior(&f.base).unwrap();
        let width = |q: &Quantities| {
            eval(&f, &q.quantile_up, &args()) - eval(&f, &q.quantile_down, &args())
        };
        let (w_t, w_g) = (width(&q_t), width(&q_g));
        // far from data the Student-t band of 95% is wider than the gaussian one
        assert!(w_t[[1, 0]] > w_g[[1, 0]]);
        let ll = student.log_likelihood(&f.base).unwrap();
        let v = eval(
            &f,
            &ll,
            &[("inputs", array![[0.], [1.]]), ("outputs", array![[1.], [-1.]])],
        );
        assert!(v[[0, 0]].is_finite());
    }
}

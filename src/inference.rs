//! Hyper-parameter inference: log-probability, point estimation and sampling.
//!
//! Every search happens in the unconstrained space given by the hyper-parameter
//! transforms, fixed hyper-parameters are held at their value and restored
//! exactly in the results.
use crate::errors::{Result, TgpError};
use crate::hypers::{Hypers, Transform};
use crate::predict::Request;
use crate::process::StochasticProcess;
use crate::registry::Args;
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tgp_engine::{
    Advi, AdviParams, Algorithm, FnDensity, Mask, MaxTime, Optimizer, SliceParams, SliceSampler,
};

/// Score given to hyper-parameters whose log-probability is not finite
pub const LOGP_FLOOR: f64 = -1e10;
/// Max number of objective evaluations of one point estimation attempt
pub const MAP_MAX_EVAL: usize = 400;
/// Half width of the search box of log-transformed coordinates
const LOG_SPAN: f64 = 10.;

/// Hyper-parameter draws with their log-probability
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Draws in sampling order
    pub points: Vec<Hypers>,
    /// Log-probability of each draw
    pub logp: Vec<f64>,
}

impl Trace {
    /// Number of draws
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether there is no draw
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Draw of highest log-probability
    pub fn best(&self) -> Option<&Hypers> {
        self.logp
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| &self.points[i])
    }

    /// Values of hyper-parameter `name` along draws
    pub fn values(&self, name: &str) -> Option<Array2<f64>> {
        let rows = self
            .points
            .iter()
            .map(|p| p.get(name).map(|v| v.view().insert_axis(Axis(0))))
            .collect::<Option<Vec<_>>>()?;
        ndarray::concatenate(Axis(0), &rows).ok()
    }
}

/// Fit measures of hyper-parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    /// Log-likelihood of the observations
    pub logp_train: f64,
    /// Mean squared error (plus predictive variance) at the observations
    pub mse_train: f64,
    /// Mean absolute bias at the observations
    pub mab_train: f64,
    /// Log-probability of the test set conditioned on the observations
    pub logp_test: Option<f64>,
    /// Mean squared error (plus predictive variance) on the test set
    pub mse_test: Option<f64>,
    /// Mean absolute bias on the test set
    pub mab_test: Option<f64>,
}

/// Best point found so far: log-probability and free coordinates
struct Candidate {
    logp: f64,
    x: Array1<f64>,
}

impl StochasticProcess {
    fn likelihood_at<'a>(
        &self,
        hypers: &Hypers,
        inputs: ArrayView2<'a, f64>,
        outputs: ArrayView2<'a, f64>,
    ) -> Result<f64> {
        let entry = self.likelihood.as_ref().ok_or_else(|| {
            TgpError::MissingObservation("log-likelihood is built on first observations".to_string())
        })?;
        let args = Args {
            inputs: Some(inputs),
            outputs: Some(outputs),
            ..Args::default()
        };
        let value = entry.call(&args, hypers)?[[0, 0]];
        if value.is_finite() {
            Ok(value)
        } else {
            debug!("Non finite log-likelihood at {}", hypers);
            Ok(LOGP_FLOOR)
        }
    }

    /// Log-likelihood of the observations plus the log-density of the
    /// hyper-parameter priors
    fn posterior_at(&self, hypers: &Hypers) -> Result<f64> {
        let record = self
            .record
            .as_ref()
            .ok_or_else(|| TgpError::MissingObservation("no observations bound".to_string()))?;
        let value = self.likelihood_at(hypers, record.inputs.view(), record.outputs.view())?
            + self.ctx.schema().log_prior(hypers);
        if value.is_finite() {
            Ok(value)
        } else {
            debug!("Non finite log-prior at {}", hypers);
            Ok(LOGP_FLOOR)
        }
    }

    /// Log-probability (log-likelihood plus log-prior) of the bound
    /// observations, [`LOGP_FLOOR`] when not finite
    ///
    /// Positive hyper-parameters carry a log-normal prior centered on their
    /// registration default, see [`crate::hypers::Transform::log_prior`].
    pub fn logp(&self, hypers: Option<&Hypers>) -> Result<f64> {
        let hypers = self.resolve(hypers)?;
        self.posterior_at(&hypers)
    }

    /// Log-probability at unconstrained coordinates `u`, [`LOGP_FLOOR`] on failure
    fn logp_unconstrained(&self, u: &ArrayView1<f64>) -> f64 {
        self.posterior_at(&self.hypers_at(u)).unwrap_or(LOGP_FLOOR)
    }

    /// Unconstrained start point and fixed flag per coordinate
    fn search_start(&self, start: &Hypers) -> Result<(Array1<f64>, Vec<bool>)> {
        let schema = self.ctx.schema();
        let u0 = schema.to_unconstrained(start)?;
        let fixed = schema.fixed_mask(&self.fixed);
        Ok((u0, fixed))
    }

    /// `(dim, 2)` search box of the free coordinates around `u0`
    fn search_bounds(&self, u0: &Array1<f64>, mask: &Mask) -> Array2<f64> {
        let transforms: Vec<Transform> = self
            .ctx
            .schema()
            .specs()
            .iter()
            .flat_map(|s| std::iter::repeat(s.transform).take(s.len))
            .collect();
        let mut bounds = Array2::zeros((mask.n_free(), 2));
        for (row, &i) in mask.free_indices().iter().enumerate() {
            let span = match transforms[i] {
                Transform::Identity => LOG_SPAN.max(10. * u0[i].abs()),
                Transform::Positive { .. } => LOG_SPAN,
            };
            bounds[[row, 0]] = u0[i] - span;
            bounds[[row, 1]] = u0[i] + span;
        }
        bounds
    }

    /// Hyper-parameters at full unconstrained coordinates, fixed values restored exactly
    fn hypers_at(&self, u: &ArrayView1<f64>) -> Hypers {
        self.ctx.schema().from_unconstrained(u).merged(&self.fixed)
    }

    /// Maximize the log-probability starting from `start` (current
    /// hyper-parameters when `None`)
    ///
    /// Attempts alternate SLSQP and COBYLA, each one starting from the best
    /// point so far. A failed attempt is discarded, the result is never worse
    /// than the start. Without observations the start is returned.
    pub fn find_point_estimate(
        &self,
        start: Option<&Hypers>,
        attempts: usize,
        deadline: Option<MaxTime>,
    ) -> Result<Hypers> {
        let start = self.resolve(start)?;
        if self.record.is_none() {
            warn!("Point estimation needs observations, start point returned");
            return Ok(start);
        }
        let (u0, fixed) = self.search_start(&start)?;
        let mask = Mask::new(u0.clone(), &fixed);
        if mask.n_free() == 0 {
            info!("Every hyper-parameter is fixed, start point returned");
            return Ok(start);
        }
        let bounds = self.search_bounds(&u0, &mask);
        let objective = |x: &[f64]| -> f64 {
            let u = mask.expand(x);
            -self.logp_unconstrained(&u.view())
        };

        let initial = Candidate {
            logp: self.logp_unconstrained(&u0.view()),
            x: mask.free_values(),
        };
        info!("Point estimation start logp={}", initial.logp);
        let best = (0..attempts).fold(initial, |best, i| {
            if deadline.map_or(false, |d| d.expired()) {
                return best;
            }
            let algo = if i % 2 == 0 {
                Algorithm::Slsqp
            } else {
                Algorithm::Cobyla
            };
            let mut optimizer = Optimizer::new(algo, &objective, &bounds);
            optimizer
                .xinit(&best.x.view())
                .max_eval(MAP_MAX_EVAL)
                .ftol_rel(1e-6)
                .ftol_abs(1e-8);
            if let Some(d) = deadline {
                optimizer.deadline(d);
            }
            let attempt = optimizer
                .minimize()
                .map_err(|e| TgpError::OptimizerFailure(e.to_string()));
            match attempt {
                Ok((f, x)) if f.is_finite() && -f > best.logp => {
                    debug!("Attempt {} ({:?}) improves logp to {}", i, algo, -f);
                    Candidate { logp: -f, x }
                }
                Ok((f, _)) => {
                    debug!("Attempt {} ({:?}) ends at logp={}", i, algo, -f);
                    best
                }
                Err(err) => {
                    warn!("Attempt {} ({:?}) discarded: {}", i, algo, err);
                    best
                }
            }
        });
        info!("Point estimation best logp={}", best.logp);
        Ok(self.hypers_at(&mask.expand(&best.x.to_vec()).view()))
    }

    /// Draw `count` hyper-parameter sets by slice sampling from `start`
    /// (current hyper-parameters when `None`), warmed up by ADVI when `advi`
    ///
    /// Fixed hyper-parameters keep their value in every draw. Without
    /// observations the trace only holds the start point.
    pub fn sample_hyperparameters(
        &self,
        start: Option<&Hypers>,
        count: usize,
        advi: bool,
        deadline: Option<MaxTime>,
    ) -> Result<Trace> {
        let start = self.resolve(start)?;
        if self.record.is_none() {
            warn!("Hyper-parameter sampling needs observations, start point returned");
            return Ok(Trace {
                logp: vec![LOGP_FLOOR],
                points: vec![start],
            });
        }
        let schema = self.ctx.schema();
        let (u0, fixed) = self.search_start(&start)?;
        let density = FnDensity::new(u0.len(), |u: &ArrayView1<f64>| {
            self.logp_unconstrained(u) + schema.log_jacobian(u)
        });
        let mut rng = self.rng.borrow_mut();

        let x0 = if advi {
            match Advi::new(AdviParams::default()).fit(
                &density,
                &u0.view(),
                &fixed,
                deadline.as_ref(),
                &mut *rng,
            ) {
                Ok(approx) => {
                    debug!(
                        "ADVI warm-up, final elbo={:?}",
                        approx.elbo.last().copied()
                    );
                    approx.mean
                }
                Err(err) => {
                    warn!("ADVI warm-up discarded: {}", err);
                    u0
                }
            }
        } else {
            u0
        };
        let draws = SliceSampler::new(SliceParams::default()).sample(
            &density,
            &x0.view(),
            &fixed,
            count,
            deadline.as_ref(),
            &mut *rng,
        )?;
        info!("Sampled {} hyper-parameter sets", count);
        let points = draws
            .points
            .rows()
            .into_iter()
            .map(|u| self.hypers_at(&u))
            .collect();
        let logp = draws
            .points
            .rows()
            .into_iter()
            .map(|u| self.logp_unconstrained(&u))
            .collect();
        Ok(Trace { points, logp })
    }

    /// Log-probability, squared error and absolute bias of the predictive
    /// mean at the observations, and on `test` inputs/outputs when given
    ///
    /// The test log-probability is conditioned on the observations,
    /// `log p(test | observations)`, computed as the joint log-likelihood of
    /// observations and test points minus the one of the observations.
    pub fn scores(
        &self,
        hypers: Option<&Hypers>,
        test: Option<(ArrayView2<f64>, ArrayView2<f64>)>,
    ) -> Result<Scores> {
        let hypers = self.resolve(hypers)?;
        let record = self
            .record
            .as_ref()
            .ok_or_else(|| TgpError::MissingObservation("no observations bound".to_string()))?;
        let (x_train, y_train) = (record.inputs.view(), record.outputs.view());
        let logp_train = self.likelihood_at(&hypers, x_train, y_train)?;
        let (mse_train, mab_train) = self.errors_at(&hypers, x_train, y_train)?;
        let (logp_test, mse_test, mab_test) = match test {
            Some((x, y)) => {
                let (mse, mab) = self.errors_at(&hypers, x, y)?;
                let x_all = ndarray::concatenate(Axis(0), &[x_train.view(), x.view()])
                    .map_err(|e| TgpError::DimensionMismatch(e.to_string()))?;
                let y_all = ndarray::concatenate(Axis(0), &[y_train.view(), y.view()])
                    .map_err(|e| TgpError::DimensionMismatch(e.to_string()))?;
                let joint = self.likelihood_at(&hypers, x_all.view(), y_all.view())?;
                (Some(joint - logp_train), Some(mse), Some(mab))
            }
            None => (None, None, None),
        };
        Ok(Scores {
            logp_train,
            mse_train,
            mab_train,
            logp_test,
            mse_test,
            mab_test,
        })
    }

    fn errors_at(
        &self,
        hypers: &Hypers,
        inputs: ArrayView2<f64>,
        outputs: ArrayView2<f64>,
    ) -> Result<(f64, f64)> {
        self.check_inputs(&inputs)?;
        if inputs.nrows() != outputs.nrows() {
            return Err(TgpError::DimensionMismatch(format!(
                "{} inputs for {} outputs",
                inputs.nrows(),
                outputs.nrows()
            )));
        }
        let res = self.posterior(Some(hypers), Some(inputs), None, None, &Request::new())?;
        let (mean, var) = res.mean.zip(res.variance).ok_or_else(|| {
            TgpError::InvalidState("posterior mean and variance not predicted".to_string())
        })?;
        let err = &mean - &outputs.column(0);
        let n = err.len().max(1) as f64;
        let mse = (err.mapv(|e| e * e) + var).sum() / n;
        let mab = err.mapv(f64::abs).sum() / n;
        Ok((mse, mab))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::KernelSpec;
    use crate::mean_models::MeanSpec;
    use crate::parameters::ProcessParams;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn observed() -> StochasticProcess {
        let mut gp = ProcessParams::new(
            MeanSpec::Zero,
            KernelSpec::SquaredExponential { dim: 1, ard: false },
        )
        .space(Array1::linspace(0., 5., 11))
        .seed(7)
        .build()
        .unwrap();
        let x = Array1::linspace(0., 5., 8);
        let y = x.mapv(f64::sin);
        gp.observed(x.insert_axis(Axis(1)), y).unwrap();
        gp
    }

    #[test]
    fn test_logp_without_observations() {
        let gp = ProcessParams::new(MeanSpec::Zero, KernelSpec::WhiteNoise)
            .build()
            .unwrap();
        assert!(matches!(gp.logp(None), Err(TgpError::MissingObservation(_))));
        let start = gp.current_params().unwrap();
        assert_eq!(gp.find_point_estimate(None, 2, None).unwrap(), start);
        assert_eq!(gp.sample_hyperparameters(None, 5, false, None).unwrap().len(), 1);
    }

    #[test]
    fn test_logp_stays_finite() {
        let gp = observed();
        let h = Hypers::new().with("gp_se_ls", f64::NAN);
        let logp = gp.logp(Some(&h)).unwrap();
        assert!(logp.is_finite());
        assert!(logp < gp.logp(None).unwrap());
    }

    #[test]
    fn test_length_scale_draws_stay_bounded() {
        let mut gp = ProcessParams::new(
            MeanSpec::Zero,
            KernelSpec::SquaredExponential { dim: 1, ard: false },
        )
        .space(Array1::linspace(0., 5., 11))
        .seed(3)
        .build()
        .unwrap();
        gp.observed(array![1., 3.], array![2., -1.]).unwrap();
        let h = gp.current_params().unwrap();
        let far = gp.logp(Some(&h.clone().with("gp_se_ls", 1e4))).unwrap();
        let farther = gp.logp(Some(&h.with("gp_se_ls", 1e8))).unwrap();
        assert!(farther < far - 10.);

        let trace = gp
            .sample_hyperparameters(None, 100, false, Some(MaxTime::seconds(60.)))
            .unwrap();
        let log_ls = trace.values("gp_se_ls").unwrap().mapv(f64::ln);
        assert!(log_ls.iter().all(|u| u.abs() < 20.));
        assert!(log_ls.mean().unwrap().abs() < 6.);
    }

    #[test]
    fn test_point_estimate_improves() {
        let gp = observed();
        let start = Hypers::new()
            .with("gp_se_var", 10.)
            .with("gp_se_ls", 0.1)
            .with("gp_noise_var", 1.);
        let logp0 = gp.logp(Some(&start)).unwrap();
        let best = gp.find_point_estimate(Some(&start), 2, None).unwrap();
        assert!(gp.logp(Some(&best)).unwrap() >= logp0);
    }

    #[test]
    fn test_sampling_trace() {
        let gp = observed();
        let trace = gp
            .sample_hyperparameters(None, 10, false, Some(MaxTime::seconds(60.)))
            .unwrap();
        assert_eq!(trace.len(), 10);
        assert!(trace.logp.iter().all(|v| v.is_finite()));
        assert_eq!(trace.values("gp_se_ls").unwrap().dim(), (10, 1));
        assert!(trace.best().is_some());
    }

    #[test]
    fn test_scores() {
        let gp = observed();
        let test = (array![[0.25], [4.75]], array![[0.25f64.sin()], [4.75f64.sin()]]);
        let scores = gp
            .scores(None, Some((test.0.view(), test.1.view())))
            .unwrap();
        assert!(scores.logp_train.is_finite());
        assert!(scores.mse_train >= 0. && scores.mab_train >= 0.);
        assert!(scores.mse_test.unwrap() < 1.);

        let hypers = gp.current_params().unwrap();
        let alone = gp
            .likelihood_at(&hypers, test.0.view(), test.1.view())
            .unwrap();
        let logp_test = scores.logp_test.unwrap();
        assert!(logp_test > alone);
        let record = gp.record().unwrap();
        let x = ndarray::concatenate(Axis(0), &[record.inputs.view(), test.0.view()]).unwrap();
        let y = ndarray::concatenate(Axis(0), &[record.outputs.view(), test.1.view()]).unwrap();
        let joint = gp.likelihood_at(&hypers, x.view(), y.view()).unwrap();
        assert_abs_diff_eq!(logp_test + scores.logp_train, joint, epsilon = 1e-9);
    }
}

//! Prior and posterior predictions of a compiled process.
use crate::errors::{Result, TgpError};
use crate::hypers::Hypers;
use crate::process::StochasticProcess;
use crate::registry::{Args, Quantity, Role};
use log::debug;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_rand::rand_distr::{ChiSquared, Distribution, StandardNormal};
use ndarray_rand::RandomExt;
use serde::{Deserialize, Serialize};

/// Selection of the quantities to predict
///
/// Mean and variance (with standard deviation) are requested by default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    /// Mean
    pub mean: bool,
    /// Variance and standard deviation
    pub variance: bool,
    /// Covariance matrix
    pub covariance: bool,
    /// Median
    pub median: bool,
    /// Upper and lower quantiles
    pub quantiles: bool,
    /// Noise standard deviation and quantiles
    pub noise: bool,
    /// Number of samples
    pub samples: usize,
    /// Use the prior even when observations are bound
    pub prior: bool,
}

impl Default for Request {
    fn default() -> Self {
        Request {
            mean: true,
            variance: true,
            covariance: false,
            median: false,
            quantiles: false,
            noise: false,
            samples: 0,
            prior: false,
        }
    }
}

impl Request {
    /// Mean and variance
    pub fn new() -> Self {
        Self::default()
    }

    /// Nothing but `n` samples
    pub fn samples_only(n: usize) -> Self {
        Request {
            mean: false,
            variance: false,
            samples: n,
            ..Request::default()
        }
    }

    /// Every quantity
    pub fn all() -> Self {
        Request {
            covariance: true,
            median: true,
            quantiles: true,
            noise: true,
            ..Request::default()
        }
    }

    /// Set mean request
    pub fn mean(mut self, mean: bool) -> Self {
        self.mean = mean;
        self
    }

    /// Set variance request
    pub fn variance(mut self, variance: bool) -> Self {
        self.variance = variance;
        self
    }

    /// Set covariance request
    pub fn covariance(mut self, covariance: bool) -> Self {
        self.covariance = covariance;
        self
    }

    /// Set median request
    pub fn median(mut self, median: bool) -> Self {
        self.median = median;
        self
    }

    /// Set quantiles request
    pub fn quantiles(mut self, quantiles: bool) -> Self {
        self.quantiles = quantiles;
        self
    }

    /// Set noise request
    pub fn noise(mut self, noise: bool) -> Self {
        self.noise = noise;
        self
    }

    /// Set number of samples
    pub fn samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    /// Force prior predictions
    pub fn prior(mut self, prior: bool) -> Self {
        self.prior = prior;
        self
    }
}

/// Predicted quantities, absent when not requested or not available
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    /// Mean
    pub mean: Option<Array1<f64>>,
    /// Variance
    pub variance: Option<Array1<f64>>,
    /// Standard deviation
    pub std: Option<Array1<f64>>,
    /// Covariance
    pub covariance: Option<Array2<f64>>,
    /// Median
    pub median: Option<Array1<f64>>,
    /// Upper quantile
    pub quantile_up: Option<Array1<f64>>,
    /// Lower quantile
    pub quantile_down: Option<Array1<f64>>,
    /// Standard deviation including observation noise
    pub noise: Option<Array1<f64>>,
    /// Upper quantile including observation noise
    pub noise_up: Option<Array1<f64>>,
    /// Lower quantile including observation noise
    pub noise_down: Option<Array1<f64>>,
    /// One sample per column `(m, n_samples)`
    pub samples: Option<Array2<f64>>,
}

/// First column of a `(m, 1)` result
fn column(values: Array2<f64>) -> Array1<f64> {
    values.index_axis_move(Axis(1), 0)
}

impl StochasticProcess {
    /// Query points given or the domain ones
    fn query<'a>(&'a self, space: Option<ArrayView2<'a, f64>>) -> Result<ArrayView2<'a, f64>> {
        match space {
            Some(s) => {
                self.check_inputs(&s)?;
                Ok(s)
            }
            None => self.space.values.as_ref().map(|v| v.view()).ok_or_else(|| {
                TgpError::InvalidValue("the domain has no sample points".to_string())
            }),
        }
    }

    /// Prior predictions at `space` (domain points when `None`)
    pub fn prior(
        &self,
        hypers: Option<&Hypers>,
        space: Option<ArrayView2<f64>>,
        request: &Request,
    ) -> Result<ResultSet> {
        let hypers = self.resolve(hypers)?;
        let space = self.query(space.as_ref().map(|s| s.view()))?;
        let args = Args {
            space: Some(space),
            ..Args::default()
        };
        self.evaluate(Role::Prior, &hypers, args, 0, request)
    }

    /// Posterior predictions at `space` given `inputs` and `outputs`, bound
    /// observations used when `None`
    pub fn posterior(
        &self,
        hypers: Option<&Hypers>,
        space: Option<ArrayView2<f64>>,
        inputs: Option<ArrayView2<f64>>,
        outputs: Option<ArrayView2<f64>>,
        request: &Request,
    ) -> Result<ResultSet> {
        let hypers = self.resolve(hypers)?;
        let space = self.query(space.as_ref().map(|s| s.view()))?;
        let record = self.record.as_ref();
        let inputs = inputs
            .as_ref()
            .map(|s| s.view())
            .or_else(|| record.map(|r| r.inputs.view()))
            .ok_or_else(|| TgpError::MissingObservation("no inputs bound".to_string()))?;
        let outputs = outputs
            .as_ref()
            .map(|s| s.view())
            .or_else(|| record.map(|r| r.outputs.view()))
            .ok_or_else(|| TgpError::MissingObservation("no outputs bound".to_string()))?;
        self.check_inputs(&inputs)?;
        if outputs.dim() != (inputs.nrows(), 1) {
            return Err(TgpError::DimensionMismatch(format!(
                "outputs of shape {:?} for {} inputs",
                outputs.dim(),
                inputs.nrows()
            )));
        }
        let args = Args {
            space: Some(space),
            inputs: Some(inputs),
            outputs: Some(outputs),
            ..Args::default()
        };
        self.evaluate(Role::Posterior, &hypers, args, inputs.nrows(), request)
    }

    /// Posterior predictions, prior ones when requested or without observations
    pub fn predict(
        &self,
        hypers: Option<&Hypers>,
        space: Option<ArrayView2<f64>>,
        request: &Request,
    ) -> Result<ResultSet> {
        if request.prior || self.record.is_none() {
            self.prior(hypers, space, request)
        } else {
            self.posterior(hypers, space, None, None, request)
        }
    }

    /// `n` samples at `space`, one per column
    pub fn sample(
        &self,
        hypers: Option<&Hypers>,
        space: Option<ArrayView2<f64>>,
        n: usize,
        prior: bool,
    ) -> Result<Array2<f64>> {
        let request = Request::samples_only(n).prior(prior);
        self.predict(hypers, space, &request)?
            .samples
            .ok_or_else(|| TgpError::InvalidValue("no sample drawn".to_string()))
    }

    fn evaluate(
        &self,
        stage: fn(Quantity) -> Role,
        hypers: &Hypers,
        args: Args,
        n_observed: usize,
        request: &Request,
    ) -> Result<ResultSet> {
        let call = |q: Quantity| self.registry.call(stage(q), &args, hypers);
        let vector = |q: Quantity| call(q).map(column);
        let optional = |q: Quantity| -> Result<Option<Array1<f64>>> {
            if self.registry.contains(stage(q)) {
                vector(q).map(Some)
            } else {
                Ok(None)
            }
        };

        let mut res = ResultSet::default();
        if request.mean {
            res.mean = Some(vector(Quantity::Mean)?);
        }
        if request.variance {
            res.variance = Some(vector(Quantity::Variance)?);
            res.std = Some(vector(Quantity::Std)?);
        }
        if request.covariance {
            res.covariance = Some(call(Quantity::Covariance)?);
        }
        if request.median {
            res.median = Some(vector(Quantity::Median)?);
        }
        if request.quantiles {
            res.quantile_up = Some(vector(Quantity::QuantileUp)?);
            res.quantile_down = Some(vector(Quantity::QuantileDown)?);
        }
        if request.noise {
            res.noise = optional(Quantity::Noise)?;
            res.noise_up = optional(Quantity::NoiseUp)?;
            res.noise_down = optional(Quantity::NoiseDown)?;
        }
        if request.samples > 0 {
            res.samples = Some(self.draw(stage, hypers, args, n_observed, request.samples)?);
        }
        Ok(res)
    }

    /// Push standard normal draws (and chi-squared ones for Student-t
    /// processes) through the compiled sampler
    fn draw(
        &self,
        stage: fn(Quantity) -> Role,
        hypers: &Hypers,
        args: Args,
        n_observed: usize,
        n: usize,
    ) -> Result<Array2<f64>> {
        let m = args.space.map_or(0, |s| s.nrows());
        let chi2 = match self.freedom_name() {
            Some(name) => {
                let nu = hypers.scalar(&name).ok_or_else(|| {
                    TgpError::InvalidValue(format!("missing hyper-parameter `{name}`"))
                })? + n_observed as f64;
                Some(ChiSquared::new(nu).map_err(|e| TgpError::InvalidValue(e.to_string()))?)
            }
            None => None,
        };
        let mut rng = self.rng.borrow_mut();
        let mut samples = Array2::zeros((m, n));
        for mut col in samples.columns_mut() {
            let random = Array2::<f64>::random_using((m, 1), StandardNormal, &mut *rng);
            let scalar = chi2
                .as_ref()
                .map(|d| Array2::from_elem((1, 1), d.sample(&mut *rng)));
            let args = Args {
                space: args.space.as_ref().map(|s| s.view()),
                inputs: args.inputs.as_ref().map(|s| s.view()),
                outputs: args.outputs.as_ref().map(|s| s.view()),
                random: Some(random.view()),
                random_scalar: scalar.as_ref().map(|s| s.view()),
            };
            let sample = self.registry.call(stage(Quantity::Sampler), &args, hypers)?;
            col.assign(&sample.column(0));
        }
        debug!("Drew {} samples at {} points", n, m);
        Ok(samples)
    }
}

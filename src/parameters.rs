use crate::errors::{Result, TgpError};
use crate::kernels::KernelSpec;
use crate::mappings::MappingSpec;
use crate::mean_models::MeanSpec;
use crate::process::StochasticProcess;
use crate::regularizer::RegularizerParams;
use crate::space::SpaceInput;
use linfa::ParamGuard;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tgp_symbolic::{Backend, TapeBackend};

/// Default prefix of hyper-parameter names
pub const DEFAULT_PREFIX: &str = "gp_";
/// Local name of the degrees of freedom hyper-parameter
pub const FREEDOM: &str = "freedom";
/// Degrees of freedom have to stay above this bound for the variance to exist
pub const FREEDOM_LOWER_BOUND: f64 = 2.;

/// A set of validated stochastic process parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessValidParams {
    /// Name of the process
    pub(crate) name: String,
    /// Prefix of every hyper-parameter name
    pub(crate) prefix: String,
    /// Mean function
    pub(crate) mean: MeanSpec,
    /// Signal kernel
    pub(crate) kernel: KernelSpec,
    /// Whether a white noise kernel is summed to the signal kernel
    pub(crate) noise: bool,
    /// Output mapping
    pub(crate) mapping: MappingSpec,
    /// Registration default of the degrees of freedom, gaussian latent process when absent
    pub(crate) freedom: Option<f64>,
    /// Query domain
    pub(crate) space: SpaceInput,
    /// Covariance regularization
    pub(crate) regularizer: RegularizerParams,
    /// Seed of the random generator used for sampling
    pub(crate) seed: Option<u64>,
}

impl Default for ProcessValidParams {
    fn default() -> ProcessValidParams {
        ProcessValidParams {
            name: "process".to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            mean: MeanSpec::Constant,
            kernel: KernelSpec::SquaredExponential { dim: 1, ard: false },
            noise: true,
            mapping: MappingSpec::Identity,
            freedom: None,
            space: SpaceInput::Default,
            regularizer: RegularizerParams::default(),
            seed: None,
        }
    }
}

impl ProcessValidParams {
    /// Get the process name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the hyper-parameter prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Get the mean function
    pub fn mean(&self) -> &MeanSpec {
        &self.mean
    }

    /// Get the signal kernel
    pub fn kernel(&self) -> &KernelSpec {
        &self.kernel
    }

    /// Whether a noise kernel is used
    pub fn noise(&self) -> bool {
        self.noise
    }

    /// Get the output mapping
    pub fn mapping(&self) -> &MappingSpec {
        &self.mapping
    }

    /// Get the degrees of freedom default if any
    pub fn freedom(&self) -> Option<f64> {
        self.freedom
    }

    /// Get the query domain
    pub fn space(&self) -> &SpaceInput {
        &self.space
    }

    /// Get the covariance regularization
    pub fn regularizer(&self) -> &RegularizerParams {
        &self.regularizer
    }

    /// Get the random seed
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

#[derive(Clone, Debug)]
/// The set of parameters that can be specified to build a
/// [stochastic process](struct.StochasticProcess.html).
pub struct ProcessParams(ProcessValidParams);

impl ProcessParams {
    /// A constructor for process parameters given mean and kernel
    pub fn new(mean: MeanSpec, kernel: KernelSpec) -> ProcessParams {
        Self(ProcessValidParams {
            mean,
            kernel,
            ..Default::default()
        })
    }

    /// A constructor from validated parameters
    pub fn new_from_valid(params: &ProcessValidParams) -> Self {
        Self(params.clone())
    }

    /// Set the process name
    pub fn name(mut self, name: &str) -> Self {
        self.0.name = name.to_string();
        self
    }

    /// Set the prefix of hyper-parameter names
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.0.prefix = prefix.to_string();
        self
    }

    /// Set mean function
    pub fn mean(mut self, mean: MeanSpec) -> Self {
        self.0.mean = mean;
        self
    }

    /// Set signal kernel
    pub fn kernel(mut self, kernel: KernelSpec) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Add (default) or not a white noise kernel to the signal kernel
    pub fn noise(mut self, noise: bool) -> Self {
        self.0.noise = noise;
        self
    }

    /// Set output mapping
    pub fn mapping(mut self, mapping: MappingSpec) -> Self {
        self.0.mapping = mapping;
        self
    }

    /// Set degrees of freedom, making the latent process a Student-t process
    ///
    /// The value is the registration default of the `freedom` hyper-parameter,
    /// it has to be greater than 2.
    pub fn freedom(mut self, freedom: Option<f64>) -> Self {
        self.0.freedom = freedom;
        self
    }

    /// Set query domain
    pub fn space<S: Into<SpaceInput>>(mut self, space: S) -> Self {
        self.0.space = space.into();
        self
    }

    /// Set the lower bound of covariance eigenvalues
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.0.regularizer.jitter = jitter;
        self
    }

    /// Set covariance regularization
    pub fn regularizer(mut self, regularizer: RegularizerParams) -> Self {
        self.0.regularizer = regularizer;
        self
    }

    /// Set the seed of the random generator used for sampling
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = Some(seed);
        self
    }

    /// Check parameters, define and compile the process with the default backend
    pub fn build(self) -> Result<StochasticProcess> {
        self.build_with_backend(Arc::new(TapeBackend::new()))
    }

    /// Check parameters, define and compile the process with the given backend
    pub fn build_with_backend(self, backend: Arc<dyn Backend>) -> Result<StochasticProcess> {
        let valid = self.check()?;
        let mut process = StochasticProcess::new(valid, backend)?;
        process.compile()?;
        Ok(process)
    }
}

impl From<ProcessValidParams> for ProcessParams {
    fn from(valid: ProcessValidParams) -> Self {
        ProcessParams(valid)
    }
}

/// Input dimensions declared by a kernel description
fn kernel_dims(spec: &KernelSpec, dims: &mut Vec<usize>) {
    match spec {
        KernelSpec::SquaredExponential { dim, .. }
        | KernelSpec::AbsoluteExponential { dim, .. }
        | KernelSpec::Matern32 { dim, .. }
        | KernelSpec::Matern52 { dim, .. }
        | KernelSpec::RationalQuadratic { dim, .. }
        | KernelSpec::Periodic { dim } => dims.push(*dim),
        KernelSpec::WhiteNoise => (),
        KernelSpec::Sum(left, right) | KernelSpec::Prod(left, right) => {
            kernel_dims(left, dims);
            kernel_dims(right, dims);
        }
    }
}

impl ParamGuard for ProcessParams {
    type Checked = ProcessValidParams;
    type Error = TgpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let params = &self.0;
        if params.name.is_empty() {
            return Err(TgpError::InvalidValue(
                "process name can not be empty".to_string(),
            ));
        }
        let mut dims = vec![];
        kernel_dims(&params.kernel, &mut dims);
        if let MeanSpec::Linear { dim } = params.mean {
            dims.push(dim);
        }
        if dims.iter().any(|&d| d == 0) {
            return Err(TgpError::InvalidValue(
                "input dimension has to be positive".to_string(),
            ));
        }
        if dims.windows(2).any(|w| w[0] != w[1]) {
            return Err(TgpError::DimensionMismatch(format!(
                "mean and kernel declare different input dimensions {dims:?}"
            )));
        }
        if let Some(nu) = params.freedom {
            if !(nu.is_finite() && nu > FREEDOM_LOWER_BOUND) {
                return Err(TgpError::InvalidValue(format!(
                    "degrees of freedom should be finite and greater than {FREEDOM_LOWER_BOUND}, got {nu}"
                )));
            }
        }
        let reg = &params.regularizer;
        if !(reg.jitter.is_finite() && reg.jitter > 0.) {
            return Err(TgpError::InvalidValue(format!(
                "jitter should be finite and positive, got {}",
                reg.jitter
            )));
        }
        if !(reg.sentinel.is_finite() && reg.sentinel > 0.) {
            return Err(TgpError::InvalidValue(format!(
                "sentinel should be finite and positive, got {}",
                reg.sentinel
            )));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        let params = ProcessParams::new(
            MeanSpec::Zero,
            KernelSpec::Matern52 { dim: 2, ard: true },
        )
        .mean(MeanSpec::Linear { dim: 2 });
        assert!(params.check_ref().is_ok());
    }

    #[test]
    fn test_invalid_params() {
        let se = KernelSpec::SquaredExponential { dim: 1, ard: false };
        assert!(ProcessParams::new(MeanSpec::Zero, se.clone())
            .freedom(Some(2.))
            .check()
            .is_err());
        assert!(ProcessParams::new(MeanSpec::Zero, se.clone())
            .jitter(0.)
            .check()
            .is_err());
        assert!(matches!(
            ProcessParams::new(MeanSpec::Linear { dim: 3 }, se.clone()).check(),
            Err(TgpError::DimensionMismatch(_))
        ));
        let sum = KernelSpec::Sum(
            Box::new(se),
            Box::new(KernelSpec::Periodic { dim: 2 }),
        );
        assert!(ProcessParams::new(MeanSpec::Zero, sum).check().is_err());
    }
}

//! JSON description of a process, its observations and hyper-parameters,
//! as consumed by the `tgp` binary.
//!
//! ```json
//! {
//!   "kernel": { "squared_exponential": { "dim": 1 } },
//!   "space": [[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]],
//!   "inputs": [[1.0], [3.0]],
//!   "outputs": [2.0, -1.0],
//!   "hypers": { "gp_se_var": [1.0], "gp_se_ls": [1.0], "gp_noise_var": [0.01] }
//! }
//! ```
use crate::errors::{Result, TgpError};
use crate::hypers::Hypers;
use crate::kernels::KernelSpec;
use crate::mappings::MappingSpec;
use crate::mean_models::MeanSpec;
use crate::parameters::ProcessParams;
use crate::predict::Request;
use crate::process::StochasticProcess;
use crate::space::SpaceInput;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

fn default_mean() -> MeanSpec {
    MeanSpec::Constant
}

fn default_noise() -> bool {
    true
}

/// Process, observations and hyper-parameters description
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Name of the process
    #[serde(default)]
    pub name: Option<String>,
    /// Mean function, constant by default
    #[serde(default = "default_mean")]
    pub mean: MeanSpec,
    /// Signal kernel
    pub kernel: KernelSpec,
    /// Whether a white noise kernel is added, true by default
    #[serde(default = "default_noise")]
    pub noise: bool,
    /// Output mapping, identity by default
    #[serde(default)]
    pub mapping: MappingSpec,
    /// Degrees of freedom of a Student-t latent process
    #[serde(default)]
    pub freedom: Option<f64>,
    /// Query points as rows
    #[serde(default)]
    pub space: Option<Vec<Vec<f64>>>,
    /// Observed inputs as rows
    #[serde(default)]
    pub inputs: Vec<Vec<f64>>,
    /// Observed outputs
    #[serde(default)]
    pub outputs: Vec<f64>,
    /// Current hyper-parameters
    #[serde(default)]
    pub hypers: BTreeMap<String, Vec<f64>>,
    /// Fixed hyper-parameters
    #[serde(default)]
    pub fixed: BTreeMap<String, Vec<f64>>,
    /// Lower bound of covariance eigenvalues
    #[serde(default)]
    pub jitter: Option<f64>,
    /// Seed of the random generator
    #[serde(default)]
    pub seed: Option<u64>,
    /// Quantities to predict
    #[serde(default)]
    pub request: Request,
}

fn to_hypers(values: &BTreeMap<String, Vec<f64>>) -> Hypers {
    values
        .iter()
        .map(|(k, v)| (k.clone(), Array1::from(v.clone())))
        .collect()
}

impl ProcessConfig {
    /// Parse a JSON description
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON description from `path`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Builder parameters of the described process
    pub fn params(&self) -> Result<ProcessParams> {
        let mut params = ProcessParams::new(self.mean.clone(), self.kernel.clone())
            .noise(self.noise)
            .mapping(self.mapping.clone())
            .freedom(self.freedom);
        if let Some(name) = &self.name {
            params = params.name(name);
        }
        if let Some(rows) = &self.space {
            params = params.space(SpaceInput::from_rows(rows)?);
        }
        if let Some(jitter) = self.jitter {
            params = params.jitter(jitter);
        }
        if let Some(seed) = self.seed {
            params = params.seed(seed);
        }
        Ok(params)
    }

    /// Build and compile the process, bind observations and hyper-parameters
    pub fn build(&self) -> Result<StochasticProcess> {
        let mut process = self.params()?.build()?;
        if !self.inputs.is_empty() {
            if self.inputs.len() != self.outputs.len() {
                return Err(TgpError::DimensionMismatch(format!(
                    "{} inputs for {} outputs",
                    self.inputs.len(),
                    self.outputs.len()
                )));
            }
            process.observed(
                SpaceInput::from_rows(&self.inputs)?,
                Array1::from(self.outputs.clone()),
            )?;
        }
        process.fix_params(&to_hypers(&self.fixed))?;
        process.set_params(&to_hypers(&self.hypers))?;
        Ok(process)
    }
}

//! The stochastic process: definition, observation binding, compilation
//! and hyper-parameter state.
//!
//! A process goes through the phases
//! `Uninitialized -> SymbolicDefined -> Observed -> Compiled`. Every prior and
//! posterior quantity is defined once over placeholders, so binding new
//! observations or a new query domain never triggers a recompilation.
use crate::definitions::{
    BaseTensors, Definition, GaussianDefinition, Placeholders, TransformedDefinition,
};
use crate::errors::{Result, TgpError};
use crate::hypers::{HyperSchema, HyperSpec, Hypers, ModelContext, Transform};
use crate::kernels::{Kernel, WhiteNoise};
use crate::mappings::Mapping;
use crate::mean_models::Mean;
use crate::parameters::{ProcessValidParams, FREEDOM, FREEDOM_LOWER_BOUND};
use crate::registry::{Arg, CompiledEntry, Registry};
use crate::space::{normalize_space, DisplayIndex, NormalizedSpace, SpaceInput};
use log::{debug, info, warn};
use ndarray::{array, Array1, Array2, ArrayView2};
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use tgp_symbolic::{Backend, Expr};

/// Construction phase of a process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Functions registered, quantities not defined yet
    Uninitialized,
    /// Prior and posterior quantities defined
    SymbolicDefined,
    /// Observations bound
    Observed,
    /// Quantities compiled
    Compiled,
}

/// Observed input/output pairs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Inputs `(n, d)`
    pub inputs: Array2<f64>,
    /// Outputs `(n, 1)`
    pub outputs: Array2<f64>,
    /// Display index of the inputs
    pub index: DisplayIndex,
}

impl Record {
    /// Number of observations
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    /// Whether there is no observation
    pub fn is_empty(&self) -> bool {
        self.inputs.nrows() == 0
    }
}

/// Labels used when presenting the process
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    /// Title
    pub title: String,
    /// Label of the inputs
    pub x: String,
    /// Label of the outputs
    pub y: String,
    /// Free text
    pub text: String,
}

impl Default for Description {
    fn default() -> Self {
        Description {
            title: "title".to_string(),
            x: "x".to_string(),
            y: "y".to_string(),
            text: String::new(),
        }
    }
}

/// Gaussian, transformed gaussian or Student-t process
pub struct StochasticProcess {
    pub(crate) params: ProcessValidParams,
    pub(crate) phase: Phase,
    pub(crate) ctx: ModelContext,
    pub(crate) mean: Box<dyn Mean>,
    pub(crate) kernel: Box<dyn Kernel>,
    pub(crate) noise: Option<Box<dyn Kernel>>,
    pub(crate) mapping: Box<dyn Mapping>,
    pub(crate) freedom: Option<Expr>,
    pub(crate) base: BaseTensors,
    pub(crate) space: NormalizedSpace,
    pub(crate) record: Option<Record>,
    pub(crate) hidden: Option<Array1<f64>>,
    pub(crate) registry: Registry,
    pub(crate) likelihood: Option<CompiledEntry>,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) current: Option<Hypers>,
    pub(crate) fixed: Hypers,
    pub(crate) description: Description,
    pub(crate) rng: RefCell<Xoshiro256Plus>,
}

impl StochasticProcess {
    /// Register the functions of `params` and define every quantity
    ///
    /// Input dimensions are checked against the query domain before anything
    /// is defined.
    pub fn new(params: ProcessValidParams, backend: Arc<dyn Backend>) -> Result<Self> {
        let space = normalize_space(params.space.clone(), Arg::Space.name(), false)?;
        let prefix = params.prefix.as_str();

        let mut ctx = ModelContext::new();
        let mut mean = params.mean.build();
        mean.register_hypers(&mut ctx, prefix)?;
        let mut kernel = params.kernel.build();
        kernel.register_hypers(&mut ctx, prefix)?;
        let mut noise = params
            .noise
            .then(|| Box::<WhiteNoise>::default() as Box<dyn Kernel>);
        if let Some(noise) = noise.as_mut() {
            noise.register_hypers(&mut ctx, prefix)?;
        }
        let mut mapping = params.mapping.build();
        mapping.register_hypers(&mut ctx, prefix)?;
        let freedom = params
            .freedom
            .map(|nu| {
                ctx.declare(HyperSpec {
                    name: format!("{prefix}{FREEDOM}"),
                    len: 1,
                    transform: Transform::Positive {
                        lower: FREEDOM_LOWER_BOUND,
                    },
                    default: array![nu],
                })
            })
            .transpose()?;

        let sample = space.sample();
        mean.check_dims(&sample.view())?;
        kernel.check_dims(&sample.view())?;

        let placeholders = Placeholders {
            space: space.placeholder.clone(),
            inputs: Expr::input(Arg::Inputs.name()),
            outputs: Expr::input(Arg::Outputs.name()),
            random: Expr::input(Arg::Random.name()),
            random_scalar: Expr::input(Arg::RandomScalar.name()),
        };
        let base = BaseTensors::build(
            placeholders,
            mean.as_ref(),
            kernel.as_ref(),
            noise.as_deref(),
            mapping.as_ref(),
            params.regularizer,
        )?;
        let rng = match params.seed {
            Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
            None => Xoshiro256Plus::from_entropy(),
        };

        let mut process = StochasticProcess {
            phase: Phase::Uninitialized,
            ctx,
            mean,
            kernel,
            noise,
            mapping,
            freedom,
            base,
            space,
            record: None,
            hidden: None,
            registry: Registry::default(),
            likelihood: None,
            backend,
            current: None,
            fixed: Hypers::new(),
            description: Description::default(),
            rng: RefCell::new(rng),
            params,
        };
        process.define()?;
        Ok(process)
    }

    /// Symbolic definition matching the mapping and the degrees of freedom
    fn definition(&self) -> Result<Box<dyn Definition + '_>> {
        if self.mapping.is_identity() && self.freedom.is_none() {
            Ok(Box::new(GaussianDefinition::new()?))
        } else {
            Ok(Box::new(TransformedDefinition::new(
                self.mapping.as_ref(),
                self.freedom.clone(),
            )?))
        }
    }

    /// `Uninitialized -> SymbolicDefined`
    fn define(&mut self) -> Result<()> {
        if self.phase != Phase::Uninitialized {
            return Err(TgpError::InvalidState(format!(
                "process `{}` is already defined",
                self.params.name
            )));
        }
        let (prior, posterior) = {
            let definition = self.definition()?;
            debug!("Defining `{}` with {:?}", self.params.name, definition);
            (
                definition.prior(&self.base)?,
                definition.posterior(&self.base)?,
            )
        };
        self.registry.define_base(&self.base)?;
        self.registry.define_prior(&prior)?;
        self.registry.define_posterior(&posterior)?;
        self.phase = Phase::SymbolicDefined;
        info!(
            "Process `{}` defined with {} hyper-parameters",
            self.params.name,
            self.ctx.schema().len()
        );
        Ok(())
    }

    /// Bind observations, empty inputs clear the record
    ///
    /// The log-likelihood is built and compiled on the first non-empty
    /// observations, later calls only bind new values.
    pub fn observed<I, O>(&mut self, inputs: I, outputs: O) -> Result<()>
    where
        I: Into<SpaceInput>,
        O: Into<SpaceInput>,
    {
        if self.phase == Phase::Uninitialized {
            return Err(TgpError::InvalidState(
                "observations bound before definition".to_string(),
            ));
        }
        let inputs = normalize_space(inputs.into(), Arg::Inputs.name(), false)?;
        let record = match (inputs.values, inputs.index) {
            (Some(x), Some(index)) if x.nrows() > 0 => {
                let outputs = normalize_space(outputs.into(), Arg::Outputs.name(), true)?;
                let y = outputs.values.ok_or_else(|| {
                    TgpError::MissingObservation("outputs have no values".to_string())
                })?;
                Some(Record {
                    inputs: x,
                    outputs: y,
                    index,
                })
            }
            _ => None,
        };

        if let Some(record) = &record {
            self.check_record(record)?;
        }
        let rebuild = record.is_some() && self.likelihood.is_none();
        match &record {
            Some(r) => info!("Process `{}` observes {} points", self.params.name, r.len()),
            None => info!("Process `{}` observations cleared", self.params.name),
        }
        self.record = record;
        if rebuild {
            let expr = self.definition()?.log_likelihood(&self.base)?;
            let entry = CompiledEntry::compile(
                self.backend.as_ref(),
                &expr,
                &self.ctx.schema().names(),
            )?;
            debug!("Log-likelihood compiled with arguments {:?}", entry.args());
            self.likelihood = Some(entry);
        }
        if self.phase == Phase::SymbolicDefined {
            self.phase = Phase::Observed;
        }
        Ok(())
    }

    fn check_record(&self, record: &Record) -> Result<()> {
        if record.outputs.nrows() != record.inputs.nrows() {
            return Err(TgpError::DimensionMismatch(format!(
                "{} inputs for {} outputs",
                record.inputs.nrows(),
                record.outputs.nrows()
            )));
        }
        self.check_inputs(&record.inputs.view())
    }

    /// Check sample points against the domain and the functions dimensions
    pub(crate) fn check_inputs(&self, x: &ArrayView2<f64>) -> Result<()> {
        let d = self.space.dim();
        if x.ncols() != d {
            return Err(TgpError::DimensionMismatch(format!(
                "points of dimension {} for a domain of dimension {}",
                x.ncols(),
                d
            )));
        }
        self.mean.check_dims(x)?;
        self.kernel.check_dims(x)?;
        if let Some(noise) = &self.noise {
            noise.check_dims(x)?;
        }
        Ok(())
    }

    /// Compile every quantity, a no-op once compiled
    pub fn compile(&mut self) -> Result<()> {
        match self.phase {
            Phase::Uninitialized => Err(TgpError::InvalidState(
                "process compiled before definition".to_string(),
            )),
            Phase::Compiled => Ok(()),
            Phase::SymbolicDefined | Phase::Observed => {
                let names = self.ctx.schema().names();
                self.registry.compile(self.backend.as_ref(), &names)?;
                self.phase = Phase::Compiled;
                info!(
                    "Process `{}` compiled ({} compilations)",
                    self.params.name,
                    self.backend.compilations()
                );
                Ok(())
            }
        }
    }

    /// Replace the query domain, its dimension can not change
    ///
    /// Hidden values shorter than the new domain are dropped.
    pub fn set_space<S: Into<SpaceInput>>(&mut self, space: S) -> Result<()> {
        let space = normalize_space(space.into(), Arg::Space.name(), false)?;
        self.check_inputs(&space.sample().view())?;
        let points = space.index.as_ref().map_or(0, |i| i.len());
        if self.hidden.as_ref().map_or(false, |h| h.len() < points) {
            warn!("Hidden values shorter than the new domain are dropped");
            self.hidden = None;
        }
        self.space = space;
        Ok(())
    }

    /// Override the labels used when presenting the process
    pub fn describe(
        &mut self,
        title: Option<&str>,
        x: Option<&str>,
        y: Option<&str>,
        text: Option<&str>,
    ) {
        let d = &mut self.description;
        for (field, value) in [
            (&mut d.title, title),
            (&mut d.x, x),
            (&mut d.y, y),
            (&mut d.text, text),
        ] {
            if let Some(v) = value {
                *field = v.to_string();
            }
        }
    }

    /// Set the values of the latent process at the query points, shown by `plot`
    pub fn set_hidden(&mut self, hidden: Option<Array1<f64>>) -> Result<()> {
        if let (Some(h), Some(index)) = (&hidden, &self.space.index) {
            if h.len() < index.len() {
                return Err(TgpError::DimensionMismatch(format!(
                    "{} hidden values for {} query points",
                    h.len(),
                    index.len()
                )));
            }
        }
        self.hidden = hidden;
        Ok(())
    }

    /// Hyper-parameters derived from the observations, registration defaults
    /// without observations, fixed values applied
    pub fn default_params(&self) -> Result<Hypers> {
        let mut hypers = self.ctx.schema().defaults();
        if let Some(record) = &self.record {
            let x = record.inputs.view();
            let y = record.outputs.column(0);
            hypers.update(&self.mean.default_hypers(&x, &y)?);
            hypers.update(&self.kernel.default_hypers(&x, &y)?);
            if let Some(noise) = &self.noise {
                hypers.update(&noise.default_hypers(&x, &y)?);
            }
            hypers.update(&self.mapping.default_hypers(&y)?);
        }
        hypers.update(&self.fixed);
        Ok(hypers)
    }

    /// Hyper-parameters set by the caller, defaults otherwise, fixed values applied
    pub fn current_params(&self) -> Result<Hypers> {
        let mut hypers = match &self.current {
            Some(current) => current.clone(),
            None => self.default_params()?,
        };
        hypers.update(&self.fixed);
        Ok(hypers)
    }

    /// Set (some of) the current hyper-parameters
    pub fn set_params(&mut self, hypers: &Hypers) -> Result<()> {
        self.ctx.schema().check_partial(hypers)?;
        let mut current = self.current_params()?;
        current.update(hypers);
        self.current = Some(current);
        Ok(())
    }

    /// Pin hyper-parameters, inference keeps them unchanged
    pub fn fix_params(&mut self, hypers: &Hypers) -> Result<()> {
        self.ctx.schema().check_partial(hypers)?;
        self.fixed.update(hypers);
        Ok(())
    }

    /// Release every pinned hyper-parameter
    pub fn unfix_params(&mut self) {
        self.fixed = Hypers::new();
    }

    /// Complete set of hyper-parameters: `hypers` over the current ones,
    /// fixed values applied, checked against the schema
    pub fn resolve(&self, hypers: Option<&Hypers>) -> Result<Hypers> {
        let schema = self.ctx.schema();
        let mut resolved = self.current_params()?;
        if let Some(given) = hypers {
            schema.check_partial(given)?;
            resolved.update(given);
        }
        resolved.update(&self.fixed);
        schema.check(&resolved)?;
        Ok(resolved)
    }

    /// Pinned hyper-parameters
    pub fn fixed_params(&self) -> &Hypers {
        &self.fixed
    }

    /// Hyper-parameter declarations
    pub fn schema(&self) -> &HyperSchema {
        self.ctx.schema()
    }

    /// Full name of the degrees of freedom hyper-parameter if any
    pub fn freedom_name(&self) -> Option<String> {
        self.freedom
            .as_ref()
            .map(|_| format!("{}{}", self.params.prefix, FREEDOM))
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Parameters the process was built from
    pub fn params(&self) -> &ProcessValidParams {
        &self.params
    }

    /// Name of the process
    pub fn name(&self) -> &str {
        &self.params.name
    }

    /// Query domain
    pub fn space(&self) -> &NormalizedSpace {
        &self.space
    }

    /// Hidden values of the latent process if any
    pub fn hidden(&self) -> Option<&Array1<f64>> {
        self.hidden.as_ref()
    }

    /// Bound observations if any
    pub fn record(&self) -> Option<&Record> {
        self.record.as_ref()
    }

    /// Presentation labels
    pub fn description(&self) -> &Description {
        &self.description
    }

    /// Compilation backend
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Compiled quantities
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl fmt::Display for StochasticProcess {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}(mean={}, kernel={}",
            self.params.name, self.mean, self.kernel
        )?;
        if let Some(noise) = &self.noise {
            write!(f, ", noise={noise}")?;
        }
        if !self.mapping.is_identity() {
            write!(f, ", mapping={}", self.mapping)?;
        }
        if self.freedom.is_some() {
            write!(f, ", student-t")?;
        }
        write!(f, ")")
    }
}

impl fmt::Debug for StochasticProcess {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StochasticProcess")
            .field("params", &self.params)
            .field("phase", &self.phase)
            .field("record", &self.record)
            .field("fixed", &self.fixed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::KernelSpec;
    use crate::mappings::MappingSpec;
    use crate::mean_models::MeanSpec;
    use crate::parameters::ProcessParams;
    use crate::registry::{Quantity, Role};
    use linfa::ParamGuard;
    use tgp_symbolic::TapeBackend;

    fn params() -> ProcessParams {
        ProcessParams::new(
            MeanSpec::Constant,
            KernelSpec::SquaredExponential { dim: 1, ard: false },
        )
        .space(Array1::linspace(0., 5., 6))
        .seed(42)
    }

    #[test]
    fn test_phases() {
        let valid = params().check().unwrap();
        let mut gp = StochasticProcess::new(valid, Arc::new(TapeBackend::new())).unwrap();
        assert_eq!(gp.phase(), Phase::SymbolicDefined);
        gp.observed(array![[1.], [3.]], array![2., -1.]).unwrap();
        assert_eq!(gp.phase(), Phase::Observed);
        gp.compile().unwrap();
        assert_eq!(gp.phase(), Phase::Compiled);
        gp.observed(Array2::<f64>::zeros((0, 1)), Array1::<f64>::zeros(0))
            .unwrap();
        assert!(gp.record().is_none());
        assert_eq!(gp.phase(), Phase::Compiled);
        assert!(gp.registry().contains(Role::Posterior(Quantity::NoiseUp)));
    }

    #[test]
    fn test_schema_names() {
        let gp = params()
            .mapping(MappingSpec::BoxCox)
            .freedom(Some(5.))
            .build()
            .unwrap();
        assert_eq!(
            gp.schema().names(),
            vec![
                "gp_mean_constant",
                "gp_se_var",
                "gp_se_ls",
                "gp_noise_var",
                "gp_boxcox_shift",
                "gp_boxcox_power",
                "gp_freedom"
            ]
        );
        assert_eq!(gp.freedom_name().as_deref(), Some("gp_freedom"));
    }

    #[test]
    fn test_noiseless_has_no_noise_roles() {
        let gp = params().noise(false).build().unwrap();
        assert!(!gp.registry().contains(Role::Prior(Quantity::Noise)));
        assert!(gp.registry().contains(Role::Prior(Quantity::Sampler)));
    }

    #[test]
    fn test_dimension_checks() {
        let mut gp = params().build().unwrap();
        assert!(matches!(
            gp.observed(array![[1., 2.]], array![1.]),
            Err(TgpError::DimensionMismatch(_))
        ));
        assert!(matches!(
            gp.observed(array![[1.], [2.]], array![1.]),
            Err(TgpError::DimensionMismatch(_))
        ));
        assert!(matches!(
            gp.set_space(array![[1., 2.]]),
            Err(TgpError::DimensionMismatch(_))
        ));
        assert!(gp.set_space(array![0.5, 1.5]).is_ok());
        let bad = params()
            .kernel(KernelSpec::SquaredExponential { dim: 2, ard: false })
            .check()
            .unwrap();
        assert!(matches!(
            StochasticProcess::new(bad, Arc::new(TapeBackend::new())),
            Err(TgpError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_deferred_space_dimension_checks() {
        let bad = params()
            .kernel(KernelSpec::SquaredExponential { dim: 2, ard: false })
            .space(SpaceInput::Count(5));
        assert!(matches!(bad.build(), Err(TgpError::DimensionMismatch(_))));

        let mut gp = params().space(SpaceInput::Count(5)).build().unwrap();
        assert_eq!(gp.space().dim(), 1);
        assert!(matches!(
            gp.observed(array![[1., 2.]], array![1.]),
            Err(TgpError::DimensionMismatch(_))
        ));
        assert!(gp.observed(array![[1.], [2.]], array![1., 0.]).is_ok());
    }

    #[test]
    fn test_space_change_drops_short_hidden() {
        let mut gp = params().space(Array1::linspace(0., 4., 5)).build().unwrap();
        gp.set_hidden(Some(Array1::zeros(5))).unwrap();
        gp.set_space(Array1::linspace(0., 4., 3)).unwrap();
        assert_eq!(gp.hidden().map(|h| h.len()), Some(5));
        gp.set_space(Array1::linspace(0., 4., 9)).unwrap();
        assert!(gp.hidden().is_none());
    }

    #[test]
    fn test_params_state() {
        let mut gp = params().build().unwrap();
        let registered = gp.default_params().unwrap();
        assert_eq!(registered.scalar("gp_noise_var"), Some(1e-2));

        gp.observed(array![[1.], [3.]], array![2., -1.]).unwrap();
        let defaults = gp.default_params().unwrap();
        assert_eq!(defaults.scalar("gp_mean_constant"), Some(0.5));
        assert_eq!(defaults.scalar("gp_se_ls"), Some(1.));

        gp.set_params(&Hypers::new().with("gp_se_var", 3.)).unwrap();
        gp.fix_params(&Hypers::new().with("gp_se_ls", 0.2)).unwrap();
        let current = gp.current_params().unwrap();
        assert_eq!(current.scalar("gp_se_var"), Some(3.));
        assert_eq!(current.scalar("gp_se_ls"), Some(0.2));
        let resolved = gp
            .resolve(Some(&Hypers::new().with("gp_se_ls", 9.)))
            .unwrap();
        assert_eq!(resolved.scalar("gp_se_ls"), Some(0.2));
        assert!(gp.set_params(&Hypers::new().with("unknown", 1.)).is_err());
        gp.unfix_params();
        assert!(gp.fixed_params().is_empty());
    }

    #[test]
    fn test_describe() {
        let mut gp = params().name("Temperature").build().unwrap();
        gp.describe(Some("Daily"), None, Some("celsius"), None);
        assert_eq!(gp.description().title, "Daily");
        assert_eq!(gp.description().x, "x");
        assert_eq!(gp.description().y, "celsius");
        assert!(gp.to_string().starts_with("Temperature(mean=ConstantMean"));
    }
}

//! Compilation cache of the symbolic quantities of a process.
//!
//! A [`Registry`] holds, per [`Role`], either the symbolic expression
//! (definition phase) or the compiled function (compiled phase), never
//! both. Compilation happens once per role, evaluations only bind new
//! positional arrays and hyper-parameter values.
use crate::definitions::{BaseTensors, Quantities};
use crate::errors::{Result, TgpError};
use crate::hypers::Hypers;
use log::{debug, info};
use ndarray::{Array2, ArrayView2};
use std::collections::BTreeMap;
use std::fmt;
use tgp_symbolic::{Backend, Expr, Function, Signature};

/// Positional argument of a compiled function, in calling order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Arg {
    /// Query points
    Space,
    /// Observed inputs
    Inputs,
    /// Observed outputs
    Outputs,
    /// Standard normal draws
    Random,
    /// Chi-squared draw
    RandomScalar,
}

impl Arg {
    /// Every argument in calling order
    pub const ALL: [Arg; 5] = [
        Arg::Space,
        Arg::Inputs,
        Arg::Outputs,
        Arg::Random,
        Arg::RandomScalar,
    ];

    /// Name of the placeholder standing for this argument
    pub fn name(&self) -> &'static str {
        match self {
            Arg::Space => "space",
            Arg::Inputs => "inputs",
            Arg::Outputs => "outputs",
            Arg::Random => "random",
            Arg::RandomScalar => "random_scalar",
        }
    }

    fn from_name(name: &str) -> Option<Arg> {
        Arg::ALL.iter().copied().find(|a| a.name() == name)
    }
}

/// Values of the positional arguments of a call
#[derive(Clone, Copy, Debug, Default)]
pub struct Args<'a> {
    /// Query points `(m, d)`
    pub space: Option<ArrayView2<'a, f64>>,
    /// Observed inputs `(n, d)`
    pub inputs: Option<ArrayView2<'a, f64>>,
    /// Observed outputs `(n, 1)`
    pub outputs: Option<ArrayView2<'a, f64>>,
    /// Standard normal draws `(m, 1)`
    pub random: Option<ArrayView2<'a, f64>>,
    /// Chi-squared draw `(1, 1)`
    pub random_scalar: Option<ArrayView2<'a, f64>>,
}

impl<'a> Args<'a> {
    fn get(&self, arg: Arg) -> Option<ArrayView2<'a, f64>> {
        match arg {
            Arg::Space => self.space,
            Arg::Inputs => self.inputs,
            Arg::Outputs => self.outputs,
            Arg::Random => self.random,
            Arg::RandomScalar => self.random_scalar,
        }
    }
}

/// Predictive quantity
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quantity {
    /// Mean
    Mean,
    /// Covariance matrix
    Covariance,
    /// Variance
    Variance,
    /// Standard deviation
    Std,
    /// Standard deviation including observation noise
    Noise,
    /// Median
    Median,
    /// Upper quantile
    QuantileUp,
    /// Lower quantile
    QuantileDown,
    /// Upper quantile including observation noise
    NoiseUp,
    /// Lower quantile including observation noise
    NoiseDown,
    /// Sampling transform
    Sampler,
}

impl Quantity {
    /// Every quantity
    pub const ALL: [Quantity; 11] = [
        Quantity::Mean,
        Quantity::Covariance,
        Quantity::Variance,
        Quantity::Std,
        Quantity::Noise,
        Quantity::Median,
        Quantity::QuantileUp,
        Quantity::QuantileDown,
        Quantity::NoiseUp,
        Quantity::NoiseDown,
        Quantity::Sampler,
    ];

    /// Whether the quantity only exists with a noise kernel
    pub fn is_optional(&self) -> bool {
        matches!(self, Quantity::Noise | Quantity::NoiseUp | Quantity::NoiseDown)
    }

    fn name(&self) -> &'static str {
        match self {
            Quantity::Mean => "mean",
            Quantity::Covariance => "covariance",
            Quantity::Variance => "variance",
            Quantity::Std => "std",
            Quantity::Noise => "noise",
            Quantity::Median => "median",
            Quantity::QuantileUp => "quantile_up",
            Quantity::QuantileDown => "quantile_down",
            Quantity::NoiseUp => "noise_up",
            Quantity::NoiseDown => "noise_down",
            Quantity::Sampler => "sampler",
        }
    }

    fn select<'q>(&self, q: &'q Quantities) -> Option<&'q Expr> {
        match self {
            Quantity::Mean => Some(&q.mean),
            Quantity::Covariance => Some(&q.covariance),
            Quantity::Variance => Some(&q.variance),
            Quantity::Std => Some(&q.std),
            Quantity::Noise => q.noise.as_ref(),
            Quantity::Median => Some(&q.median),
            Quantity::QuantileUp => Some(&q.quantile_up),
            Quantity::QuantileDown => Some(&q.quantile_down),
            Quantity::NoiseUp => q.noise_up.as_ref(),
            Quantity::NoiseDown => q.noise_down.as_ref(),
            Quantity::Sampler => Some(&q.sampler),
        }
    }
}

/// Building block of the predictive quantities
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Base {
    /// Mean at query points
    LocationSpace,
    /// Mean at observed inputs
    LocationInputs,
    /// Full covariance of query points
    KernelSpace,
    /// Full covariance of observed inputs
    KernelInputs,
    /// Full cross-covariance
    KernelSpaceInputs,
    /// Signal covariance of query points
    KernelFSpace,
    /// Signal covariance of observed inputs
    KernelFInputs,
    /// Signal cross-covariance
    KernelFSpaceInputs,
    /// Latent observed outputs
    MappingOutputs,
}

impl Base {
    /// Every building block
    pub const ALL: [Base; 9] = [
        Base::LocationSpace,
        Base::LocationInputs,
        Base::KernelSpace,
        Base::KernelInputs,
        Base::KernelSpaceInputs,
        Base::KernelFSpace,
        Base::KernelFInputs,
        Base::KernelFSpaceInputs,
        Base::MappingOutputs,
    ];

    fn name(&self) -> &'static str {
        match self {
            Base::LocationSpace => "location_space",
            Base::LocationInputs => "location_inputs",
            Base::KernelSpace => "kernel_space",
            Base::KernelInputs => "kernel_inputs",
            Base::KernelSpaceInputs => "kernel_space_inputs",
            Base::KernelFSpace => "kernel_f_space",
            Base::KernelFInputs => "kernel_f_inputs",
            Base::KernelFSpaceInputs => "kernel_f_space_inputs",
            Base::MappingOutputs => "mapping_outputs",
        }
    }

    fn select<'b>(&self, b: &'b BaseTensors) -> &'b Expr {
        match self {
            Base::LocationSpace => &b.location_space,
            Base::LocationInputs => &b.location_inputs,
            Base::KernelSpace => &b.kernel_space,
            Base::KernelInputs => &b.kernel_inputs,
            Base::KernelSpaceInputs => &b.kernel_space_inputs,
            Base::KernelFSpace => &b.kernel_f_space,
            Base::KernelFInputs => &b.kernel_f_inputs,
            Base::KernelFSpaceInputs => &b.kernel_f_space_inputs,
            Base::MappingOutputs => &b.mapping_outputs,
        }
    }
}

/// Role of an expression in a process
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// Building block
    Base(Base),
    /// Quantity before conditioning
    Prior(Quantity),
    /// Quantity after conditioning
    Posterior(Quantity),
    /// Log-density of the observations
    LogLikelihood,
}

impl Role {
    /// Roles every compiled process provides
    pub fn mandatory() -> impl Iterator<Item = Role> {
        let base = Base::ALL.into_iter().map(Role::Base);
        let quantities = Quantity::ALL
            .into_iter()
            .filter(|q| !q.is_optional())
            .flat_map(|q| [Role::Prior(q), Role::Posterior(q)]);
        base.chain(quantities)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Role::Base(b) => write!(f, "{}", b.name()),
            Role::Prior(q) => write!(f, "prior_{}", q.name()),
            Role::Posterior(q) => write!(f, "posterior_{}", q.name()),
            Role::LogLikelihood => write!(f, "log_likelihood"),
        }
    }
}

/// A compiled function with the positional arguments it expects
pub struct CompiledEntry {
    args: Vec<Arg>,
    function: Box<dyn Function>,
}

impl CompiledEntry {
    /// Compile `expr` taking the positional arguments it depends on, then
    /// every hyper-parameter of `hypers` by name
    pub fn compile(backend: &dyn Backend, expr: &Expr, hypers: &[String]) -> Result<Self> {
        let free = expr.free_inputs();
        if let Some(unknown) = free.iter().find(|n| Arg::from_name(n).is_none()) {
            return Err(TgpError::CompilationFailure(format!(
                "unknown positional input `{unknown}`"
            )));
        }
        let args: Vec<Arg> = Arg::ALL
            .into_iter()
            .filter(|a| free.contains(a.name()))
            .collect();
        let signature = Signature::new(args.iter().map(|a| a.name()), hypers.iter().cloned());
        let function = backend
            .compile(&signature, expr)
            .map_err(|e| TgpError::CompilationFailure(e.to_string()))?;
        Ok(CompiledEntry { args, function })
    }

    /// Positional arguments in calling order
    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Evaluate with the positional `args` and hyper-parameters `hypers`
    pub fn call(&self, args: &Args, hypers: &Hypers) -> Result<Array2<f64>> {
        let views = self
            .args
            .iter()
            .map(|&a| {
                args.get(a).ok_or_else(|| match a {
                    Arg::Inputs | Arg::Outputs => {
                        TgpError::MissingObservation(format!("no value for `{}`", a.name()))
                    }
                    _ => TgpError::InvalidValue(format!("no value for `{}`", a.name())),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.function.call(&views, hypers)?)
    }
}

impl fmt::Debug for CompiledEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CompiledEntry")
            .field("args", &self.args)
            .finish()
    }
}

/// Symbolic expressions or compiled functions by role
#[derive(Debug)]
pub enum Registry {
    /// Definition phase
    Symbolic(BTreeMap<Role, Expr>),
    /// Compiled phase
    Compiled(BTreeMap<Role, CompiledEntry>),
}

impl Default for Registry {
    fn default() -> Self {
        Registry::Symbolic(BTreeMap::new())
    }
}

impl Registry {
    /// Record the expression of `role`
    pub fn define(&mut self, role: Role, expr: Expr) -> Result<()> {
        match self {
            Registry::Symbolic(exprs) => {
                exprs.insert(role, expr);
                Ok(())
            }
            Registry::Compiled(_) => Err(TgpError::InvalidState(format!(
                "cannot define `{role}` once compiled"
            ))),
        }
    }

    /// Record the building blocks
    pub fn define_base(&mut self, base: &BaseTensors) -> Result<()> {
        Base::ALL
            .into_iter()
            .try_for_each(|b| self.define(Role::Base(b), b.select(base).clone()))
    }

    /// Record prior quantities, absent optional ones are skipped
    pub fn define_prior(&mut self, q: &Quantities) -> Result<()> {
        self.define_quantities(Role::Prior, q)
    }

    /// Record posterior quantities, absent optional ones are skipped
    pub fn define_posterior(&mut self, q: &Quantities) -> Result<()> {
        self.define_quantities(Role::Posterior, q)
    }

    fn define_quantities(&mut self, stage: fn(Quantity) -> Role, q: &Quantities) -> Result<()> {
        for quantity in Quantity::ALL {
            if let Some(expr) = quantity.select(q) {
                self.define(stage(quantity), expr.clone())?;
            }
        }
        Ok(())
    }

    /// Expression of `role` during the definition phase
    pub fn expr(&self, role: Role) -> Result<&Expr> {
        match self {
            Registry::Symbolic(exprs) => exprs
                .get(&role)
                .ok_or_else(|| TgpError::InvalidState(format!("`{role}` is not defined"))),
            Registry::Compiled(_) => Err(TgpError::InvalidState(format!(
                "`{role}` is compiled, its expression is no longer held"
            ))),
        }
    }

    /// Whether the registry is in the compiled phase
    pub fn is_compiled(&self) -> bool {
        matches!(self, Registry::Compiled(_))
    }

    /// Whether `role` has an entry
    pub fn contains(&self, role: Role) -> bool {
        match self {
            Registry::Symbolic(exprs) => exprs.contains_key(&role),
            Registry::Compiled(fns) => fns.contains_key(&role),
        }
    }

    /// Roles having an entry
    pub fn roles(&self) -> Vec<Role> {
        match self {
            Registry::Symbolic(exprs) => exprs.keys().copied().collect(),
            Registry::Compiled(fns) => fns.keys().copied().collect(),
        }
    }

    /// Compile every expression, a no-op once compiled
    ///
    /// Fails without compiling anything when a mandatory role is missing.
    pub fn compile(&mut self, backend: &dyn Backend, hypers: &[String]) -> Result<()> {
        let exprs = match self {
            Registry::Compiled(_) => return Ok(()),
            Registry::Symbolic(exprs) => exprs,
        };
        if let Some(missing) = Role::mandatory().find(|r| !exprs.contains_key(r)) {
            return Err(TgpError::CompilationFailure(format!(
                "no expression for `{missing}`"
            )));
        }
        let mut compiled = BTreeMap::new();
        for (role, expr) in exprs.iter() {
            let entry = CompiledEntry::compile(backend, expr, hypers).map_err(|e| {
                TgpError::CompilationFailure(format!("`{role}`: {e}"))
            })?;
            debug!("Compiled `{}` with arguments {:?}", role, entry.args());
            compiled.insert(*role, entry);
        }
        info!("Compiled {} roles", compiled.len());
        *self = Registry::Compiled(compiled);
        Ok(())
    }

    /// Evaluate the compiled function of `role`
    pub fn call(&self, role: Role, args: &Args, hypers: &Hypers) -> Result<Array2<f64>> {
        match self {
            Registry::Compiled(fns) => fns
                .get(&role)
                .ok_or_else(|| TgpError::InvalidState(format!("`{role}` is not available")))?
                .call(args, hypers),
            Registry::Symbolic(_) => Err(TgpError::InvalidState(format!(
                "`{role}` is not compiled yet"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use tgp_symbolic::TapeBackend;

    #[test]
    fn test_role_names() {
        assert_eq!(Role::Prior(Quantity::QuantileUp).to_string(), "prior_quantile_up");
        assert_eq!(
            Role::Base(Base::KernelFSpaceInputs).to_string(),
            "kernel_f_space_inputs"
        );
        assert_eq!(Role::mandatory().count(), 9 + 2 * 8);
    }

    #[test]
    fn test_signature_keeps_needed_arguments() {
        let backend = TapeBackend::new();
        let expr = Expr::input("outputs") * Expr::hyper("a") + Expr::input("space").sum();
        let entry = CompiledEntry::compile(&backend, &expr, &["a".to_string()]).unwrap();
        assert_eq!(entry.args(), &[Arg::Space, Arg::Outputs]);

        let outputs_only = array![[1.], [2.]];
        let args = Args {
            space: None,
            outputs: Some(outputs_only.view()),
            ..Args::default()
        };
        let h = Hypers::new().with("a", 2.);
        assert!(matches!(entry.call(&args, &h), Err(TgpError::InvalidValue(_))));
        let space = array![[1.], [1.]];
        let outputs = array![[1.], [2.]];
        let args = Args {
            space: Some(space.view()),
            outputs: Some(outputs.view()),
            ..Args::default()
        };
        assert_abs_diff_eq!(entry.call(&args, &h).unwrap(), array![[4.], [6.]]);
    }

    #[test]
    fn test_missing_mandatory_role() {
        let mut registry = Registry::default();
        registry
            .define(Role::Prior(Quantity::Mean), Expr::input("space"))
            .unwrap();
        let backend = TapeBackend::new();
        assert!(matches!(
            registry.compile(&backend, &[]),
            Err(TgpError::CompilationFailure(_))
        ));
        assert!(!registry.is_compiled());
        assert_eq!(backend.compilations(), 0);
    }

    #[test]
    fn test_phases_are_exclusive() {
        let mut registry = Registry::default();
        for role in Role::mandatory() {
            registry.define(role, Expr::input("space") * 2.).unwrap();
        }
        assert!(registry.call(Role::Prior(Quantity::Mean), &Args::default(), &Hypers::new()).is_err());
        let backend = TapeBackend::new();
        registry.compile(&backend, &[]).unwrap();
        let n = backend.compilations();
        registry.compile(&backend, &[]).unwrap();
        assert_eq!(backend.compilations(), n);
        assert!(registry.expr(Role::Prior(Quantity::Mean)).is_err());
        assert!(registry
            .define(Role::LogLikelihood, Expr::scalar(0.))
            .is_err());
        assert!(!registry.contains(Role::Prior(Quantity::Noise)));
    }
}

//! Hyper-parameter schema, values and the model context in which
//! mean, kernel and mapping functions declare their hyper-parameters.
use crate::errors::{Result, TgpError};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use statrs::distribution::{Continuous, LogNormal};
use std::fmt;
use tgp_symbolic::{Expr, HyperSource};

/// Map between a hyper-parameter natural domain and the real line
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Transform {
    /// Unconstrained value
    Identity,
    /// Value above `lower`, `lower + exp(u)`
    Positive {
        /// lower bound
        lower: f64,
    },
}

impl Transform {
    /// Positive value, `exp(u)`
    pub const LOG: Transform = Transform::Positive { lower: 0. };

    /// Unconstrained coordinate of `v`
    pub fn to_unconstrained(&self, v: f64) -> f64 {
        match self {
            Transform::Identity => v,
            Transform::Positive { lower } => (v - lower).max(f64::MIN_POSITIVE).ln(),
        }
    }

    /// Natural value of the unconstrained coordinate `u`
    pub fn from_unconstrained(&self, u: f64) -> f64 {
        match self {
            Transform::Identity => u,
            Transform::Positive { lower } => lower + u.exp(),
        }
    }

    /// `log |dv/du|`
    pub fn log_jacobian(&self, u: f64) -> f64 {
        match self {
            Transform::Identity => 0.,
            Transform::Positive { .. } => u,
        }
    }

    /// Log-density of the default prior at the natural value `v`, centered on `center`
    ///
    /// Positive values follow a log-normal of log-scale [`PRIOR_LOG_STD`] on
    /// `v - lower`, unconstrained values a flat prior.
    pub fn log_prior(&self, v: f64, center: f64) -> f64 {
        match self {
            Transform::Identity => 0.,
            Transform::Positive { lower } => {
                LogNormal::new(self.to_unconstrained(center), PRIOR_LOG_STD)
                    .map_or(f64::NEG_INFINITY, |prior| prior.ln_pdf(v - lower))
            }
        }
    }
}

/// Log-scale of the default log-normal prior of positive hyper-parameters
pub const PRIOR_LOG_STD: f64 = 3.;

/// Declaration of one hyper-parameter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HyperSpec {
    /// Scoped name
    pub name: String,
    /// Number of scalar values
    pub len: usize,
    /// Domain of the values
    pub transform: Transform,
    /// Value used when nothing better is known
    pub default: Array1<f64>,
}

/// Ordered set of hyper-parameter declarations
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HyperSchema {
    specs: Vec<HyperSpec>,
}

impl HyperSchema {
    /// Add a declaration, declaring twice the same name with the same length is a no-op
    pub fn declare(&mut self, spec: HyperSpec) -> Result<()> {
        match self.get(&spec.name) {
            Some(existing) if existing.len == spec.len => Ok(()),
            Some(existing) => Err(TgpError::InvalidValue(format!(
                "hyper-parameter `{}` declared with lengths {} and {}",
                spec.name, existing.len, spec.len
            ))),
            None => {
                self.specs.push(spec);
                Ok(())
            }
        }
    }

    /// Declaration of `name`
    pub fn get(&self, name: &str) -> Option<&HyperSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Declarations in declaration order
    pub fn specs(&self) -> &[HyperSpec] {
        &self.specs
    }

    /// Declared names in declaration order
    pub fn names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }

    /// Number of declared hyper-parameters
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether nothing is declared
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Total number of scalar values
    pub fn dim(&self) -> usize {
        self.specs.iter().map(|s| s.len).sum()
    }

    /// Registration defaults
    pub fn defaults(&self) -> Hypers {
        self.specs
            .iter()
            .map(|s| (s.name.clone(), s.default.clone()))
            .collect()
    }

    /// Check that every entry of `hypers` is declared with the right length
    pub fn check_partial(&self, hypers: &Hypers) -> Result<()> {
        for (name, values) in hypers.iter() {
            let spec = self.get(name).ok_or_else(|| {
                TgpError::InvalidValue(format!("unknown hyper-parameter `{name}`"))
            })?;
            if values.len() != spec.len {
                return Err(TgpError::DimensionMismatch(format!(
                    "hyper-parameter `{}` expects {} values, got {}",
                    name,
                    spec.len,
                    values.len()
                )));
            }
        }
        Ok(())
    }

    /// Check that `hypers` holds exactly the declared hyper-parameters
    pub fn check(&self, hypers: &Hypers) -> Result<()> {
        self.check_partial(hypers)?;
        match self.specs.iter().find(|s| hypers.get(&s.name).is_none()) {
            Some(missing) => Err(TgpError::InvalidValue(format!(
                "missing hyper-parameter `{}`",
                missing.name
            ))),
            None => Ok(()),
        }
    }

    /// Flatten `hypers` into the unconstrained space, in declaration order
    pub fn to_unconstrained(&self, hypers: &Hypers) -> Result<Array1<f64>> {
        self.check(hypers)?;
        let mut u = Vec::with_capacity(self.dim());
        for spec in self.specs.iter() {
            let values = &hypers.0[&spec.name];
            u.extend(values.iter().map(|&v| spec.transform.to_unconstrained(v)));
        }
        Ok(Array1::from(u))
    }

    /// Inverse of [`HyperSchema::to_unconstrained`]
    pub fn from_unconstrained(&self, u: &ArrayView1<f64>) -> Hypers {
        let mut offset = 0;
        self.specs
            .iter()
            .map(|spec| {
                let values = u
                    .slice(ndarray::s![offset..offset + spec.len])
                    .mapv(|x| spec.transform.from_unconstrained(x));
                offset += spec.len;
                (spec.name.clone(), values)
            })
            .collect()
    }

    /// Log-jacobian of the map from unconstrained to natural values
    pub fn log_jacobian(&self, u: &ArrayView1<f64>) -> f64 {
        let mut offset = 0;
        self.specs
            .iter()
            .map(|spec| {
                let lj: f64 = u
                    .slice(ndarray::s![offset..offset + spec.len])
                    .iter()
                    .map(|&x| spec.transform.log_jacobian(x))
                    .sum();
                offset += spec.len;
                lj
            })
            .sum()
    }

    /// Log-density of the default priors at `hypers`, centered on the
    /// registration defaults, undeclared names are ignored
    pub fn log_prior(&self, hypers: &Hypers) -> f64 {
        self.specs
            .iter()
            .filter_map(|spec| hypers.get(&spec.name).map(|values| (spec, values)))
            .map(|(spec, values)| {
                values
                    .iter()
                    .zip(spec.default.iter())
                    .map(|(&v, &c)| spec.transform.log_prior(v, c))
                    .sum::<f64>()
            })
            .sum()
    }

    /// Per scalar flag telling whether it belongs to a hyper-parameter of `fixed`
    pub fn fixed_mask(&self, fixed: &Hypers) -> Vec<bool> {
        self.specs
            .iter()
            .flat_map(|spec| std::iter::repeat(fixed.contains(&spec.name)).take(spec.len))
            .collect()
    }
}

/// Hyper-parameter values by name
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Hypers(BTreeMap<String, Array1<f64>>);

impl Hypers {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder adding a scalar hyper-parameter
    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.insert(name, Array1::from_elem(1, value));
        self
    }

    /// Builder adding an array hyper-parameter
    pub fn with_values(mut self, name: &str, values: Array1<f64>) -> Self {
        self.insert(name, values);
        self
    }

    /// Set the values of `name`
    pub fn insert(&mut self, name: &str, values: Array1<f64>) {
        self.0.insert(name.to_string(), values);
    }

    /// Values of `name`
    pub fn get(&self, name: &str) -> Option<&Array1<f64>> {
        self.0.get(name)
    }

    /// First value of `name`
    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(|v| v.first().copied())
    }

    /// Whether `name` has values
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Remove `name`
    pub fn remove(&mut self, name: &str) -> Option<Array1<f64>> {
        self.0.remove(name)
    }

    /// Number of hyper-parameters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names in lexicographic order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    /// `(name, values)` in lexicographic order of names
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array1<f64>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Override entries with the ones of `other`
    pub fn update(&mut self, other: &Hypers) {
        other.iter().for_each(|(k, v)| self.insert(k, v.clone()));
    }

    /// Copy of `self` overridden by `other`
    pub fn merged(&self, other: &Hypers) -> Hypers {
        let mut res = self.clone();
        res.update(other);
        res
    }
}

impl FromIterator<(String, Array1<f64>)> for Hypers {
    fn from_iter<I: IntoIterator<Item = (String, Array1<f64>)>>(iter: I) -> Self {
        Hypers(iter.into_iter().collect())
    }
}

impl HyperSource for Hypers {
    fn hyper_value(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.0.get(name).map(|v| v.view())
    }
}

impl fmt::Display for Hypers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let items: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{{{}}}", items.join(", "))
    }
}

/// Collects hyper-parameter declarations of a process and hands out
/// collision free scopes to the functions composing it
#[derive(Clone, Debug, Default)]
pub struct ModelContext {
    schema: HyperSchema,
    scopes: BTreeSet<String>,
}

impl ModelContext {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a scope `{prefix}{name}`, suffixed by a counter when already taken
    pub fn scope(&mut self, prefix: &str, name: &str) -> String {
        let base = format!("{prefix}{name}");
        let mut candidate = base.clone();
        let mut count = 1;
        while self.scopes.contains(&candidate) {
            count += 1;
            candidate = format!("{base}_{count}");
        }
        self.scopes.insert(candidate.clone());
        candidate
    }

    /// Declare a hyper-parameter and return its symbol
    pub fn declare(&mut self, spec: HyperSpec) -> Result<Expr> {
        let symbol = Expr::hyper(&spec.name);
        self.schema.declare(spec)?;
        Ok(symbol)
    }

    /// Declarations collected so far
    pub fn schema(&self) -> &HyperSchema {
        &self.schema
    }
}

/// Local declaration of a hyper-parameter, see [`HyperSlots::register`]
#[derive(Clone, Debug)]
pub struct HyperDecl {
    /// Name local to the declaring function
    pub local: &'static str,
    /// Number of scalar values
    pub len: usize,
    /// Domain of the values
    pub transform: Transform,
    /// Registration default of each value
    pub default: f64,
}

impl HyperDecl {
    /// Scalar declaration
    pub fn scalar(local: &'static str, transform: Transform, default: f64) -> Self {
        HyperDecl {
            local,
            len: 1,
            transform,
            default,
        }
    }
}

/// Hyper-parameters registered by one function instance
///
/// Registration happens once: later calls are no-ops, which makes
/// `register_hypers` idempotent.
#[derive(Clone, Debug, Default)]
pub struct HyperSlots {
    scope: Option<String>,
    slots: Vec<(&'static str, String, Expr)>,
}

impl HyperSlots {
    /// Declare `decls` under a scope derived from `prefix` and `name`
    pub fn register(
        &mut self,
        ctx: &mut ModelContext,
        prefix: &str,
        name: &str,
        decls: &[HyperDecl],
    ) -> Result<()> {
        if self.scope.is_some() {
            return Ok(());
        }
        let scope = ctx.scope(prefix, name);
        let mut slots = Vec::with_capacity(decls.len());
        for decl in decls {
            let full = format!("{}_{}", scope, decl.local);
            let symbol = ctx.declare(HyperSpec {
                name: full.clone(),
                len: decl.len,
                transform: decl.transform,
                default: Array1::from_elem(decl.len, decl.default),
            })?;
            slots.push((decl.local, full, symbol));
        }
        self.scope = Some(scope);
        self.slots = slots;
        Ok(())
    }

    /// Whether registration happened
    pub fn is_registered(&self) -> bool {
        self.scope.is_some()
    }

    /// Scope of the registered names
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    fn slot(&self, local: &str) -> Result<&(&'static str, String, Expr)> {
        self.slots.iter().find(|s| s.0 == local).ok_or_else(|| {
            TgpError::InvalidState(format!("hyper-parameter `{local}` is not registered"))
        })
    }

    /// Symbol of the local hyper-parameter
    pub fn expr(&self, local: &str) -> Result<&Expr> {
        Ok(&self.slot(local)?.2)
    }

    /// Scoped name of the local hyper-parameter
    pub fn full_name(&self, local: &str) -> Result<&str> {
        Ok(&self.slot(local)?.1)
    }

    /// Build a value set from local names
    pub fn values(&self, locals: &[(&str, Array1<f64>)]) -> Result<Hypers> {
        locals
            .iter()
            .map(|(local, v)| Ok((self.full_name(local)?.to_string(), v.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_scopes_never_collide() {
        let mut ctx = ModelContext::new();
        assert_eq!(ctx.scope("gp_", "se"), "gp_se");
        assert_eq!(ctx.scope("gp_", "se"), "gp_se_2");
        assert_eq!(ctx.scope("gp_", "se"), "gp_se_3");
    }

    #[test]
    fn test_register_idempotent() {
        let mut ctx = ModelContext::new();
        let mut slots = HyperSlots::default();
        let decls = [HyperDecl::scalar("var", Transform::LOG, 1.)];
        slots.register(&mut ctx, "gp_", "se", &decls).unwrap();
        slots.register(&mut ctx, "gp_", "se", &decls).unwrap();
        assert_eq!(ctx.schema().len(), 1);
        assert_eq!(slots.full_name("var").unwrap(), "gp_se_var");
        assert!(slots.expr("ls").is_err());
    }

    #[test]
    fn test_unconstrained_round_trip() {
        let mut schema = HyperSchema::default();
        schema
            .declare(HyperSpec {
                name: "a".to_string(),
                len: 2,
                transform: Transform::LOG,
                default: array![1., 1.],
            })
            .unwrap();
        schema
            .declare(HyperSpec {
                name: "b".to_string(),
                len: 1,
                transform: Transform::Identity,
                default: array![0.],
            })
            .unwrap();
        let h = Hypers::new()
            .with_values("a", array![2., 0.5])
            .with("b", -3.);
        let u = schema.to_unconstrained(&h).unwrap();
        assert_abs_diff_eq!(u, array![2f64.ln(), 0.5f64.ln(), -3.], epsilon = 1e-12);
        let back = schema.from_unconstrained(&u.view());
        assert_abs_diff_eq!(back.get("a").unwrap(), &array![2., 0.5], epsilon = 1e-12);
        assert_abs_diff_eq!(schema.log_jacobian(&u.view()), 1f64.ln(), epsilon = 1e-12);
        assert_eq!(
            schema.fixed_mask(&Hypers::new().with("b", 0.)),
            vec![false, false, true]
        );
    }

    #[test]
    fn test_log_prior() {
        let mut schema = HyperSchema::default();
        schema
            .declare(HyperSpec {
                name: "ls".to_string(),
                len: 1,
                transform: Transform::LOG,
                default: array![1.],
            })
            .unwrap();
        schema
            .declare(HyperSpec {
                name: "shift".to_string(),
                len: 1,
                transform: Transform::Identity,
                default: array![0.],
            })
            .unwrap();
        let at = |ls: f64| schema.log_prior(&Hypers::new().with("ls", ls).with("shift", 5.));
        // log-normal density of median 1
        let norm = (PRIOR_LOG_STD * (2. * std::f64::consts::PI).sqrt()).ln();
        assert_abs_diff_eq!(at(1.), -norm, epsilon = 1e-12);
        assert_abs_diff_eq!(
            at(2.),
            -0.5 * (2f64.ln() / PRIOR_LOG_STD).powi(2) - norm - 2f64.ln(),
            epsilon = 1e-12
        );
        // prior plus jacobian is normal in the log coordinate
        let u = array![1e4f64.ln(), 0.];
        let far = at(1e4) + schema.log_jacobian(&u.view());
        assert_abs_diff_eq!(far, -0.5 * (u[0] / PRIOR_LOG_STD).powi(2) - norm, epsilon = 1e-9);
        assert!(at(1e8) < at(1e4) - 10.);
        assert_eq!(at(0.), f64::NEG_INFINITY);
        assert_eq!(schema.log_prior(&Hypers::new()), 0.);
    }

    #[test]
    fn test_check() {
        let mut schema = HyperSchema::default();
        schema
            .declare(HyperSpec {
                name: "a".to_string(),
                len: 1,
                transform: Transform::LOG,
                default: array![1.],
            })
            .unwrap();
        assert!(schema.check(&Hypers::new()).is_err());
        assert!(schema.check(&Hypers::new().with("a", 1.)).is_ok());
        assert!(matches!(
            schema.check(&Hypers::new().with_values("a", array![1., 2.])),
            Err(TgpError::DimensionMismatch(_))
        ));
        assert!(schema.check_partial(&Hypers::new().with("z", 1.)).is_err());
    }
}

//! A module for covariance functions (kernels) of stochastic processes.
//!
//! Stationary kernels are written `var * r(x, x')` where the correlation
//! `r` depends on inputs scaled by length-scales (one per dimension when
//! `ard` is set). The following correlation models are implemented:
//! * squared exponential,
//! * absolute exponential,
//! * matern 3/2,
//! * matern 5/2,
//! * rational quadratic,
//! * periodic.
//!
//! [`WhiteNoise`] models observation noise, kernels compose with `+` and `*`.

use crate::errors::{Result, TgpError};
use crate::hypers::{HyperDecl, HyperSlots, Hypers, ModelContext, Transform};
use ndarray::{Array1, ArrayView1, ArrayView2};
use ndarray_stats::QuantileExt;
use paste::paste;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::ops::{Add, Mul};
use tgp_symbolic::Expr;

/// A trait for covariance functions
pub trait Kernel: fmt::Display + fmt::Debug + Send + Sync {
    /// Declare the hyper-parameters under `prefix`, calling it twice is a no-op
    fn register_hypers(&mut self, ctx: &mut ModelContext, prefix: &str) -> Result<()>;

    /// Covariance matrix between the rows of `x1` and `x2`
    fn cross(&self, x1: &Expr, x2: &Expr) -> Result<Expr>;

    /// Covariance matrix of the rows of `x`
    fn cov(&self, x: &Expr) -> Result<Expr> {
        self.cross(x, x)
    }

    /// Check the kernel accepts points of the dimension of `sample`
    fn check_dims(&self, sample: &ArrayView2<f64>) -> Result<()>;

    /// Initial guess of the hyper-parameters from observations
    fn default_hypers(&self, x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> Result<Hypers>;

    /// Serializable description
    fn spec(&self) -> KernelSpec;
}

/// Serializable description of a kernel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelSpec {
    /// [`SquaredExponential`]
    SquaredExponential {
        /// input dimension
        dim: usize,
        /// one length-scale per dimension
        #[serde(default)]
        ard: bool,
    },
    /// [`AbsoluteExponential`]
    AbsoluteExponential {
        /// input dimension
        dim: usize,
        /// one length-scale per dimension
        #[serde(default)]
        ard: bool,
    },
    /// [`Matern32`]
    Matern32 {
        /// input dimension
        dim: usize,
        /// one length-scale per dimension
        #[serde(default)]
        ard: bool,
    },
    /// [`Matern52`]
    Matern52 {
        /// input dimension
        dim: usize,
        /// one length-scale per dimension
        #[serde(default)]
        ard: bool,
    },
    /// [`RationalQuadratic`]
    RationalQuadratic {
        /// input dimension
        dim: usize,
        /// one length-scale per dimension
        #[serde(default)]
        ard: bool,
    },
    /// [`Periodic`]
    Periodic {
        /// input dimension
        dim: usize,
    },
    /// [`WhiteNoise`]
    WhiteNoise,
    /// [`KernelSum`]
    Sum(Box<KernelSpec>, Box<KernelSpec>),
    /// [`KernelProd`]
    Prod(Box<KernelSpec>, Box<KernelSpec>),
}

impl KernelSpec {
    /// Build an unregistered kernel
    pub fn build(&self) -> Box<dyn Kernel> {
        match self {
            KernelSpec::SquaredExponential { dim, ard } => {
                Box::new(SquaredExponential::new(*dim).with_ard(*ard))
            }
            KernelSpec::AbsoluteExponential { dim, ard } => {
                Box::new(AbsoluteExponential::new(*dim).with_ard(*ard))
            }
            KernelSpec::Matern32 { dim, ard } => Box::new(Matern32::new(*dim).with_ard(*ard)),
            KernelSpec::Matern52 { dim, ard } => Box::new(Matern52::new(*dim).with_ard(*ard)),
            KernelSpec::RationalQuadratic { dim, ard } => {
                Box::new(RationalQuadratic::new(*dim).with_ard(*ard))
            }
            KernelSpec::Periodic { dim } => Box::new(Periodic::new(*dim)),
            KernelSpec::WhiteNoise => Box::<WhiteNoise>::default(),
            KernelSpec::Sum(left, right) => Box::new(KernelSum::new(left.build(), right.build())),
            KernelSpec::Prod(left, right) => {
                Box::new(KernelProd::new(left.build(), right.build()))
            }
        }
    }
}

/// Output variance, 1 when it cannot be estimated
fn variance_or_one(y: &ArrayView1<f64>) -> f64 {
    if y.len() < 2 {
        return 1.;
    }
    let v = y.var(0.);
    if v.is_finite() && v > 0. {
        v
    } else {
        1.
    }
}

/// Input range per dimension, `None` entries when it cannot be estimated
fn ranges(x: &ArrayView2<f64>) -> Vec<Option<f64>> {
    x.columns()
        .into_iter()
        .map(|col| {
            let (lo, hi) = (*col.min_skipnan(), *col.max_skipnan());
            let r = hi - lo;
            (r.is_finite() && r > 0.).then_some(r)
        })
        .collect()
}

/// Squared euclidean distances between the rows of `x1` and `x2` scaled by `ls`
fn scaled_sq_dist(x1: &Expr, x2: &Expr, ls: &Expr) -> Expr {
    let ls = ls.t();
    (x1 / &ls).sq_dist(&(x2 / &ls))
}

/// A trait for correlation models of stationary kernels
pub trait Correlation:
    Clone + Copy + Default + fmt::Display + fmt::Debug + Send + Sync + 'static
{
    /// Scope name of the hyper-parameters
    const NAME: &'static str;
    /// Whether length-scales may differ per dimension
    const ARD: bool = true;

    /// Additional hyper-parameters
    fn extra_hypers(&self) -> Vec<HyperDecl> {
        vec![]
    }

    /// Initial guess of the additional hyper-parameters
    fn extra_defaults(&self, _x: &ArrayView2<f64>) -> Vec<(&'static str, Array1<f64>)> {
        vec![]
    }

    /// Correlation between the rows of `x1` and `x2` given length-scales `ls`
    fn value(&self, x1: &Expr, x2: &Expr, ls: &Expr, slots: &HyperSlots) -> Result<Expr>;

    /// Serializable description of the kernel built on this correlation
    fn spec(dim: usize, ard: bool) -> KernelSpec;
}

macro_rules! declare_corr {
    ($corr:ident, $doc:literal) => {
        paste! {
            #[doc = $doc]
            #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
            pub struct [<$corr Corr>]();

            impl fmt::Display for [<$corr Corr>] {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{}", stringify!($corr))
                }
            }

            #[doc = $doc]
            pub type $corr = Stationary<[<$corr Corr>]>;
        }
    };
}

declare_corr!(SquaredExponential, "Squared exponential correlation `exp(-d^2 / 2)`");
declare_corr!(AbsoluteExponential, "Absolute exponential correlation `exp(-|d|_1)`");
declare_corr!(Matern32, "Matern 3/2 correlation");
declare_corr!(Matern52, "Matern 5/2 correlation");
declare_corr!(
    RationalQuadratic,
    "Rational quadratic correlation `(1 + d^2 / (2 alpha))^-alpha`"
);
declare_corr!(
    Periodic,
    "Periodic correlation `exp(-2 sin^2(pi |x - x'| / period) / ls^2)`"
);

impl Correlation for SquaredExponentialCorr {
    const NAME: &'static str = "se";

    fn value(&self, x1: &Expr, x2: &Expr, ls: &Expr, _slots: &HyperSlots) -> Result<Expr> {
        Ok((scaled_sq_dist(x1, x2, ls) * -0.5).exp())
    }

    fn spec(dim: usize, ard: bool) -> KernelSpec {
        KernelSpec::SquaredExponential { dim, ard }
    }
}

impl Correlation for AbsoluteExponentialCorr {
    const NAME: &'static str = "abs_exp";

    fn value(&self, x1: &Expr, x2: &Expr, ls: &Expr, _slots: &HyperSlots) -> Result<Expr> {
        let ls = ls.t();
        Ok((x1 / &ls).l1_dist(&(x2 / &ls)).negate().exp())
    }

    fn spec(dim: usize, ard: bool) -> KernelSpec {
        KernelSpec::AbsoluteExponential { dim, ard }
    }
}

impl Correlation for Matern32Corr {
    const NAME: &'static str = "matern32";

    /// r = (1 + sqrt(3) d) exp(-sqrt(3) d)
    fn value(&self, x1: &Expr, x2: &Expr, ls: &Expr, _slots: &HyperSlots) -> Result<Expr> {
        let d = scaled_sq_dist(x1, x2, ls).sqrt() * 3f64.sqrt();
        Ok((&d + 1.) * d.negate().exp())
    }

    fn spec(dim: usize, ard: bool) -> KernelSpec {
        KernelSpec::Matern32 { dim, ard }
    }
}

impl Correlation for Matern52Corr {
    const NAME: &'static str = "matern52";

    /// r = (1 + sqrt(5) d + 5/3 d^2) exp(-sqrt(5) d)
    fn value(&self, x1: &Expr, x2: &Expr, ls: &Expr, _slots: &HyperSlots) -> Result<Expr> {
        let d2 = scaled_sq_dist(x1, x2, ls);
        let d = d2.sqrt() * 5f64.sqrt();
        Ok((&d + 1. + d2 * (5. / 3.)) * d.negate().exp())
    }

    fn spec(dim: usize, ard: bool) -> KernelSpec {
        KernelSpec::Matern52 { dim, ard }
    }
}

impl Correlation for RationalQuadraticCorr {
    const NAME: &'static str = "rq";

    fn extra_hypers(&self) -> Vec<HyperDecl> {
        vec![HyperDecl::scalar("alpha", Transform::LOG, 1.)]
    }

    fn extra_defaults(&self, _x: &ArrayView2<f64>) -> Vec<(&'static str, Array1<f64>)> {
        vec![("alpha", Array1::ones(1))]
    }

    fn value(&self, x1: &Expr, x2: &Expr, ls: &Expr, slots: &HyperSlots) -> Result<Expr> {
        let alpha = slots.expr("alpha")?;
        let base = scaled_sq_dist(x1, x2, ls) / (alpha * 2.) + 1.;
        Ok(base.pow(&alpha.negate()))
    }

    fn spec(dim: usize, ard: bool) -> KernelSpec {
        KernelSpec::RationalQuadratic { dim, ard }
    }
}

impl Correlation for PeriodicCorr {
    const NAME: &'static str = "periodic";
    const ARD: bool = false;

    fn extra_hypers(&self) -> Vec<HyperDecl> {
        vec![HyperDecl::scalar("period", Transform::LOG, 1.)]
    }

    fn extra_defaults(&self, x: &ArrayView2<f64>) -> Vec<(&'static str, Array1<f64>)> {
        let period = ranges(x)
            .into_iter()
            .flatten()
            .fold(f64::NAN, f64::max);
        let period = if period.is_finite() { period } else { 1. };
        vec![("period", Array1::from_elem(1, period))]
    }

    fn value(&self, x1: &Expr, x2: &Expr, ls: &Expr, slots: &HyperSlots) -> Result<Expr> {
        let period = slots.expr("period")?;
        let d = x1.sq_dist(x2).sqrt();
        let s = (d * PI / period).sin();
        Ok((s.square() * -2. / ls.square()).exp())
    }

    fn spec(dim: usize, _ard: bool) -> KernelSpec {
        KernelSpec::Periodic { dim }
    }
}

/// Stationary kernel `var * r(x, x')` with hyper-parameters `var`, `ls`
/// and those of the correlation model
#[derive(Clone, Debug)]
pub struct Stationary<C: Correlation> {
    corr: C,
    dim: usize,
    ard: bool,
    slots: HyperSlots,
}

impl<C: Correlation> Stationary<C> {
    /// Constructor for inputs of dimension `dim` with a shared length-scale
    pub fn new(dim: usize) -> Self {
        Stationary {
            corr: C::default(),
            dim,
            ard: false,
            slots: HyperSlots::default(),
        }
    }

    /// Use one length-scale per dimension, ignored by correlations not supporting it
    pub fn with_ard(mut self, ard: bool) -> Self {
        self.ard = ard && C::ARD;
        self
    }

    /// Input dimension
    pub fn dim(&self) -> usize {
        self.dim
    }

    fn n_length_scales(&self) -> usize {
        if self.ard {
            self.dim
        } else {
            1
        }
    }
}

impl<C: Correlation> fmt::Display for Stationary<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(dim={}", self.corr, self.dim)?;
        if self.ard {
            write!(f, ", ard")?;
        }
        write!(f, ")")
    }
}

impl<C: Correlation> Kernel for Stationary<C> {
    fn register_hypers(&mut self, ctx: &mut ModelContext, prefix: &str) -> Result<()> {
        let mut decls = vec![
            HyperDecl::scalar("var", Transform::LOG, 1.),
            HyperDecl {
                local: "ls",
                len: self.n_length_scales(),
                transform: Transform::LOG,
                default: 1.,
            },
        ];
        decls.extend(self.corr.extra_hypers());
        self.slots.register(ctx, prefix, C::NAME, &decls)
    }

    fn cross(&self, x1: &Expr, x2: &Expr) -> Result<Expr> {
        let var = self.slots.expr("var")?;
        let ls = self.slots.expr("ls")?;
        Ok(self.corr.value(x1, x2, ls, &self.slots)? * var)
    }

    fn check_dims(&self, sample: &ArrayView2<f64>) -> Result<()> {
        if sample.ncols() != self.dim {
            return Err(TgpError::DimensionMismatch(format!(
                "{} expects inputs of dimension {}, got {}",
                self,
                self.dim,
                sample.ncols()
            )));
        }
        Ok(())
    }

    /// var = var(y), ls = half the input range
    fn default_hypers(&self, x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> Result<Hypers> {
        let half: Vec<f64> = if x.ncols() == self.dim {
            ranges(x)
                .into_iter()
                .map(|r| r.map_or(1., |r| r / 2.))
                .collect()
        } else {
            vec![1.; self.dim]
        };
        let ls = if self.ard {
            Array1::from(half)
        } else {
            let shared = half.iter().sum::<f64>() / half.len().max(1) as f64;
            Array1::from_elem(1, if shared > 0. { shared } else { 1. })
        };
        let mut locals = vec![
            ("var", Array1::from_elem(1, variance_or_one(y))),
            ("ls", ls),
        ];
        locals.extend(self.corr.extra_defaults(x));
        self.slots.values(&locals)
    }

    fn spec(&self) -> KernelSpec {
        C::spec(self.dim, self.ard)
    }
}

/// Observation noise `var * I` with zero cross-covariance, hyper-parameter `var`
#[derive(Clone, Debug, Default)]
pub struct WhiteNoise {
    slots: HyperSlots,
}

impl fmt::Display for WhiteNoise {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "WhiteNoise")
    }
}

impl Kernel for WhiteNoise {
    fn register_hypers(&mut self, ctx: &mut ModelContext, prefix: &str) -> Result<()> {
        self.slots.register(
            ctx,
            prefix,
            "noise",
            &[HyperDecl::scalar("var", Transform::LOG, 1e-2)],
        )
    }

    fn cross(&self, x1: &Expr, x2: &Expr) -> Result<Expr> {
        Ok(x1.zeros_like(x2))
    }

    fn cov(&self, x: &Expr) -> Result<Expr> {
        Ok(x.eye_like() * self.slots.expr("var")?)
    }

    fn check_dims(&self, _sample: &ArrayView2<f64>) -> Result<()> {
        Ok(())
    }

    /// var = var(y) / 10
    fn default_hypers(&self, _x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> Result<Hypers> {
        let var = if y.len() < 2 {
            1e-2
        } else {
            variance_or_one(y) / 10.
        };
        Ok(Hypers::new().with(self.slots.full_name("var")?, var))
    }

    fn spec(&self) -> KernelSpec {
        KernelSpec::WhiteNoise
    }
}

macro_rules! declare_composite {
    ($name:ident, $op:tt, $spec:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug)]
        pub struct $name {
            left: Box<dyn Kernel>,
            right: Box<dyn Kernel>,
        }

        impl $name {
            /// Constructor
            pub fn new(left: Box<dyn Kernel>, right: Box<dyn Kernel>) -> Self {
                $name { left, right }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "({} {} {})", self.left, stringify!($op), self.right)
            }
        }

        impl Kernel for $name {
            fn register_hypers(&mut self, ctx: &mut ModelContext, prefix: &str) -> Result<()> {
                self.left.register_hypers(ctx, prefix)?;
                self.right.register_hypers(ctx, prefix)
            }

            fn cross(&self, x1: &Expr, x2: &Expr) -> Result<Expr> {
                Ok(self.left.cross(x1, x2)? $op self.right.cross(x1, x2)?)
            }

            fn cov(&self, x: &Expr) -> Result<Expr> {
                Ok(self.left.cov(x)? $op self.right.cov(x)?)
            }

            fn check_dims(&self, sample: &ArrayView2<f64>) -> Result<()> {
                self.left.check_dims(sample)?;
                self.right.check_dims(sample)
            }

            fn default_hypers(&self, x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> Result<Hypers> {
                Ok(self
                    .left
                    .default_hypers(x, y)?
                    .merged(&self.right.default_hypers(x, y)?))
            }

            fn spec(&self) -> KernelSpec {
                KernelSpec::$spec(Box::new(self.left.spec()), Box::new(self.right.spec()))
            }
        }
    };
}

declare_composite!(KernelSum, +, Sum, "Sum of two kernels");
declare_composite!(KernelProd, *, Prod, "Elementwise product of two kernels");

macro_rules! impl_kernel_ops {
    ([$($gen:tt)*] $ty:ty) => {
        impl<$($gen)* K: Kernel + 'static> Add<K> for $ty {
            type Output = KernelSum;
            fn add(self, rhs: K) -> KernelSum {
                KernelSum::new(Box::new(self), Box::new(rhs))
            }
        }

        impl<$($gen)* K: Kernel + 'static> Mul<K> for $ty {
            type Output = KernelProd;
            fn mul(self, rhs: K) -> KernelProd {
                KernelProd::new(Box::new(self), Box::new(rhs))
            }
        }
    };
}

impl_kernel_ops!([C: Correlation,] Stationary<C>);
impl_kernel_ops!([] WhiteNoise);
impl_kernel_ops!([] KernelSum);
impl_kernel_ops!([] KernelProd);

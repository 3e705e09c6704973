//! A module for mean functions of stochastic processes.
//!
//! The following models are implemented:
//! * zero,
//! * constant,
//! * linear

use crate::errors::{Result, TgpError};
use crate::hypers::{HyperDecl, HyperSlots, Hypers, ModelContext, Transform};
use ndarray::{Array1, ArrayView1, ArrayView2};
use paste::paste;
use serde::{Deserialize, Serialize};
use std::fmt;
use tgp_symbolic::Expr;

/// A trait for mean functions
pub trait Mean: fmt::Display + fmt::Debug + Send + Sync {
    /// Declare the hyper-parameters under `prefix`, calling it twice is a no-op
    fn register_hypers(&mut self, ctx: &mut ModelContext, prefix: &str) -> Result<()>;

    /// Mean at the `(n, d)` points `x` as a `(n, 1)` column
    fn evaluate(&self, x: &Expr) -> Result<Expr>;

    /// Check the mean accepts points of the dimension of `sample`
    fn check_dims(&self, sample: &ArrayView2<f64>) -> Result<()>;

    /// Initial guess of the hyper-parameters from observations
    fn default_hypers(&self, x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> Result<Hypers>;

    /// Serializable description
    fn spec(&self) -> MeanSpec;
}

/// Serializable description of a mean function
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeanSpec {
    /// [`ZeroMean`]
    Zero,
    /// [`ConstantMean`]
    Constant,
    /// [`LinearMean`]
    Linear {
        /// input dimension
        dim: usize,
    },
}

impl MeanSpec {
    /// Build an unregistered mean function
    pub fn build(&self) -> Box<dyn Mean> {
        match self {
            MeanSpec::Zero => Box::<ZeroMean>::default(),
            MeanSpec::Constant => Box::<ConstantMean>::default(),
            MeanSpec::Linear { dim } => Box::new(LinearMean::new(*dim)),
        }
    }
}

fn mean_or_zero(y: &ArrayView1<f64>) -> f64 {
    y.mean().filter(|m| m.is_finite()).unwrap_or(0.)
}

/// A null function as mean of the process
#[derive(Clone, Debug, Default)]
pub struct ZeroMean {}

impl Mean for ZeroMean {
    fn register_hypers(&mut self, _ctx: &mut ModelContext, _prefix: &str) -> Result<()> {
        Ok(())
    }

    fn evaluate(&self, x: &Expr) -> Result<Expr> {
        Ok(x.ones_like() * 0.)
    }

    fn check_dims(&self, _sample: &ArrayView2<f64>) -> Result<()> {
        Ok(())
    }

    fn default_hypers(&self, _x: &ArrayView2<f64>, _y: &ArrayView1<f64>) -> Result<Hypers> {
        Ok(Hypers::new())
    }

    fn spec(&self) -> MeanSpec {
        MeanSpec::Zero
    }
}

/// A constant function as mean of the process, hyper-parameter `constant`
#[derive(Clone, Debug, Default)]
pub struct ConstantMean {
    slots: HyperSlots,
}

impl Mean for ConstantMean {
    fn register_hypers(&mut self, ctx: &mut ModelContext, prefix: &str) -> Result<()> {
        self.slots.register(
            ctx,
            prefix,
            "mean",
            &[HyperDecl::scalar("constant", Transform::Identity, 0.)],
        )
    }

    /// m(x) = c [1, ..., 1].T
    fn evaluate(&self, x: &Expr) -> Result<Expr> {
        Ok(x.ones_like() * self.slots.expr("constant")?)
    }

    fn check_dims(&self, _sample: &ArrayView2<f64>) -> Result<()> {
        Ok(())
    }

    fn default_hypers(&self, _x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> Result<Hypers> {
        let c = mean_or_zero(y);
        Ok(Hypers::new().with(self.slots.full_name("constant")?, c))
    }

    fn spec(&self) -> MeanSpec {
        MeanSpec::Constant
    }
}

/// An affine function as mean of the process, hyper-parameters `bias` and `weights`
#[derive(Clone, Debug)]
pub struct LinearMean {
    dim: usize,
    slots: HyperSlots,
}

impl LinearMean {
    /// Constructor for inputs of dimension `dim`
    pub fn new(dim: usize) -> Self {
        LinearMean {
            dim,
            slots: HyperSlots::default(),
        }
    }
}

impl Default for LinearMean {
    fn default() -> Self {
        LinearMean::new(1)
    }
}

impl Mean for LinearMean {
    fn register_hypers(&mut self, ctx: &mut ModelContext, prefix: &str) -> Result<()> {
        self.slots.register(
            ctx,
            prefix,
            "mean",
            &[
                HyperDecl::scalar("bias", Transform::Identity, 0.),
                HyperDecl {
                    local: "weights",
                    len: self.dim,
                    transform: Transform::Identity,
                    default: 0.,
                },
            ],
        )
    }

    /// m(x) = b + x w
    fn evaluate(&self, x: &Expr) -> Result<Expr> {
        Ok(x.dot(self.slots.expr("weights")?) + self.slots.expr("bias")?)
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

    fn default_hypers(&self, _x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> Result<Hypers> {
        Ok(Hypers::new()
            .with(self.slots.full_name("bias")?, mean_or_zero(y))
            .with_values(self.slots.full_name("weights")?, Array1::zeros(self.dim)))
    }

    fn spec(&self) -> MeanSpec {
        MeanSpec::Linear { dim: self.dim }
    }
}

macro_rules! declare_mean_util_impls {
    ($mean:ident) => {
        paste! {
            impl fmt::Display for [<$mean Mean>] {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    write!(f, "{}Mean", stringify!($mean))
                }
            }
        }
    };
}

declare_mean_util_impls!(Zero);
declare_mean_util_impls!(Constant);
declare_mean_util_impls!(Linear);

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use tgp_symbolic::{Backend, Signature, TapeBackend};

    fn eval(mean: &dyn Mean, ctx: &ModelContext, x: &Array2<f64>, h: &Hypers) -> Array2<f64> {
        let xs = Expr::input("x");
        let f = TapeBackend::new()
            .compile(
                &Signature::new(["x"], ctx.schema().names()),
                &mean.evaluate(&xs).unwrap(),
            )
            .unwrap();
        f.call(&[x.view()], h).unwrap()
    }

    #[test]
    fn test_constant() {
        let mut ctx = ModelContext::new();
        let mut mean = ConstantMean::default();
        mean.register_hypers(&mut ctx, "gp_").unwrap();
        let x = array![[1.], [2.], [3.]];
        let y = array![1., 2., 6.];
        let h = mean.default_hypers(&x.view(), &y.view()).unwrap();
        assert_eq!(h.scalar("gp_mean_constant"), Some(3.));
        assert_abs_diff_eq!(eval(&mean, &ctx, &x, &h), array![[3.], [3.], [3.]]);
    }

    #[test]
    fn test_linear() {
        let mut ctx = ModelContext::new();
        let mut mean = LinearMean::new(2);
        mean.register_hypers(&mut ctx, "gp_").unwrap();
        let x = array![[1., 2.], [3., 4.]];
        let h = Hypers::new()
            .with("gp_mean_bias", 1.)
            .with_values("gp_mean_weights", array![0.5, -1.]);
        assert_abs_diff_eq!(eval(&mean, &ctx, &x, &h), array![[-0.5], [-1.5]]);
        assert!(matches!(
            mean.check_dims(&array![[1.]].view()),
            Err(TgpError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_zero_and_empty_defaults() {
        let mut ctx = ModelContext::new();
        let mut mean = ConstantMean::default();
        mean.register_hypers(&mut ctx, "gp_").unwrap();
        let x = Array2::<f64>::zeros((0, 1));
        let y = Array1::<f64>::zeros(0);
        let h = mean.default_hypers(&x.view(), &y.view()).unwrap();
        assert_eq!(h.scalar("gp_mean_constant"), Some(0.));

        let zero = ZeroMean::default();
        let x = array![[1.], [2.]];
        assert_abs_diff_eq!(eval(&zero, &ctx, &x, &h), array![[0.], [0.]]);
        assert_eq!(zero.to_string(), "ZeroMean");
    }
}

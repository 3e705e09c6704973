//! A module for output mappings of transformed processes.
//!
//! A mapping `f` sends the latent gaussian value `z` to the observed value
//! `y = f(z)`. Processes condition on `f^-1(y)` and account for the change
//! of variables through `log |d f^-1 / dy|`.
//!
//! The following mappings are implemented:
//! * identity,
//! * affine,
//! * Box-Cox,
//! * sinh-arcsinh.

use crate::errors::Result;
use crate::hypers::{HyperDecl, HyperSlots, Hypers, ModelContext, Transform};
use ndarray::{Array1, ArrayView1};
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use tgp_symbolic::Expr;

/// A trait for invertible output mappings
pub trait Mapping: fmt::Display + fmt::Debug + Send + Sync {
    /// Declare the hyper-parameters under `prefix`, calling it twice is a no-op
    fn register_hypers(&mut self, ctx: &mut ModelContext, prefix: &str) -> Result<()>;

    /// Observed value of the latent value `z`, elementwise
    fn forward(&self, z: &Expr) -> Result<Expr>;

    /// Latent value of the observed value `y`, elementwise
    fn inverse(&self, y: &Expr) -> Result<Expr>;

    /// `sum log |d inverse / dy|` over the entries of `y`, as a scalar
    fn log_det_jac_inverse(&self, y: &Expr) -> Result<Expr>;

    /// `d forward / dz`, elementwise
    fn derivative(&self, z: &Expr) -> Result<Expr>;

    /// Initial guess of the hyper-parameters from observed outputs
    fn default_hypers(&self, y: &ArrayView1<f64>) -> Result<Hypers>;

    /// Whether the mapping leaves values unchanged
    fn is_identity(&self) -> bool {
        false
    }

    /// Serializable description
    fn spec(&self) -> MappingSpec;
}

/// Serializable description of a mapping
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingSpec {
    /// [`Identity`]
    #[default]
    Identity,
    /// [`Affine`]
    Affine,
    /// [`BoxCox`]
    BoxCox,
    /// [`SinhArcsinh`]
    SinhArcsinh,
}

impl MappingSpec {
    /// Build an unregistered mapping
    pub fn build(&self) -> Box<dyn Mapping> {
        match self {
            MappingSpec::Identity => Box::new(Identity),
            MappingSpec::Affine => Box::<Affine>::default(),
            MappingSpec::BoxCox => Box::<BoxCox>::default(),
            MappingSpec::SinhArcsinh => Box::<SinhArcsinh>::default(),
        }
    }
}

fn mean_and_std(y: &ArrayView1<f64>) -> (f64, f64) {
    let mean = y.mean().filter(|m| m.is_finite()).unwrap_or(0.);
    let std = if y.len() > 1 { y.std(0.) } else { 1. };
    (mean, if std.is_finite() && std > 0. { std } else { 1. })
}

/// Identity mapping
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Mapping for Identity {
    fn register_hypers(&mut self, _ctx: &mut ModelContext, _prefix: &str) -> Result<()> {
        Ok(())
    }

    fn forward(&self, z: &Expr) -> Result<Expr> {
        Ok(z.clone())
    }

    fn inverse(&self, y: &Expr) -> Result<Expr> {
        Ok(y.clone())
    }

    fn log_det_jac_inverse(&self, _y: &Expr) -> Result<Expr> {
        Ok(Expr::scalar(0.))
    }

    fn derivative(&self, z: &Expr) -> Result<Expr> {
        Ok(z.ones_like())
    }

    fn default_hypers(&self, _y: &ArrayView1<f64>) -> Result<Hypers> {
        Ok(Hypers::new())
    }

    fn is_identity(&self) -> bool {
        true
    }

    fn spec(&self) -> MappingSpec {
        MappingSpec::Identity
    }
}

/// Affine mapping `y = shift + scale z`
#[derive(Clone, Debug, Default)]
pub struct Affine {
    slots: HyperSlots,
}

impl Mapping for Affine {
    fn register_hypers(&mut self, ctx: &mut ModelContext, prefix: &str) -> Result<()> {
        self.slots.register(
            ctx,
            prefix,
            "affine",
            &[
                HyperDecl::scalar("shift", Transform::Identity, 0.),
                HyperDecl::scalar("scale", Transform::LOG, 1.),
            ],
        )
    }

    fn forward(&self, z: &Expr) -> Result<Expr> {
        Ok(z * self.slots.expr("scale")? + self.slots.expr("shift")?)
    }

    fn inverse(&self, y: &Expr) -> Result<Expr> {
        Ok((y - self.slots.expr("shift")?) / self.slots.expr("scale")?)
    }

    fn log_det_jac_inverse(&self, y: &Expr) -> Result<Expr> {
        Ok(-(y.rows() * self.slots.expr("scale")?.ln()))
    }

    fn derivative(&self, z: &Expr) -> Result<Expr> {
        Ok(z.ones_like() * self.slots.expr("scale")?)
    }

    /// shift = mean(y), scale = std(y)
    fn default_hypers(&self, y: &ArrayView1<f64>) -> Result<Hypers> {
        let (mean, std) = mean_and_std(y);
        self.slots.values(&[
            ("shift", Array1::from_elem(1, mean)),
            ("scale", Array1::from_elem(1, std)),
        ])
    }

    fn spec(&self) -> MappingSpec {
        MappingSpec::Affine
    }
}

/// Box-Cox mapping, inverse `z = ((y + shift)^power - 1) / power`
#[derive(Clone, Debug, Default)]
pub struct BoxCox {
    slots: HyperSlots,
}

impl Mapping for BoxCox {
    fn register_hypers(&mut self, ctx: &mut ModelContext, prefix: &str) -> Result<()> {
        self.slots.register(
            ctx,
            prefix,
            "boxcox",
            &[
                HyperDecl::scalar("shift", Transform::Identity, 0.),
                HyperDecl::scalar("power", Transform::LOG, 1.),
            ],
        )
    }

    /// y = (power z + 1)^(1 / power) - shift, the base clipped at zero
    fn forward(&self, z: &Expr) -> Result<Expr> {
        let power = self.slots.expr("power")?;
        let base = (z * power + 1.).maximum(&Expr::scalar(0.));
        Ok(base.pow(&power.recip()) - self.slots.expr("shift")?)
    }

    fn inverse(&self, y: &Expr) -> Result<Expr> {
        let power = self.slots.expr("power")?;
        Ok(((y + self.slots.expr("shift")?).pow(power) - 1.) / power)
    }

    /// sum (power - 1) ln(y + shift)
    fn log_det_jac_inverse(&self, y: &Expr) -> Result<Expr> {
        let power = self.slots.expr("power")?;
        Ok(((y + self.slots.expr("shift")?).ln() * (power - 1.)).sum())
    }

    fn derivative(&self, z: &Expr) -> Result<Expr> {
        let power = self.slots.expr("power")?;
        let base = (z * power + 1.).maximum(&Expr::scalar(0.));
        Ok(base.pow(&(power.recip() - 1.)))
    }

    /// shift moves the outputs above zero, power = 1
    fn default_hypers(&self, y: &ArrayView1<f64>) -> Result<Hypers> {
        let (_, std) = mean_and_std(y);
        let lowest = *y.min_skipnan();
        let shift = if lowest.is_finite() && lowest <= 0. {
            std - lowest
        } else {
            0.
        };
        self.slots.values(&[
            ("shift", Array1::from_elem(1, shift)),
            ("power", Array1::ones(1)),
        ])
    }

    fn spec(&self) -> MappingSpec {
        MappingSpec::BoxCox
    }
}

/// Sinh-arcsinh mapping, inverse `z = sinh(tail asinh(y) - skew)`
#[derive(Clone, Debug, Default)]
pub struct SinhArcsinh {
    slots: HyperSlots,
}

impl Mapping for SinhArcsinh {
    fn register_hypers(&mut self, ctx: &mut ModelContext, prefix: &str) -> Result<()> {
        self.slots.register(
            ctx,
            prefix,
            "sinharcsinh",
            &[
                HyperDecl::scalar("skew", Transform::Identity, 0.),
                HyperDecl::scalar("tail", Transform::LOG, 1.),
            ],
        )
    }

    /// y = sinh((asinh(z) + skew) / tail)
    fn forward(&self, z: &Expr) -> Result<Expr> {
        let skew = self.slots.expr("skew")?;
        let tail = self.slots.expr("tail")?;
        Ok(((z.asinh() + skew) / tail).sinh())
    }

    fn inverse(&self, y: &Expr) -> Result<Expr> {
        let skew = self.slots.expr("skew")?;
        let tail = self.slots.expr("tail")?;
        Ok((y.asinh() * tail - skew).sinh())
    }

    /// sum ln(tail cosh(tail asinh(y) - skew) / sqrt(1 + y^2))
    fn log_det_jac_inverse(&self, y: &Expr) -> Result<Expr> {
        let skew = self.slots.expr("skew")?;
        let tail = self.slots.expr("tail")?;
        let d = (y.asinh() * tail - skew).cosh() * tail / (y.square() + 1.).sqrt();
        Ok(d.ln().sum())
    }

    fn derivative(&self, z: &Expr) -> Result<Expr> {
        let skew = self.slots.expr("skew")?;
        let tail = self.slots.expr("tail")?;
        let inner = (z.asinh() + skew) / tail;
        Ok(inner.cosh() / ((z.square() + 1.).sqrt() * tail))
    }

    fn default_hypers(&self, _y: &ArrayView1<f64>) -> Result<Hypers> {
        self.slots
            .values(&[("skew", Array1::zeros(1)), ("tail", Array1::ones(1))])
    }

    fn spec(&self) -> MappingSpec {
        MappingSpec::SinhArcsinh
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Identity")
    }
}

impl fmt::Display for Affine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Affine")
    }
}

impl fmt::Display for BoxCox {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BoxCox")
    }
}

impl fmt::Display for SinhArcsinh {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SinhArcsinh")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use paste::paste;
    use tgp_symbolic::{Backend, Signature, TapeBackend};

    fn eval(ctx: &ModelContext, expr: &Expr, v: &Array2<f64>, h: &Hypers) -> Array2<f64> {
        TapeBackend::new()
            .compile(&Signature::new(["v"], ctx.schema().names()), expr)
            .unwrap()
            .call(&[v.view()], h)
            .unwrap()
    }

    macro_rules! test_mapping {
        ($mapping:ident, $hypers:expr) => {
            paste! {
                #[test]
                fn [<test_ $mapping:lower _inverse_and_jacobian>]() {
                    let mut ctx = ModelContext::new();
                    let mut m = $mapping::default();
                    m.register_hypers(&mut ctx, "gp_").unwrap();
                    let h: Hypers = $hypers;
                    let v = Expr::input("v");
                    let y = array![[0.5], [1.2], [3.0]];

                    // forward(inverse(y)) == y
                    let back = m.forward(&m.inverse(&v).unwrap()).unwrap();
                    assert_abs_diff_eq!(eval(&ctx, &back, &y, &h), y, epsilon = 1e-10);

                    // derivative of forward against central differences
                    let z = array![[-0.3], [0.2], [0.9]];
                    let e = 1e-6;
                    let f = m.forward(&v).unwrap();
                    let fd = (eval(&ctx, &f, &(&z + e), &h) - eval(&ctx, &f, &(&z - e), &h)) / (2. * e);
                    let d = eval(&ctx, &m.derivative(&v).unwrap(), &z, &h);
                    assert_abs_diff_eq!(d, fd, epsilon = 1e-5);

                    // log |d inverse / dy| against central differences
                    let inv = m.inverse(&v).unwrap();
                    let dinv = (eval(&ctx, &inv, &(&y + e), &h) - eval(&ctx, &inv, &(&y - e), &h)) / (2. * e);
                    let expected = dinv.mapv(|v| v.abs().ln()).sum();
                    let ldj = eval(&ctx, &m.log_det_jac_inverse(&v).unwrap(), &y, &h);
                    assert_abs_diff_eq!(ldj[[0, 0]], expected, epsilon = 1e-5);
                }
            }
        };
    }

    test_mapping!(Identity, Hypers::new());
    test_mapping!(
        Affine,
        Hypers::new()
            .with("gp_affine_shift", 1.5)
            .with("gp_affine_scale", 2.)
    );
    test_mapping!(
        BoxCox,
        Hypers::new()
            .with("gp_boxcox_shift", 0.5)
            .with("gp_boxcox_power", 0.5)
    );
    test_mapping!(
        SinhArcsinh,
        Hypers::new()
            .with("gp_sinharcsinh_skew", 0.3)
            .with("gp_sinharcsinh_tail", 1.4)
    );

    #[test]
    fn test_defaults() {
        let mut ctx = ModelContext::new();
        let mut m = BoxCox::default();
        m.register_hypers(&mut ctx, "gp_").unwrap();
        let h = m.default_hypers(&array![-1., 1.].view()).unwrap();
        assert_abs_diff_eq!(h.scalar("gp_boxcox_shift").unwrap(), 2.);
        assert!(Identity.is_identity());
        assert!(!m.is_identity());
        assert_eq!(MappingSpec::BoxCox.build().to_string(), "BoxCox");
    }
}

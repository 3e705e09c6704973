//! A minimal numeric backend for hyper-parameterized models.
//!
//! Models are written once as an [`Expr`] graph over named positional inputs
//! (sample points, observations, random draws) and named hyper-parameters,
//! then compiled by a [`Backend`] into a [`Function`] which is evaluated many
//! times with new hyper-parameter values without recompilation.
//!
//! ```
//! use tgp_symbolic::{Backend, Expr, Signature, TapeBackend};
//! use ndarray::{array, Array1};
//! use std::collections::BTreeMap;
//!
//! let x = Expr::input("x");
//! let var = Expr::hyper("var");
//! let k = &var * (x.sq_dist(&x) * -0.5).exp();
//!
//! let backend = TapeBackend::new();
//! let f = backend.compile(&Signature::new(["x"], ["var"]), &k).unwrap();
//! let mut hypers: BTreeMap<String, Array1<f64>> = BTreeMap::new();
//! hypers.insert("var".to_string(), array![2.]);
//! let cov = f.call(&[array![[0.], [1.]].view()], &hypers).unwrap();
//! assert_eq!(cov.dim(), (2, 2));
//! ```
#![warn(missing_docs)]
mod compile;
mod errors;
mod expr;
mod ops;

pub use compile::*;
pub use errors::*;
pub use expr::*;
pub use ops::{cholesky_solve, diagonal_floor};

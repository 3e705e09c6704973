//! This library implements stochastic process regression with
//! [Gaussian Processes](https://en.wikipedia.org/wiki/Gaussian_process),
//! transformed (warped) Gaussian processes and
//! [Student-t processes](https://proceedings.mlr.press/v33/shah14.html).
//!
//! A process is declared from a mean function ([`mean_models`]), a kernel
//! ([`kernels`]), an optional white noise kernel and an output mapping
//! ([`mappings`]). Every prior and posterior quantity (mean, variance,
//! covariance, median, quantiles, noise bands, samples) is assembled once as
//! a symbolic expression over the query points, the observations and the
//! hyper-parameters, then compiled into a numeric function which is evaluated
//! with new observations or hyper-parameter values without recompilation.
//!
//! Processes are parameterized by [ProcessParams] and built as a
//! [StochasticProcess], whose hyper-parameters are estimated by
//! [StochasticProcess::find_point_estimate] or sampled by
//! [StochasticProcess::sample_hyperparameters].
//!
//! ```
//! use tgp::{ProcessParams, Request};
//! use tgp::kernels::KernelSpec;
//! use tgp::mean_models::MeanSpec;
//! use ndarray::{array, Array1};
//!
//! # fn main() -> tgp::Result<()> {
//! let mut gp = ProcessParams::new(
//!     MeanSpec::Constant,
//!     KernelSpec::SquaredExponential { dim: 1, ard: false },
//! )
//! .space(Array1::range(0., 6., 1.))
//! .build()?;
//! gp.observed(array![1., 3.], array![2., -1.])?;
//! let res = gp.predict(None, None, &Request::new().quantiles(true))?;
//! assert_eq!(res.mean.map(|m| m.len()), Some(6));
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
pub mod definitions;
mod errors;
pub mod hypers;
pub mod kernels;
pub mod mappings;
pub mod mean_models;
pub mod registry;
pub mod regularizer;
pub mod space;

mod config;
mod inference;
mod parameters;
#[cfg(feature = "persistent")]
mod persistence;
mod plot;
mod predict;
mod process;

pub use config::*;
pub use errors::*;
pub use hypers::Hypers;
pub use inference::*;
pub use parameters::*;
#[cfg(feature = "persistent")]
pub use persistence::*;
pub use plot::*;
pub use predict::*;
pub use process::*;
pub use space::SpaceInput;

pub use tgp_engine;
pub use tgp_engine::MaxTime;
pub use tgp_symbolic;

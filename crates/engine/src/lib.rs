//! Optimizers and samplers over unnormalized log-densities of model
//! hyper-parameters.
//!
//! * [`Optimizer`]: facade over bound constrained local optimizers
//!   ([COBYLA](https://crates.io/crates/cobyla) and
//!   [SLSQP](https://crates.io/crates/slsqp), the latter with gradients by
//!   central finite differences),
//! * [`SliceSampler`]: robust coordinate-wise slice sampling,
//! * [`Advi`]: mean-field variational approximation used to warm up samplers,
//! * [`MaxTime`]: wall-clock budget checked by the loops above.
//!
//! Every algorithm works on an unconstrained real vector and honours a
//! fixed/free partition of its coordinates ([`Mask`] or a `fixed` flag slice).
#![warn(missing_docs)]
mod advi;
mod deadline;
mod density;
mod errors;
mod optimizer;
mod slice;

pub use advi::*;
pub use deadline::MaxTime;
pub use density::{FnDensity, LogDensity, Mask};
pub use errors::*;
pub use optimizer::*;
pub use slice::*;

//! Covariance regularization.
//!
//! Every covariance expression goes through [`regularize`] before being
//! cached so that downstream Cholesky factorizations always succeed: the
//! result is symmetric, finite and its eigenvalues are bounded below by
//! the jitter.
use serde::{Deserialize, Serialize};
use tgp_symbolic::Expr;

/// Regularization settings
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegularizerParams {
    /// Lower bound of the eigenvalues
    pub jitter: f64,
    /// Replacement of non finite diagonal entries
    pub sentinel: f64,
}

impl Default for RegularizerParams {
    fn default() -> Self {
        RegularizerParams {
            jitter: 1e-6,
            sentinel: 1e10,
        }
    }
}

/// Symmetric positive definite version of the covariance `cov`
///
/// Non finite entries are replaced (the sentinel on the diagonal, zero
/// elsewhere), the matrix is symmetrized, then the diagonal is shifted by
/// `jitter` when the matrix is positive definite, by `jitter - min eigenvalue`
/// otherwise.
pub fn regularize(cov: &Expr, params: &RegularizerParams) -> Expr {
    cov.replace_non_finite(params.sentinel, 0.)
        .symmetrize()
        .diagonal_floor(params.jitter)
}

/// Finite version of the cross-covariance `cross`, non finite entries set to zero
pub fn to_finite(cross: &Expr) -> Expr {
    cross.replace_non_finite(0., 0.)
}

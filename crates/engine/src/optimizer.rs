use crate::deadline::MaxTime;
use crate::errors::{EngineError, Result};
use cobyla::RhoBeg;
use finitediff::FiniteDiff;
use log::debug;
use ndarray::{arr1, Array1, Array2, ArrayView1};
use std::cell::Cell;

/// Objective function to minimize
pub type ObjFn<'a> = dyn Fn(&[f64]) -> f64 + 'a;

/// Local optimization algorithms
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Algorithm {
    /// Derivative free constrained optimization by linear approximations
    Cobyla,
    /// Sequential least squares programming, gradient by central finite differences
    Slsqp,
}

/// Default maximum number of objective evaluations
pub const OPTIM_MAX_EVAL_DEFAULT: usize = 200;

/// Facade for bound constrained local optimization algorithms
pub struct Optimizer<'a> {
    algo: Algorithm,
    fun: &'a ObjFn<'a>,
    bounds: Array2<f64>,
    max_eval: usize,
    xinit: Option<Array1<f64>>,
    ftol_abs: Option<f64>,
    ftol_rel: Option<f64>,
    deadline: Option<MaxTime>,
}

impl<'a> Optimizer<'a> {
    /// Constructor given the objective and `(dim, 2)` bounds, lower bounds in the first column
    pub fn new(algo: Algorithm, fun: &'a ObjFn<'a>, bounds: &Array2<f64>) -> Self {
        Optimizer {
            algo,
            fun,
            bounds: bounds.clone(),
            max_eval: OPTIM_MAX_EVAL_DEFAULT,
            xinit: None,
            ftol_abs: None,
            ftol_rel: None,
            deadline: None,
        }
    }

    /// Absolute tolerance on the objective
    pub fn ftol_abs(&mut self, ftol_abs: f64) -> &mut Self {
        self.ftol_abs = Some(ftol_abs);
        self
    }

    /// Relative tolerance on the objective
    pub fn ftol_rel(&mut self, ftol_rel: f64) -> &mut Self {
        self.ftol_rel = Some(ftol_rel);
        self
    }

    /// Maximum number of objective evaluations
    pub fn max_eval(&mut self, max_eval: usize) -> &mut Self {
        self.max_eval = max_eval;
        self
    }

    /// Starting point, defaults to the middle of the bounds
    pub fn xinit(&mut self, xinit: &ArrayView1<f64>) -> &mut Self {
        self.xinit = Some(xinit.to_owned());
        self
    }

    /// Time budget, the search stops with [`EngineError::Deadline`] once exhausted
    pub fn deadline(&mut self, deadline: MaxTime) -> &mut Self {
        self.deadline = Some(deadline);
        self
    }

    fn xinit_or_center(&self) -> Vec<f64> {
        match &self.xinit {
            Some(x) => x.to_vec(),
            None => self
                .bounds
                .outer_iter()
                .map(|row| 0.5 * (row[0] + row[1]))
                .collect(),
        }
    }

    /// Minimize the objective, returns the optimum value and location
    pub fn minimize(&self) -> Result<(f64, Array1<f64>)> {
        crate::deadline::check(self.deadline.as_ref())?;
        let xinit = self.xinit_or_center();
        let bounds: Vec<_> = self
            .bounds
            .outer_iter()
            .map(|row| (row[0], row[1]))
            .collect();

        // Once the budget is exhausted the objective is frozen to its last value
        // so that the algorithm terminates on its tolerance criterion.
        let expired = Cell::new(false);
        let last = Cell::new(f64::INFINITY);
        let obj = |x: &[f64]| -> f64 {
            if expired.get() {
                return last.get();
            }
            if self.deadline.as_ref().map_or(false, MaxTime::expired) {
                expired.set(true);
                return last.get();
            }
            let y = (self.fun)(x);
            last.set(y);
            y
        };

        let res = match self.algo {
            Algorithm::Cobyla => {
                let cons: Vec<&dyn cobyla::Func<()>> = vec![];
                cobyla::minimize(
                    |x: &[f64], _u: &mut ()| obj(x),
                    &xinit,
                    &bounds,
                    &cons,
                    (),
                    self.max_eval,
                    RhoBeg::All(0.5),
                    Some(cobyla::StopTols {
                        ftol_rel: self.ftol_rel.unwrap_or(0.0),
                        ftol_abs: self.ftol_abs.unwrap_or(0.0),
                        ..cobyla::StopTols::default()
                    }),
                )
                .map(|(status, x, y)| (format!("{status:?}"), x, y))
                .map_err(|(status, _, _)| format!("{status:?}"))
            }
            Algorithm::Slsqp => {
                let cons: Vec<&dyn slsqp::Func<()>> = vec![];
                slsqp::minimize(
                    |x: &[f64], gradient: Option<&mut [f64]>, _u: &mut ()| {
                        if let Some(gradient) = gradient {
                            let f = |x: &Vec<f64>| -> f64 { obj(x.as_slice()) };
                            gradient.copy_from_slice(&x.to_vec().central_diff(&f));
                        }
                        obj(x)
                    },
                    &xinit,
                    &bounds,
                    &cons,
                    (),
                    self.max_eval,
                    Some(slsqp::StopTols {
                        ftol_rel: self.ftol_rel.unwrap_or(0.0),
                        ftol_abs: self.ftol_abs.unwrap_or(0.0),
                        ..slsqp::StopTols::default()
                    }),
                )
                .map(|(status, x, y)| (format!("{status:?}"), x, y))
                .map_err(|(status, _, _)| format!("{status:?}"))
            }
        };

        if expired.get() {
            return Err(EngineError::Deadline(
                self.deadline.map(|d| d.elapsed()).unwrap_or_default(),
            ));
        }
        match res {
            Ok((status, x_opt, y_opt)) => {
                debug!("{:?} ended with {}: f={}", self.algo, status, y_opt);
                if y_opt.is_finite() {
                    Ok((y_opt, arr1(&x_opt)))
                } else {
                    Err(EngineError::OptimizerError(format!(
                        "{:?} ended on a non finite objective",
                        self.algo
                    )))
                }
            }
            Err(status) => Err(EngineError::OptimizerError(format!(
                "{:?} failed: {}",
                self.algo, status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use paste::paste;
    use std::time::Duration;

    fn sphere(x: &[f64]) -> f64 {
        (x[0] - 0.5).powi(2) + (x[1] + 0.25).powi(2)
    }

    macro_rules! test_optimizer {
        ($algo:ident, $fun:ident, $expected:expr, $tol:expr) => {
            paste! {
                #[test]
                fn [<test_ $algo:snake _ $fun>]() {
                    let bounds = array![[-2., 2.], [-2., 2.]];
                    let (y_opt, x_opt) = Optimizer::new(Algorithm::$algo, &$fun, &bounds)
                        .xinit(&array![0., 0.].view())
                        .max_eval(2000)
                        .ftol_rel(1e-12)
                        .minimize()
                        .expect("optimization");
                    assert_abs_diff_eq!(x_opt, $expected, epsilon = $tol);
                    assert!(y_opt < 1e-4);
                }
            }
        };
    }

    test_optimizer!(Cobyla, sphere, array![0.5, -0.25], 1e-3);
    test_optimizer!(Slsqp, sphere, array![0.5, -0.25], 1e-3);

    #[test]
    fn test_deadline_exhausted() {
        let bounds = array![[-2., 2.], [-2., 2.]];
        let res = Optimizer::new(Algorithm::Cobyla, &sphere, &bounds)
            .deadline(MaxTime::new(Duration::ZERO))
            .minimize();
        assert!(matches!(res, Err(EngineError::Deadline(_))));
    }
}

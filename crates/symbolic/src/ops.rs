//! Numeric kernels evaluating a single [`Op`] on concrete operands.
use crate::errors::{Result, SymbolicError};
use crate::expr::Op;
use linfa_linalg::{cholesky::*, eigh::*, triangular::*};
use ndarray::{Array2, ArrayBase, Axis, Data, Ix2, Zip};
use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::function::gamma::ln_gamma;

fn broadcast_dim(a: usize, b: usize) -> Option<usize> {
    if a == b || b == 1 {
        Some(a)
    } else if a == 1 {
        Some(b)
    } else {
        None
    }
}

fn zip_with(
    op: &Op,
    a: &Array2<f64>,
    b: &Array2<f64>,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Array2<f64>> {
    if a.shape() == b.shape() {
        return Ok(Zip::from(a).and(b).map_collect(|&x, &y| f(x, y)));
    }
    let mismatch = || {
        SymbolicError::Shape(format!(
            "{:?}: cannot broadcast {:?} with {:?}",
            op,
            a.shape(),
            b.shape()
        ))
    };
    let shape = (
        broadcast_dim(a.nrows(), b.nrows()).ok_or_else(mismatch)?,
        broadcast_dim(a.ncols(), b.ncols()).ok_or_else(mismatch)?,
    );
    let av = a.broadcast(shape).ok_or_else(mismatch)?;
    let bv = b.broadcast(shape).ok_or_else(mismatch)?;
    Ok(Zip::from(&av).and(&bv).map_collect(|&x, &y| f(x, y)))
}

fn check_square(op: &Op, a: &Array2<f64>) -> Result<()> {
    if a.nrows() != a.ncols() {
        return Err(SymbolicError::Shape(format!(
            "{:?}: expected a square matrix, got {:?}",
            op,
            a.shape()
        )));
    }
    Ok(())
}

fn check_cols(op: &Op, a: &Array2<f64>, b: &Array2<f64>) -> Result<()> {
    if a.ncols() != b.ncols() {
        return Err(SymbolicError::Shape(format!(
            "{:?}: row dimensions differ {} != {}",
            op,
            a.ncols(),
            b.ncols()
        )));
    }
    Ok(())
}

fn scalar(value: f64) -> Array2<f64> {
    Array2::from_elem((1, 1), value)
}

/// Solve `a x = b` for a symmetric positive definite `a` through its Cholesky factor
pub fn cholesky_solve(
    a: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    b: &Array2<f64>,
) -> Result<Array2<f64>> {
    let l = a.cholesky()?;
    let y = l.solve_triangular(b, UPLO::Lower)?;
    Ok(l.t().solve_triangular(&y, UPLO::Upper)?)
}

/// Add to the diagonal so that the smallest eigenvalue is at least `eps`
///
/// A matrix admitting a Cholesky factorization only gets `eps * I`, otherwise
/// the diagonal is shifted by `eps - λmin`.
pub fn diagonal_floor(a: &Array2<f64>, eps: f64) -> Result<Array2<f64>> {
    let shift = match a.cholesky() {
        Ok(_) => eps,
        Err(_) => {
            let (eigvals, _) = a.to_owned().eigh_into()?;
            let lambda_min = eigvals.fold(f64::INFINITY, |m, &v| m.min(v));
            if lambda_min.is_finite() {
                (eps - lambda_min).max(eps)
            } else {
                return Err(SymbolicError::Shape(
                    "DiagonalFloor: non finite eigenvalue".to_string(),
                ));
            }
        }
    };
    let mut res = a.to_owned();
    res.diag_mut().mapv_inplace(|v| v + shift);
    Ok(res)
}

fn student_t_ppf(p: f64, freedom: f64) -> f64 {
    match StudentsT::new(0., 1., freedom) {
        Ok(dist) => dist.inverse_cdf(p),
        Err(_) => f64::NAN,
    }
}

/// Evaluate `op` on already computed operands
pub(crate) fn apply(op: &Op, args: &[&Array2<f64>]) -> Result<Array2<f64>> {
    let res = match op {
        Op::Input(_) | Op::Hyper(_) | Op::Const(_) => {
            return Err(SymbolicError::Shape(format!("{op:?}: leaf has no operands")))
        }
        Op::Neg => args[0].mapv(|v| -v),
        Op::Exp => args[0].mapv(f64::exp),
        Op::Log => args[0].mapv(f64::ln),
        Op::Sqrt => args[0].mapv(f64::sqrt),
        Op::Square => args[0].mapv(|v| v * v),
        Op::Abs => args[0].mapv(f64::abs),
        Op::Recip => args[0].mapv(f64::recip),
        Op::Sin => args[0].mapv(f64::sin),
        Op::Sinh => args[0].mapv(f64::sinh),
        Op::Cosh => args[0].mapv(f64::cosh),
        Op::Asinh => args[0].mapv(f64::asinh),
        Op::LnGamma => args[0].mapv(ln_gamma),
        Op::StudentTPpf(p) => args[0].mapv(|nu| student_t_ppf(*p, nu)),
        Op::Add => zip_with(op, args[0], args[1], |a, b| a + b)?,
        Op::Sub => zip_with(op, args[0], args[1], |a, b| a - b)?,
        Op::Mul => zip_with(op, args[0], args[1], |a, b| a * b)?,
        Op::Div => zip_with(op, args[0], args[1], |a, b| a / b)?,
        Op::Pow => zip_with(op, args[0], args[1], f64::powf)?,
        Op::Maximum => zip_with(op, args[0], args[1], f64::max)?,
        Op::MatMul => {
            let (a, b) = (args[0], args[1]);
            if a.ncols() != b.nrows() {
                return Err(SymbolicError::Shape(format!(
                    "MatMul: {:?} x {:?}",
                    a.shape(),
                    b.shape()
                )));
            }
            a.dot(b)
        }
        Op::Transpose => args[0].t().to_owned(),
        Op::Solve => {
            check_square(op, args[0])?;
            cholesky_solve(args[0], args[1])?
        }
        Op::Cholesky => args[0].cholesky()?,
        Op::LogDet => {
            let l = args[0].cholesky()?;
            scalar(2. * l.diag().mapv(f64::ln).sum())
        }
        Op::Diag => args[0].diag().to_owned().insert_axis(Axis(1)),
        Op::Sum => scalar(args[0].sum()),
        Op::Rows => scalar(args[0].nrows() as f64),
        Op::SqDist => {
            let (a, b) = (args[0], args[1]);
            check_cols(op, a, b)?;
            Array2::from_shape_fn((a.nrows(), b.nrows()), |(i, j)| {
                Zip::from(a.row(i))
                    .and(b.row(j))
                    .fold(0., |acc, &u, &v| acc + (u - v) * (u - v))
            })
        }
        Op::L1Dist => {
            let (a, b) = (args[0], args[1]);
            check_cols(op, a, b)?;
            Array2::from_shape_fn((a.nrows(), b.nrows()), |(i, j)| {
                Zip::from(a.row(i))
                    .and(b.row(j))
                    .fold(0., |acc, &u, &v| acc + (u - v).abs())
            })
        }
        Op::EyeLike => Array2::eye(args[0].nrows()),
        Op::OnesLike => Array2::ones((args[0].nrows(), 1)),
        Op::ZerosLike => Array2::zeros((args[0].nrows(), args[1].nrows())),
        Op::Symmetrize => {
            check_square(op, args[0])?;
            (args[0] + &args[0].t()) / 2.
        }
        Op::ReplaceNonFinite { diag, off_diag } => {
            Array2::from_shape_fn(args[0].raw_dim(), |(i, j)| {
                let v = args[0][[i, j]];
                if v.is_finite() {
                    v
                } else if i == j {
                    *diag
                } else {
                    *off_diag
                }
            })
        }
        Op::DiagonalFloor { eps } => {
            check_square(op, args[0])?;
            diagonal_floor(args[0], *eps)?
        }
    };
    Ok(res)
}

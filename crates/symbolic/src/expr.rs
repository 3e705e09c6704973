//! Expression graph.
//!
//! Every value flowing through an [`Expr`] is a 2-D `f64` array: vectors are
//! `n x 1` columns and scalars are `1 x 1`. Elementwise operators broadcast
//! along axes of length one, so a scalar hyper-parameter can scale a matrix
//! and a `1 x d` row can divide an `n x d` design matrix.
use ndarray::{Array1, Array2, Axis};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static NODE_ID: AtomicUsize = AtomicUsize::new(0);

/// Operation held by a node of the expression graph
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    /// Positional input bound at call time (space, inputs, outputs, ...)
    Input(String),
    /// Named hyper-parameter bound at call time
    Hyper(String),
    /// Constant array
    Const(Array2<f64>),
    /// Elementwise negation
    Neg,
    /// Elementwise exponential
    Exp,
    /// Elementwise natural logarithm
    Log,
    /// Elementwise square root
    Sqrt,
    /// Elementwise square
    Square,
    /// Elementwise absolute value
    Abs,
    /// Elementwise reciprocal
    Recip,
    /// Elementwise sine
    Sin,
    /// Elementwise hyperbolic sine
    Sinh,
    /// Elementwise hyperbolic cosine
    Cosh,
    /// Elementwise inverse hyperbolic sine
    Asinh,
    /// Elementwise `ln(Γ(x))`
    LnGamma,
    /// Elementwise quantile at `p` of a standard Student-t whose degrees of freedom are the operand
    StudentTPpf(f64),
    /// Broadcasting addition
    Add,
    /// Broadcasting subtraction
    Sub,
    /// Broadcasting elementwise product
    Mul,
    /// Broadcasting elementwise division
    Div,
    /// Broadcasting elementwise power
    Pow,
    /// Broadcasting elementwise maximum
    Maximum,
    /// Matrix product
    MatMul,
    /// Matrix transpose
    Transpose,
    /// `A^-1 B` for a symmetric positive definite `A`
    Solve,
    /// Lower Cholesky factor
    Cholesky,
    /// Log-determinant of a symmetric positive definite matrix
    LogDet,
    /// Diagonal as a column
    Diag,
    /// Sum of all entries as a scalar
    Sum,
    /// Number of rows as a scalar
    Rows,
    /// Pairwise squared euclidean distances between rows
    SqDist,
    /// Pairwise manhattan distances between rows
    L1Dist,
    /// Identity matrix with as many rows as the operand
    EyeLike,
    /// Column of ones with as many rows as the operand
    OnesLike,
    /// Zero matrix of shape `(rows(a), rows(b))`
    ZerosLike,
    /// `(A + A^T) / 2`
    Symmetrize,
    /// Replace NaN and infinite entries
    ReplaceNonFinite {
        /// replacement on the diagonal
        diag: f64,
        /// replacement elsewhere
        off_diag: f64,
    },
    /// Shift the diagonal so that every eigenvalue is at least `eps`
    DiagonalFloor {
        /// eigenvalue floor
        eps: f64,
    },
}

impl Op {
    /// Key used to merge structurally identical nodes at compile time
    pub(crate) fn key(&self, id: usize) -> String {
        match self {
            Op::Const(_) => format!("Const#{id}"),
            op => format!("{op:?}"),
        }
    }
}

#[derive(Debug)]
struct Node {
    id: usize,
    op: Op,
    args: Vec<Expr>,
}

/// A node of an immutable, shareable expression graph
#[derive(Clone, Debug)]
pub struct Expr(Arc<Node>);

macro_rules! unary_ops {
    ($($(#[$doc:meta])* $name:ident => $op:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(&self) -> Expr {
                Expr::node(Op::$op, vec![self.clone()])
            }
        )*
    };
}

macro_rules! binary_ops {
    ($($(#[$doc:meta])* $name:ident => $op:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(&self, other: &Expr) -> Expr {
                Expr::node(Op::$op, vec![self.clone(), other.clone()])
            }
        )*
    };
}

impl Expr {
    fn node(op: Op, args: Vec<Expr>) -> Expr {
        Expr(Arc::new(Node {
            id: NODE_ID.fetch_add(1, Ordering::Relaxed),
            op,
            args,
        }))
    }

    /// Positional input leaf
    pub fn input(name: &str) -> Expr {
        Expr::node(Op::Input(name.to_string()), vec![])
    }

    /// Hyper-parameter leaf
    pub fn hyper(name: &str) -> Expr {
        Expr::node(Op::Hyper(name.to_string()), vec![])
    }

    /// Constant leaf
    pub fn constant(value: Array2<f64>) -> Expr {
        Expr::node(Op::Const(value), vec![])
    }

    /// Constant `1 x 1` leaf
    pub fn scalar(value: f64) -> Expr {
        Expr::constant(Array2::from_elem((1, 1), value))
    }

    /// Constant column leaf
    pub fn column(value: Array1<f64>) -> Expr {
        Expr::constant(value.insert_axis(Axis(1)))
    }

    /// Unique node identifier
    pub fn id(&self) -> usize {
        self.0.id
    }

    /// Operation of this node
    pub fn op(&self) -> &Op {
        &self.0.op
    }

    /// Operands of this node
    pub fn args(&self) -> &[Expr] {
        &self.0.args
    }

    unary_ops! {
        /// Elementwise negation
        negate => Neg,
        /// Elementwise exponential
        exp => Exp,
        /// Elementwise natural logarithm
        ln => Log,
        /// Elementwise square root
        sqrt => Sqrt,
        /// Elementwise square
        square => Square,
        /// Elementwise absolute value
        abs => Abs,
        /// Elementwise reciprocal
        recip => Recip,
        /// Elementwise sine
        sin => Sin,
        /// Elementwise hyperbolic sine
        sinh => Sinh,
        /// Elementwise hyperbolic cosine
        cosh => Cosh,
        /// Elementwise inverse hyperbolic sine
        asinh => Asinh,
        /// Elementwise log-gamma
        ln_gamma => LnGamma,
        /// Transpose
        t => Transpose,
        /// Lower Cholesky factor
        cholesky => Cholesky,
        /// Log-determinant of a positive definite matrix
        logdet => LogDet,
        /// Diagonal as a column
        diag => Diag,
        /// Sum of all entries
        sum => Sum,
        /// Number of rows
        rows => Rows,
        /// Identity matrix sized after the rows of this expression
        eye_like => EyeLike,
        /// Column of ones sized after the rows of this expression
        ones_like => OnesLike,
        /// Symmetric part
        symmetrize => Symmetrize,
    }

    binary_ops! {
        /// Elementwise power
        pow => Pow,
        /// Elementwise maximum
        maximum => Maximum,
        /// Matrix product
        dot => MatMul,
        /// `self^-1 other` where `self` is symmetric positive definite
        solve => Solve,
        /// Pairwise squared distances between the rows of `self` and `other`
        sq_dist => SqDist,
        /// Pairwise manhattan distances between the rows of `self` and `other`
        l1_dist => L1Dist,
        /// Zero matrix of shape `(rows(self), rows(other))`
        zeros_like => ZerosLike,
    }

    /// Elementwise power by a constant exponent
    pub fn powf(&self, exponent: f64) -> Expr {
        self.pow(&Expr::scalar(exponent))
    }

    /// Elementwise Student-t quantile at `p`, `self` holding the degrees of freedom
    pub fn student_t_ppf(&self, p: f64) -> Expr {
        Expr::node(Op::StudentTPpf(p), vec![self.clone()])
    }

    /// Replace non finite entries by `diag` on the diagonal and `off_diag` elsewhere
    pub fn replace_non_finite(&self, diag: f64, off_diag: f64) -> Expr {
        Expr::node(Op::ReplaceNonFinite { diag, off_diag }, vec![self.clone()])
    }

    /// Shift the diagonal so that every eigenvalue is at least `eps`
    pub fn diagonal_floor(&self, eps: f64) -> Expr {
        Expr::node(Op::DiagonalFloor { eps }, vec![self.clone()])
    }

    fn visit(&self, f: &mut impl FnMut(&Expr)) {
        let mut seen = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(e) = stack.pop() {
            if seen.insert(e.id()) {
                f(&e);
                stack.extend(e.args().iter().cloned());
            }
        }
    }

    /// Names of the positional inputs this expression depends on
    pub fn free_inputs(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.visit(&mut |e| {
            if let Op::Input(name) = e.op() {
                names.insert(name.clone());
            }
        });
        names
    }

    /// Names of the hyper-parameters this expression depends on
    pub fn free_hypers(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.visit(&mut |e| {
            if let Op::Hyper(name) = e.op() {
                names.insert(name.clone());
            }
        });
        names
    }

    /// Number of distinct nodes reachable from this expression
    pub fn size(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |_| count += 1);
        count
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.op() {
            Op::Input(name) | Op::Hyper(name) => write!(f, "{name}"),
            Op::Const(c) if c.len() == 1 => write!(f, "{}", c[[0, 0]]),
            Op::Const(c) => write!(f, "const[{}x{}]", c.nrows(), c.ncols()),
            op => write!(
                f,
                "{:?}[{} nodes; inputs {:?}; hypers {:?}]",
                op,
                self.size(),
                self.free_inputs(),
                self.free_hypers()
            ),
        }
    }
}

macro_rules! impl_binop {
    ($trait:ident, $method:ident, $op:ident) => {
        impl $trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::node(Op::$op, vec![self.clone(), rhs.clone()])
            }
        }
        impl $trait<Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::node(Op::$op, vec![self.clone(), rhs])
            }
        }
        impl $trait<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::node(Op::$op, vec![self, rhs.clone()])
            }
        }
        impl $trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::node(Op::$op, vec![self, rhs])
            }
        }
        impl $trait<f64> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::node(Op::$op, vec![self.clone(), Expr::scalar(rhs)])
            }
        }
        impl $trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::node(Op::$op, vec![self, Expr::scalar(rhs)])
            }
        }
        impl $trait<&Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::node(Op::$op, vec![Expr::scalar(self), rhs.clone()])
            }
        }
        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::node(Op::$op, vec![Expr::scalar(self), rhs])
            }
        }
    };
}

impl_binop!(Add, add, Add);
impl_binop!(Sub, sub, Sub);
impl_binop!(Mul, mul, Mul);
impl_binop!(Div, div, Div);

impl Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        self.negate()
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        self.negate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_variables() {
        let x = Expr::input("x");
        let ls = Expr::hyper("ls");
        let var = Expr::hyper("var");
        let k = &var * (x.sq_dist(&x) / ls.square() * -0.5).exp();
        assert_eq!(k.free_inputs().into_iter().collect::<Vec<_>>(), vec!["x"]);
        assert_eq!(
            k.free_hypers().into_iter().collect::<Vec<_>>(),
            vec!["ls", "var"]
        );
    }

    #[test]
    fn test_shared_nodes_counted_once() {
        let x = Expr::input("x");
        let y = x.exp();
        let z = &y + &y;
        // x, exp(x), add
        assert_eq!(z.size(), 3);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Expr::hyper("noise_var")), "noise_var");
        assert_eq!(format!("{}", Expr::scalar(2.5)), "2.5");
    }
}

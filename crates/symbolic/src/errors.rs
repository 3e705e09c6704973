use linfa_linalg::LinalgError;
use thiserror::Error;

/// A result type for expression compilation and evaluation
pub type Result<T> = std::result::Result<T, SymbolicError>;

/// An error when compiling or evaluating an expression graph
#[derive(Error, Debug)]
pub enum SymbolicError {
    /// When a free variable of the expression is not part of the signature
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),
    /// When a hyper-parameter value is not provided at call time
    #[error("Missing hyper-parameter value: {0}")]
    MissingHyper(String),
    /// When the number of positional inputs does not match the signature
    #[error("Expected {expected} positional inputs, got {got}")]
    InputCount {
        /// Number of inputs declared by the signature
        expected: usize,
        /// Number of inputs given
        got: usize,
    },
    /// When operand shapes are incompatible
    #[error("Shape error: {0}")]
    Shape(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] LinalgError),
}

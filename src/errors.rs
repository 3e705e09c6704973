use thiserror::Error;
use tgp_engine::EngineError;
use tgp_symbolic::SymbolicError;

/// A result type for stochastic process definition and inference
pub type Result<T> = std::result::Result<T, TgpError>;

/// An error when defining, compiling or querying a stochastic process
#[derive(Error, Debug)]
pub enum TgpError {
    /// When array dimensions disagree with the declared ones
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
    /// When an operation requires observations and none are bound
    #[error("Missing observation: {0}")]
    MissingObservation(String),
    /// When a numerical computation produces unusable values
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
    /// When an optimizer attempt fails
    #[error("Optimizer failure: {0}")]
    OptimizerFailure(String),
    /// When a quantity cannot be compiled
    #[error("Compilation failure: {0}")]
    CompilationFailure(String),
    /// When an operation is not allowed in the current phase
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// When a value is invalid
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    /// When a saved process cannot be restored
    #[error("Load error: {0}")]
    LoadError(String),
    /// When the numeric backend fails
    #[error(transparent)]
    SymbolicError(#[from] SymbolicError),
    /// When the sampler or optimizer backend fails
    #[error(transparent)]
    EngineError(#[from] EngineError),
    /// When an io error occurs
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    /// When a JSON (de)serialization error occurs
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
    /// When a binary (de)serialization error occurs
    #[cfg(feature = "persistent")]
    #[error(transparent)]
    BincodeError(#[from] bincode::Error),
}

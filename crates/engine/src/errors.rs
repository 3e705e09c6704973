use std::time::Duration;
use thiserror::Error;

/// A result type for optimizers and samplers
pub type Result<T> = std::result::Result<T, EngineError>;

/// An error when optimizing or sampling a log-density
#[derive(Error, Debug)]
pub enum EngineError {
    /// When the underlying optimizer reports a failure
    #[error("Optimizer error: {0}")]
    OptimizerError(String),
    /// When the time budget is exhausted
    #[error("Deadline reached after {0:?}")]
    Deadline(Duration),
    /// When a value is invalid
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

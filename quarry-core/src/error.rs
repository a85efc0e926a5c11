// src/error.rs
use thiserror::Error;

/// Errors raised while compiling or running queries and pipelines.
///
/// Every variant is fatal for the call that produced it: the engine is a
/// pure transform, so nothing is retried and no stage recovers from the
/// error of another stage.
#[derive(Error, Debug)]
pub enum QuarryError {
    /// Malformed stage or operator arguments
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unregistered stage or operator name
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    /// Registration of a name that already exists in its class
    #[error("Operator already registered: {0}")]
    DuplicateOperator(String),

    /// Registration of a name that does not match `^\$\w+$`
    #[error("Invalid operator name: {0}")]
    InvalidOperatorName(String),

    /// A value had the wrong shape for the stage or operator consuming it
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QuarryError>;

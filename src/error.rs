//! Error taxonomy for the response engine
//!
//! Typed errors using thiserror. Only `InvalidInput` ever reaches the
//! caller of the engine; every other variant is absorbed by the request
//! coordinator, which converts it into a graceful failure response.

use thiserror::Error;

/// Main error type for the response engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed inbound request, rejected before any workflow starts
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Timesheet data could not be fetched; composition proceeds without it
    #[error("timesheet data unavailable: {0}")]
    DataUnavailable(String),

    /// A language inference call exceeded its budget
    #[error("inference timed out after {timeout_ms}ms during {operation}")]
    InferenceTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// A language inference call failed outright
    #[error("inference failed during {operation}: {message}")]
    InferenceError {
        operation: &'static str,
        message: String,
    },

    /// Formatting broke down; the raw draft is delivered instead
    #[error("formatting error: {0}")]
    Formatting(String),

    /// Engine construction or configuration file problem
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Short classification used in audit records and failure reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::DataUnavailable(_) => "data_unavailable",
            EngineError::InferenceTimeout { .. } => "inference_timeout",
            EngineError::InferenceError { .. } => "inference_error",
            EngineError::Formatting(_) => "formatting_error",
            EngineError::Config(_) => "config_error",
            EngineError::Serialization(_) => "serialization_error",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

//! Error types for the Refinery core library.
//!
//! Uses `thiserror` for the public error taxonomy: configuration mistakes
//! detected at construction, per-record transform failures, schema problems,
//! and history-store persistence failures.

use std::path::PathBuf;

/// Top-level error type for the Refinery core library.
#[derive(Debug, thiserror::Error)]
pub enum RefineryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigurationError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("History store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Invalid operator or tuner options. Always fatal to the operator's setup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Quality weights must be non-negative and sum to 1.0, got {total:.4}")]
    InvalidWeights { total: f64 },

    #[error("Option '{option}' must be within [{min}, {max}], got {value}")]
    OutOfRange {
        option: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid value '{value}' for option '{option}', expected one of: {expected}")]
    InvalidChoice {
        option: String,
        value: String,
        expected: String,
    },

    #[error("Unknown aggregation function '{name}' for output '{output}'")]
    UnknownFunction { output: String, name: String },

    #[error("Missing required option: {option}")]
    MissingOption { option: String },

    #[error("Duplicate field '{field}' in option '{option}'")]
    DuplicateField { option: String, field: String },

    #[error("Invalid regular expression '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Embedding model could not be loaded: {message}")]
    EmbeddingModel { message: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    Parse { message: String },
}

impl ConfigurationError {
    pub(crate) fn out_of_range(option: &str, value: f64, min: f64, max: f64) -> Self {
        Self::OutOfRange {
            option: option.to_string(),
            value,
            min,
            max,
        }
    }

    pub(crate) fn missing(option: &str) -> Self {
        Self::MissingOption {
            option: option.to_string(),
        }
    }
}

/// A single record could not be transformed. Caught per record by
/// [`Transformer::transform_batch`](crate::transformer::Transformer::transform_batch).
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("{operator} failed on record {record}: {message}")]
    Failed {
        operator: String,
        record: String,
        message: String,
    },

    #[error("{operator} only operates on whole batches")]
    BatchOnly { operator: String },
}

/// A schema could not be inferred or is internally inconsistent.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Duplicate field '{name}' in schema '{schema}'")]
    DuplicateField { schema: String, name: String },

    #[error("Cannot infer a schema from an empty sample")]
    EmptySample,

    #[error("Inconsistent schema '{schema}': {message}")]
    Inconsistent { schema: String, message: String },
}

/// Errors from the auto-tuner's performance history store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("History for pipeline '{pipeline_id}' could not be read: {message}")]
    Read {
        pipeline_id: String,
        message: String,
    },

    #[error("History for pipeline '{pipeline_id}' could not be written: {message}")]
    Write {
        pipeline_id: String,
        message: String,
    },

    #[error("History store lock poisoned")]
    Poisoned,
}

/// A type alias for results using the top-level `RefineryError`.
pub type Result<T> = std::result::Result<T, RefineryError>;

//! Error types for NLTHA orchestration

use thiserror::Error;

/// Main error type for record loading, intensity computation and analysis control
#[derive(Error, Debug)]
pub enum NlthaError {
    #[error("Configuration error in '{parameter}': {reason}")]
    Configuration { parameter: String, reason: String },

    #[error("Invalid period {0}: periods must be positive")]
    InvalidPeriod(f64),

    #[error("Insufficient data for record '{record}': {reason}")]
    InsufficientData { record: String, reason: String },

    #[error("Failed to load ground motion '{name}': {reason}")]
    RecordLoad { name: String, reason: String },

    #[error("Response driver failed on record '{record}' at scale {scale}: {reason}")]
    Driver {
        record: String,
        scale: f64,
        reason: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl NlthaError {
    /// Shorthand for a fatal configuration error naming the offending parameter
    pub fn config(parameter: &str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors that must abort a batch before any solver call
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::InvalidPeriod(_))
    }
}

/// Result type for NLTHA operations
pub type NlthaResult<T> = Result<T, NlthaError>;

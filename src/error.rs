//! Domain-specific error types for causal-loop-analytics

use serde_json::{Value, json};
use thiserror::Error;

/// Main error type for the analytics core and its surfaces
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyticsError {
    #[error("Insufficient data for {operation}: need at least {required} records, got {actual}")]
    InsufficientData {
        operation: String,
        required: usize,
        actual: usize,
    },

    #[error("Model not trained: {engine}")]
    ModelNotTrained { engine: String },

    #[error("No feedback loops to simulate")]
    NoLoopsToSimulate,

    #[error("Serialization error: {message}")]
    SerializationFailure { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Record store error: {message}")]
    Store { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AnalyticsError {
    pub fn insufficient(operation: &str, required: usize, actual: usize) -> Self {
        AnalyticsError::InsufficientData {
            operation: operation.to_string(),
            required,
            actual,
        }
    }

    pub fn not_trained(engine: &str) -> Self {
        AnalyticsError::ModelNotTrained {
            engine: engine.to_string(),
        }
    }

    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            AnalyticsError::InsufficientData { .. } => "insufficient_data",
            AnalyticsError::ModelNotTrained { .. } => "model_not_trained",
            AnalyticsError::NoLoopsToSimulate => "no_loops_to_simulate",
            AnalyticsError::SerializationFailure { .. } => "serialization_failure",
            AnalyticsError::Config { .. } => "config_error",
            AnalyticsError::Store { .. } => "store_error",
            AnalyticsError::NotFound { .. } => "not_found",
            AnalyticsError::InvalidParams { .. } => "invalid_params",
            AnalyticsError::Internal { .. } => "internal_error",
        }
    }

    /// Structured payload reported to callers in place of a fault.
    pub fn to_payload(&self) -> Value {
        let details = match self {
            AnalyticsError::InsufficientData {
                operation,
                required,
                actual,
            } => json!({ "operation": operation, "required": required, "actual": actual }),
            AnalyticsError::ModelNotTrained { engine } => json!({ "engine": engine }),
            _ => Value::Null,
        };
        json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "details": details
            }
        })
    }
}

impl From<anyhow::Error> for AnalyticsError {
    fn from(err: anyhow::Error) -> Self {
        AnalyticsError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AnalyticsError {
    fn from(err: serde_json::Error) -> Self {
        AnalyticsError::SerializationFailure {
            message: err.to_string(),
        }
    }
}

impl From<rmp_serde::encode::Error> for AnalyticsError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        AnalyticsError::SerializationFailure {
            message: format!("bundle encode failed: {}", err),
        }
    }
}

impl From<rmp_serde::decode::Error> for AnalyticsError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        AnalyticsError::SerializationFailure {
            message: format!("bundle decode failed: {}", err),
        }
    }
}

impl From<std::io::Error> for AnalyticsError {
    fn from(err: std::io::Error) -> Self {
        AnalyticsError::SerializationFailure {
            message: format!("I/O failure: {}", err),
        }
    }
}

impl From<tokio::task::JoinError> for AnalyticsError {
    fn from(err: tokio::task::JoinError) -> Self {
        AnalyticsError::Internal {
            message: format!("Background task failed: {}", err),
        }
    }
}

/// Result type alias for analytics operations
pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_code_and_details() {
        let err = AnalyticsError::insufficient("cluster_problems", 3, 2);
        let payload = err.to_payload();
        assert_eq!(payload["error"]["code"], "insufficient_data");
        assert_eq!(payload["error"]["details"]["required"], 3);
        assert_eq!(payload["error"]["details"]["actual"], 2);
    }

    #[test]
    fn model_not_trained_message_names_engine() {
        let err = AnalyticsError::not_trained("archetype");
        assert_eq!(err.code(), "model_not_trained");
        assert!(err.to_string().contains("archetype"));
    }
}

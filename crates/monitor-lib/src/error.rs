//! Error taxonomy for the monitor pipeline

use thiserror::Error;

/// Errors surfaced by the monitor's components.
///
/// Ingestion and query failures are returned to the immediate caller;
/// the periodic monitor loop logs `Storage` failures and retries on its
/// next cycle instead of crashing the process.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Malformed input to the event recorder or retraining ledger.
    /// Rejected before anything is persisted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Health cannot be computed because no finalized windows exist for
    /// the model. Callers must treat the model as unknown, not healthy.
    #[error("insufficient data to compute health for model {model_id}")]
    InsufficientData { model_id: String },

    /// Query for a model that has never reported.
    #[error("model {model_id} not found")]
    NotFound { model_id: String },

    /// The durable store failed an operation.
    #[error("storage error: {0}")]
    Storage(String),
}

impl MonitorError {
    pub fn validation(message: impl Into<String>) -> Self {
        MonitorError::Validation(message.into())
    }

    pub fn insufficient_data(model_id: impl Into<String>) -> Self {
        MonitorError::InsufficientData {
            model_id: model_id.into(),
        }
    }

    pub fn not_found(model_id: impl Into<String>) -> Self {
        MonitorError::NotFound {
            model_id: model_id.into(),
        }
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Storage(err.to_string())
    }
}

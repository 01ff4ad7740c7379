use sink::{CursorStoreError, SinkError};
use sink_kafka::KafkaBusError;
use thiserror::Error;

/// Errors that stop the sink process.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing required environment variable {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value '{value}' for {name}: {reason}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Substreams error: {0:#}")]
    Substreams(#[from] anyhow::Error),

    #[error("Cursor store error: {0}")]
    CursorStore(#[from] CursorStoreError),

    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaBusError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Tracing setup failed: {0}")]
    Tracing(String),
}

impl AppError {
    pub fn invalid_env(name: &'static str, value: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidEnv {
            name,
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

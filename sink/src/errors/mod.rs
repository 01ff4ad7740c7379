//! Error types for the sink.
//!
//! Only [`BusError::Retryable`] is ever recovered from, inside the publisher's
//! retry loop. Every [`SinkError`] that reaches the driver halts it.

use thiserror::Error;

use crate::types::Position;

/// Errors that stop the sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Publish for block {position} failed after {attempts} attempts: {reason}")]
    RetryCeilingExceeded {
        position: Position,
        attempts: usize,
        reason: String,
    },

    #[error("Message for block {position} rejected: {reason}")]
    PermanentReject { position: Position, reason: String },

    #[error(
        "Undo log gap: rollback to block {last_valid} requested but history is only retained after block {retained_after}"
    )]
    UndoLogGap { last_valid: u64, retained_after: u64 },

    #[error("Cursor persistence failure: {0}")]
    CursorPersistence(#[from] CursorStoreError),

    #[error("Upstream stream error: {0}")]
    UpstreamStream(String),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Data for block {0} received while compensating a rollback")]
    Compensating(Position),

    #[error("Publish task failed: {0}")]
    PublishTask(String),

    #[error("Failed to encode compensation message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SinkError {
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamStream(msg.into())
    }

    pub fn invalid_block(msg: impl Into<String>) -> Self {
        Self::InvalidBlock(msg.into())
    }
}

/// Outcome classification of a failed publish.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Transient failure (broker unavailable, queue full, timeout).
    #[error("retryable bus error: {0}")]
    Retryable(String),

    /// The bus will never accept this message.
    #[error("fatal bus error: {0}")]
    Fatal(String),
}

impl BusError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Errors from a cursor store backend.
#[derive(Debug, Error)]
pub enum CursorStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

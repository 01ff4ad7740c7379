//! Rollback resolution: turn an undo signal into compensating messages.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::info;

use crate::bus::{
    OutboundMessage, ACTION_INVALIDATE, ACTION_RETRACT, HEADER_ACTION, HEADER_BLOCK_ID,
    HEADER_BLOCK_NUMBER,
};
use crate::errors::SinkError;
use crate::types::{MessageId, Position, UndoSignal};
use crate::undo_log::UndoLog;

/// Retraction of one previously published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensatingAction {
    pub position: Position,
    pub message: MessageId,
}

/// How a compensating action is expressed on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompensationStrategy {
    /// Null payload under the retracted key, which compacted topics treat as a
    /// delete.
    #[default]
    Tombstone,
    /// Explicit JSON invalidation under the retracted key.
    Invalidation,
}

#[derive(Debug, Serialize)]
struct Invalidation<'a> {
    retracted_key: &'a str,
    retracted_transport_id: &'a str,
    block_number: u64,
    block_id: &'a str,
    last_valid_block: u64,
}

impl CompensationStrategy {
    pub fn message(
        &self,
        topic: &str,
        action: &CompensatingAction,
        last_valid: &Position,
    ) -> Result<OutboundMessage, SinkError> {
        let message = match self {
            Self::Tombstone => OutboundMessage::new(topic, &action.message.key, None)
                .with_header(HEADER_ACTION, ACTION_RETRACT),
            Self::Invalidation => {
                let body = serde_json::to_vec(&Invalidation {
                    retracted_key: &action.message.key,
                    retracted_transport_id: &action.message.transport_id,
                    block_number: action.position.number,
                    block_id: &action.position.id,
                    last_valid_block: last_valid.number,
                })?;

                OutboundMessage::new(topic, &action.message.key, Some(body))
                    .with_header(HEADER_ACTION, ACTION_INVALIDATE)
            }
        };

        Ok(message
            .with_header(HEADER_BLOCK_NUMBER, action.position.number)
            .with_header(HEADER_BLOCK_ID, &action.position.id))
    }
}

impl FromStr for CompensationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tombstone" => Ok(Self::Tombstone),
            "invalidation" => Ok(Self::Invalidation),
            other => Err(format!(
                "unknown compensation strategy '{}', expected 'tombstone' or 'invalidation'",
                other
            )),
        }
    }
}

impl fmt::Display for CompensationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tombstone => write!(f, "tombstone"),
            Self::Invalidation => write!(f, "invalidation"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RollbackResolver;

impl RollbackResolver {
    /// Remove the retracted range from the undo log and return one action per
    /// retracted message, most recent first.
    ///
    /// Fails with [`SinkError::UndoLogGap`] when the log no longer holds the
    /// whole range, in which case the log is left untouched.
    pub fn resolve(
        &self,
        undo: &UndoSignal,
        undo_log: &mut UndoLog,
    ) -> Result<Vec<CompensatingAction>, SinkError> {
        let last_valid = &undo.last_valid_position;

        if !undo_log.covers(last_valid.number) {
            return Err(SinkError::UndoLogGap {
                last_valid: last_valid.number,
                retained_after: undo_log.floor().unwrap_or_default(),
            });
        }

        let actions: Vec<_> = undo_log
            .take_after(last_valid)
            .into_iter()
            .flat_map(|entry| {
                let position = entry.position;
                entry
                    .messages
                    .into_iter()
                    .rev()
                    .map(move |message| CompensatingAction {
                        position: position.clone(),
                        message,
                    })
            })
            .collect();

        info!(
            last_valid = last_valid.number,
            actions = actions.len(),
            "Resolved rollback"
        );

        Ok(actions)
    }
}

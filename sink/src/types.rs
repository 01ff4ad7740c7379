//! Data model shared by every sink component.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A point in the upstream block sequence.
///
/// Ordered by block number first, so positions on one branch compare the way
/// the chain grows. `id` identifies the branch the block belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub number: u64,
    pub id: String,
    /// Block was irreversible when delivered.
    #[serde(default)]
    pub is_final: bool,
}

impl Position {
    pub fn new(number: u64, id: impl Into<String>) -> Self {
        Self {
            number,
            id: id.into(),
            is_final: false,
        }
    }

    pub fn finalized(mut self, is_final: bool) -> Self {
        self.is_final = is_final;
        self
    }

    /// Message key for records at this position.
    ///
    /// Depends on nothing but the position, so a redelivered block produces
    /// the same key and downstream consumers can deduplicate on it.
    pub fn message_key(&self) -> String {
        format!("{}-{}", self.number, self.id)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.id)
    }
}

/// One block worth of module output.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    pub position: Position,
    pub payload: Vec<u8>,
    pub is_live: bool,
    /// Upstream resume token at this block.
    pub cursor: String,
    pub final_block_height: u64,
    /// Block timestamp, seconds since epoch.
    pub timestamp: i64,
}

impl DataRecord {
    pub fn resume_cursor(&self) -> Cursor {
        Cursor {
            position: self.position.clone(),
            token: self.cursor.clone(),
        }
    }
}

/// Everything after `last_valid_position` is retracted.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoSignal {
    pub last_valid_position: Position,
    pub last_valid_cursor: String,
}

impl UndoSignal {
    pub fn resume_cursor(&self) -> Cursor {
        Cursor {
            position: self.last_valid_position.clone(),
            token: self.last_valid_cursor.clone(),
        }
    }
}

/// Durable resume marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub position: Position,
    /// Opaque upstream cursor to resume the stream from.
    pub token: String,
}

/// An upstream event, processed strictly in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Data(DataRecord),
    Undo(UndoSignal),
}

/// Identifies a published message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageId {
    /// Message key on the bus.
    pub key: String,
    /// Identifier assigned by the transport on acknowledgment.
    pub transport_id: String,
}

//! Ack watermark: which block the cursor may safely advance to.
//!
//! Blocks are tracked in submission order with their outstanding publish
//! count. A block is released once it and every block before it is fully
//! acknowledged, so the released cursor never passes an unacknowledged
//! publish.

use std::collections::BTreeMap;

use tracing::warn;

use crate::types::{Cursor, MessageId};

/// A fully acknowledged block.
#[derive(Debug, Clone, PartialEq)]
pub struct Released {
    pub cursor: Cursor,
    pub final_block_height: u64,
    pub messages: Vec<MessageId>,
}

#[derive(Debug)]
struct Slot {
    cursor: Cursor,
    final_block_height: u64,
    outstanding: usize,
    messages: Vec<MessageId>,
}

#[derive(Debug, Default)]
pub struct AckWatermark {
    pending: BTreeMap<u64, Slot>,
}

impl AckWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a block with `outstanding` publishes.
    ///
    /// A block without publishes is released as soon as the blocks before it
    /// are.
    pub fn track(&mut self, cursor: Cursor, final_block_height: u64, outstanding: usize) {
        self.pending.insert(
            cursor.position.number,
            Slot {
                cursor,
                final_block_height,
                outstanding,
                messages: Vec::new(),
            },
        );
    }

    /// Count one acknowledged publish for `block`.
    pub fn ack(&mut self, block: u64, message: MessageId) {
        match self.pending.get_mut(&block) {
            Some(slot) => {
                slot.outstanding = slot.outstanding.saturating_sub(1);
                slot.messages.push(message);
            }
            None => warn!(block, key = %message.key, "Ack for untracked block"),
        }
    }

    /// Pop every leading block whose publishes are all acknowledged.
    pub fn release(&mut self) -> Vec<Released> {
        let mut released = Vec::new();

        while let Some(entry) = self.pending.first_entry() {
            if entry.get().outstanding > 0 {
                break;
            }
            let slot = entry.remove();
            released.push(Released {
                cursor: slot.cursor,
                final_block_height: slot.final_block_height,
                messages: slot.messages,
            });
        }

        released
    }

    /// Lowest block with an outstanding publish.
    pub fn lowest_unacknowledged(&self) -> Option<u64> {
        self.pending
            .iter()
            .find(|(_, slot)| slot.outstanding > 0)
            .map(|(block, _)| *block)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

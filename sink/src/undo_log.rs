//! Bounded history of published messages, used to compensate rollbacks.
//!
//! The log vouches for every block strictly above its floor: anything
//! published after the floor and acknowledged is recorded here until it is
//! evicted by the retention window or pruned as final.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{MessageId, Position};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoLogEntry {
    pub position: Position,
    pub messages: Vec<MessageId>,
}

#[derive(Debug)]
pub struct UndoLog {
    entries: VecDeque<UndoLogEntry>,
    retention: usize,
    floor: Option<u64>,
}

impl UndoLog {
    /// Empty log for a fresh start. The floor is set by [`UndoLog::start_at`]
    /// or, failing that, by the first append.
    pub fn new(retention: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            retention: retention.max(1),
            floor: None,
        }
    }

    /// Empty log for a sink resuming from a persisted cursor at `block`.
    ///
    /// Messages published before the restart are unknown, so rollbacks below
    /// `block` cannot be compensated.
    pub fn resumed_from(retention: usize, block: u64) -> Self {
        Self {
            floor: Some(block),
            ..Self::new(retention)
        }
    }

    /// Vouch for every block above `block` on a fresh start, published or
    /// not. No-op once the floor is set.
    pub fn start_at(&mut self, block: u64) {
        if self.floor.is_none() {
            self.floor = Some(block);
        }
    }

    /// Record the acknowledged messages of a block.
    ///
    /// Entries must be appended in increasing block order.
    pub fn append(&mut self, position: Position, messages: Vec<MessageId>) {
        if self.floor.is_none() {
            self.floor = Some(position.number.saturating_sub(1));
        }

        debug_assert!(
            self.entries
                .back()
                .map_or(true, |last| last.position.number < position.number),
            "undo log entries must be appended in block order"
        );

        self.entries.push_back(UndoLogEntry { position, messages });

        while self.entries.len() > self.retention {
            if let Some(evicted) = self.entries.pop_front() {
                debug!(
                    block = evicted.position.number,
                    retention = self.retention,
                    "Evicted undo log entry"
                );
                self.raise_floor(evicted.position.number);
            }
        }
    }

    /// Entries strictly after `position`, in ascending order.
    pub fn entries_after(&self, position: &Position) -> impl Iterator<Item = &UndoLogEntry> {
        let number = position.number;
        self.entries
            .iter()
            .filter(move |entry| entry.position.number > number)
    }

    /// Remove entries strictly after `position`, most recent first.
    pub fn take_after(&mut self, position: &Position) -> Vec<UndoLogEntry> {
        let mut taken = Vec::new();
        while self
            .entries
            .back()
            .is_some_and(|entry| entry.position.number > position.number)
        {
            if let Some(entry) = self.entries.pop_back() {
                taken.push(entry);
            }
        }
        taken
    }

    /// Discard entries at or below `block`. Returns how many were removed.
    pub fn prune_up_to(&mut self, block: u64) -> usize {
        let mut pruned = 0;
        while self
            .entries
            .front()
            .is_some_and(|entry| entry.position.number <= block)
        {
            self.entries.pop_front();
            pruned += 1;
        }
        if pruned > 0 || self.floor.is_some() {
            self.raise_floor(block);
        }
        pruned
    }

    /// Whether a rollback to `last_valid` can be fully compensated.
    pub fn covers(&self, last_valid: u64) -> bool {
        self.floor.map_or(true, |floor| floor <= last_valid)
    }

    /// Highest block the log can no longer vouch for.
    pub fn floor(&self) -> Option<u64> {
        self.floor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn raise_floor(&mut self, block: u64) {
        self.floor = Some(self.floor.map_or(block, |floor| floor.max(block)));
    }
}

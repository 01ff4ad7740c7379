//! Message bus seam.
//!
//! The sink only needs one operation from the bus: publish a keyed message
//! and report the transport id once the broker acknowledges it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::errors::BusError;

pub const HEADER_ACTION: &str = "sink-action";
pub const HEADER_BLOCK_NUMBER: &str = "block-number";
pub const HEADER_BLOCK_ID: &str = "block-id";
pub const HEADER_BLOCK_FINAL: &str = "block-final";
pub const HEADER_BLOCK_LIVE: &str = "block-live";

pub const ACTION_PUBLISH: &str = "publish";
pub const ACTION_RETRACT: &str = "retract";
pub const ACTION_INVALIDATE: &str = "invalidate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: String,
    /// `None` publishes a tombstone.
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<(String, String)>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Option<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.headers.push((name.into(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message and wait for the broker acknowledgment.
    ///
    /// Returns the transport-assigned id of the stored message.
    async fn publish(&self, message: &OutboundMessage) -> Result<String, BusError>;

    /// Flush pending messages and release the connection.
    async fn close(&self) -> Result<(), BusError> {
        Ok(())
    }
}

// =============================================================================
// Mock bus
// =============================================================================

#[derive(Default)]
struct MockBusState {
    acked: Vec<OutboundMessage>,
    attempts: HashMap<String, usize>,
    scripted: HashMap<String, VecDeque<BusError>>,
    next_offset: u64,
    in_flight: usize,
    peak_in_flight: usize,
    closed: bool,
}

/// In-memory bus for tests and dry runs.
///
/// Failures can be scripted per message key; acknowledgments can be held back
/// with [`MockBus::hold_acks`] to observe in-flight behaviour.
#[derive(Clone)]
pub struct MockBus {
    state: Arc<Mutex<MockBusState>>,
    gate: Arc<watch::Sender<bool>>,
}

impl MockBus {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Arc::new(Mutex::new(MockBusState::default())),
            gate: Arc::new(gate),
        }
    }

    /// Fail the next publishes of `key` with `errors`, in order.
    pub fn fail_next(&self, key: &str, errors: impl IntoIterator<Item = BusError>) {
        let mut state = self.state.lock().unwrap();
        state
            .scripted
            .entry(key.to_string())
            .or_default()
            .extend(errors);
    }

    /// Fail the next `times` publishes of `key` with a retryable error.
    pub fn fail_transient(&self, key: &str, times: usize) {
        self.fail_next(
            key,
            (0..times).map(|_| BusError::retryable("broker unavailable")),
        );
    }

    /// Block acknowledgments until [`MockBus::release_acks`].
    pub fn hold_acks(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_acks(&self) {
        self.gate.send_replace(true);
    }

    /// Acknowledged messages, in acknowledgment order.
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.state.lock().unwrap().acked.clone()
    }

    pub fn published_keys(&self) -> Vec<String> {
        self.published().into_iter().map(|m| m.key).collect()
    }

    /// Publish attempts made for `key`, failed ones included.
    pub fn attempts(&self, key: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .attempts
            .get(key)
            .copied()
            .unwrap_or_default()
    }

    /// Highest number of concurrent publish calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().unwrap().peak_in_flight
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for MockBus {
    async fn publish(&self, message: &OutboundMessage) -> Result<String, BusError> {
        {
            let mut state = self.state.lock().unwrap();
            *state.attempts.entry(message.key.clone()).or_default() += 1;
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
        }

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;

        if let Some(error) = state
            .scripted
            .get_mut(&message.key)
            .and_then(|queue| queue.pop_front())
        {
            return Err(error);
        }

        let offset = state.next_offset;
        state.next_offset += 1;
        state.acked.push(message.clone());
        Ok(format!("0:{}", offset))
    }

    async fn close(&self) -> Result<(), BusError> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

//! Publisher adapter: retries, acknowledgment tracking and backpressure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use crate::bus::{MessageBus, OutboundMessage};
use crate::errors::{BusError, SinkError};
use crate::types::{MessageId, Position};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Delay unit; the n-th retry waits about `base_delay * 2^n`.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn delays(&self) -> impl Iterator<Item = Duration> {
        let factor = u64::try_from(self.base_delay.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);

        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .map(jitter)
            .take(self.max_retries)
    }
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub position: Position,
    pub message: OutboundMessage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishAck {
    pub position: Position,
    pub id: MessageId,
}

/// Publishes through a [`MessageBus`] with at most `window` publishes in
/// flight.
pub struct Publisher {
    bus: Arc<dyn MessageBus>,
    retry: RetryPolicy,
    window: usize,
    in_flight: JoinSet<Result<PublishAck, SinkError>>,
}

impl Publisher {
    pub fn new(bus: Arc<dyn MessageBus>, window: usize, retry: RetryPolicy) -> Self {
        Self {
            bus,
            retry,
            window: window.max(1),
            in_flight: JoinSet::new(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Start a publish in the background.
    ///
    /// While the window is full this waits for publishes to complete; the
    /// acknowledgments reaped while waiting are returned.
    pub async fn submit(&mut self, request: PublishRequest) -> Result<Vec<PublishAck>, SinkError> {
        let mut reaped = Vec::new();

        while self.in_flight.len() >= self.window {
            debug!(
                in_flight = self.in_flight.len(),
                window = self.window,
                "Publish window full, waiting for acks"
            );
            match self.next_completion().await {
                Some(result) => reaped.push(result?),
                None => break,
            }
        }

        let bus = self.bus.clone();
        let retry = self.retry.clone();
        self.in_flight
            .spawn(async move { publish_with_retry(bus.as_ref(), &retry, request).await });

        Ok(reaped)
    }

    /// Next finished background publish, `None` when nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<Result<PublishAck, SinkError>> {
        let joined = self.in_flight.join_next().await?;
        Some(joined.unwrap_or_else(|err| Err(SinkError::PublishTask(err.to_string()))))
    }

    /// Wait for every background publish.
    ///
    /// Stops at the first failure and abandons whatever is still in flight.
    pub async fn drain(&mut self) -> Result<Vec<PublishAck>, SinkError> {
        let mut acks = Vec::with_capacity(self.in_flight.len());

        while let Some(result) = self.next_completion().await {
            match result {
                Ok(ack) => acks.push(ack),
                Err(err) => {
                    self.abort();
                    return Err(err);
                }
            }
        }

        Ok(acks)
    }

    /// Publish and wait for the acknowledgment.
    pub async fn publish(&self, request: PublishRequest) -> Result<PublishAck, SinkError> {
        publish_with_retry(self.bus.as_ref(), &self.retry, request).await
    }

    /// Abandon every background publish.
    pub fn abort(&mut self) {
        if !self.in_flight.is_empty() {
            warn!(abandoned = self.in_flight.len(), "Abandoning in-flight publishes");
        }
        self.in_flight.abort_all();
        self.in_flight.detach_all();
    }

    /// Release the bus.
    pub async fn close(&self) -> Result<(), BusError> {
        self.bus.close().await
    }
}

async fn publish_with_retry(
    bus: &dyn MessageBus,
    retry: &RetryPolicy,
    request: PublishRequest,
) -> Result<PublishAck, SinkError> {
    let attempts = AtomicUsize::new(0);
    let message = &request.message;

    let result = RetryIf::start(
        retry.delays(),
        || {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            async move {
                let result = bus.publish(message).await;
                if let Err(BusError::Retryable(reason)) = &result {
                    warn!(
                        key = %message.key,
                        attempt,
                        reason = %reason,
                        "Transient publish failure"
                    );
                }
                result
            }
        },
        |err: &BusError| err.is_retryable(),
    )
    .await;

    match result {
        Ok(transport_id) => Ok(PublishAck {
            id: MessageId {
                key: message.key.clone(),
                transport_id,
            },
            position: request.position,
        }),
        Err(BusError::Retryable(reason)) => Err(SinkError::RetryCeilingExceeded {
            position: request.position,
            attempts: attempts.load(Ordering::Relaxed),
            reason,
        }),
        Err(BusError::Fatal(reason)) => Err(SinkError::PermanentReject {
            position: request.position,
            reason,
        }),
    }
}

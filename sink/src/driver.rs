//! Sink driver: the state machine that ties the sink together.
//!
//! Data records are published through the [`Publisher`]; the cursor only
//! advances over blocks whose publishes are all acknowledged. An undo signal
//! switches the driver into [`DriverState::Compensating`] until every
//! retracted message has been compensated and the cursor moved back to the
//! last valid block.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures03::{Stream, StreamExt};
use tokio::time::{interval_at, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::bus::{
    MessageBus, OutboundMessage, ACTION_PUBLISH, HEADER_ACTION, HEADER_BLOCK_FINAL,
    HEADER_BLOCK_ID, HEADER_BLOCK_LIVE, HEADER_BLOCK_NUMBER,
};
use crate::cursor::{CursorKey, CursorStore};
use crate::errors::SinkError;
use crate::publisher::{PublishAck, PublishRequest, Publisher, RetryPolicy};
use crate::rollback::{CompensationStrategy, RollbackResolver};
use crate::types::{Cursor, DataRecord, Position, SinkEvent, UndoSignal};
use crate::undo_log::UndoLog;
use crate::watermark::AckWatermark;

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Destination topic for every message.
    pub topic: String,
    pub compensation: CompensationStrategy,
    /// Publishes allowed in flight at once.
    pub publish_concurrency: usize,
    pub retry: RetryPolicy,
    /// Blocks of publish history kept for compensation.
    pub undo_retention: usize,
    /// Do not publish blocks whose module produced no output.
    pub skip_empty_output: bool,
    /// How long in-flight publishes may take to finish on shutdown.
    pub shutdown_timeout: Duration,
    pub progress_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            topic: "substreams".to_string(),
            compensation: CompensationStrategy::default(),
            publish_concurrency: 16,
            retry: RetryPolicy::default(),
            undo_retention: 1000,
            skip_empty_output: true,
            shutdown_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    Active,
    /// Retracting everything after `last_valid`; data is refused.
    Compensating { last_valid: Position },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Data records accepted.
    pub processed: u64,
    /// Data messages acknowledged by the bus.
    pub published: u64,
    /// Compensating messages acknowledged by the bus.
    pub compensated: u64,
    /// Records not published because their output was empty.
    pub skipped_empty: u64,
    /// Redelivered records that were ignored.
    pub duplicates: u64,
    pub undo_signals: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The upstream stream ended (bounded block range).
    StreamEnded,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub stop: StopReason,
    pub stats: DriverStats,
    /// Last durably committed cursor.
    pub cursor: Option<Cursor>,
}

pub struct SinkDriver {
    config: DriverConfig,
    key: CursorKey,
    cursor_store: Arc<dyn CursorStore>,
    publisher: Publisher,
    resolver: RollbackResolver,
    undo_log: UndoLog,
    watermark: AckWatermark,
    state: DriverState,
    last_accepted: Option<u64>,
    final_block_height: u64,
    committed: Option<Cursor>,
    stats: DriverStats,
}

impl SinkDriver {
    /// Load the persisted cursor for `key` and build a driver resuming from
    /// it.
    pub async fn start(
        config: DriverConfig,
        key: CursorKey,
        cursor_store: Arc<dyn CursorStore>,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Self, SinkError> {
        let committed = cursor_store.load(&key).await?;

        let undo_log = match &committed {
            Some(cursor) => {
                info!(
                    key = %key,
                    block = cursor.position.number,
                    "Resuming from persisted cursor"
                );
                UndoLog::resumed_from(config.undo_retention, cursor.position.number)
            }
            None => {
                info!(key = %key, "No persisted cursor, starting fresh");
                UndoLog::new(config.undo_retention)
            }
        };

        let publisher = Publisher::new(bus, config.publish_concurrency, config.retry.clone());

        Ok(Self {
            last_accepted: committed.as_ref().map(|c| c.position.number),
            config,
            key,
            cursor_store,
            publisher,
            resolver: RollbackResolver,
            undo_log,
            watermark: AckWatermark::new(),
            state: DriverState::Active,
            final_block_height: 0,
            committed,
            stats: DriverStats::default(),
        })
    }

    pub fn state(&self) -> &DriverState {
        &self.state
    }

    /// Last durably committed cursor.
    pub fn committed_cursor(&self) -> Option<&Cursor> {
        self.committed.as_ref()
    }

    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    pub fn in_flight(&self) -> usize {
        self.publisher.in_flight()
    }

    pub fn undo_log(&self) -> &UndoLog {
        &self.undo_log
    }

    /// Handle one upstream event.
    ///
    /// Data publishes complete in the background; call [`SinkDriver::flush`]
    /// or [`SinkDriver::run`] to wait for them.
    pub async fn process(&mut self, event: SinkEvent) -> Result<(), SinkError> {
        match event {
            SinkEvent::Data(record) => self.handle_data(record).await,
            SinkEvent::Undo(undo) => self.handle_undo(undo).await,
        }
    }

    /// Wait for every in-flight publish and commit the resulting cursor.
    pub async fn flush(&mut self) -> Result<(), SinkError> {
        for ack in self.publisher.drain().await? {
            self.on_ack(ack);
        }
        self.advance().await
    }

    /// Consume `events` until the stream ends, `shutdown` resolves, or an
    /// error occurs.
    ///
    /// The message bus is closed before returning, whatever the outcome.
    #[instrument(skip_all, fields(key = %self.key))]
    pub async fn run<S, F>(&mut self, mut events: S, shutdown: F) -> Result<RunSummary, SinkError>
    where
        S: Stream<Item = Result<SinkEvent, SinkError>> + Unpin,
        F: Future<Output = ()>,
    {
        info!(
            topic = %self.config.topic,
            concurrency = self.publisher.window(),
            "Starting sink"
        );

        let outcome = match self.run_loop(&mut events, shutdown).await {
            Ok(stop) => self.finish(stop).await,
            Err(err) => Err(err),
        };

        if outcome.is_err() {
            self.publisher.abort();
        }
        if let Err(err) = self.publisher.close().await {
            warn!(error = %err, "Failed to close message bus");
        }

        outcome
    }

    async fn run_loop<S, F>(&mut self, events: &mut S, shutdown: F) -> Result<StopReason, SinkError>
    where
        S: Stream<Item = Result<SinkEvent, SinkError>> + Unpin,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let period = self.config.progress_interval;
        let mut progress_timer = interval_at(Instant::now() + period, period);
        progress_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Received shutdown signal");
                    return Ok(StopReason::Shutdown);
                }
                completion = self.publisher.next_completion(), if self.publisher.in_flight() > 0 => {
                    if let Some(result) = completion {
                        self.on_ack(result?);
                        self.advance().await?;
                    }
                }
                event = events.next() => match event {
                    Some(Ok(event)) => self.process(event).await?,
                    Some(Err(err)) => return Err(err),
                    None => {
                        info!("Stream consumed");
                        return Ok(StopReason::StreamEnded);
                    }
                },
                _ = progress_timer.tick() => self.log_progress(),
            }
        }
    }

    /// A finished stream waits for every publish so that success means the
    /// whole range was delivered; a shutdown waits at most
    /// `shutdown_timeout` and leaves the rest to be redelivered.
    async fn finish(&mut self, stop: StopReason) -> Result<RunSummary, SinkError> {
        match stop {
            StopReason::StreamEnded => {
                for ack in self.publisher.drain().await? {
                    self.on_ack(ack);
                }
            }
            StopReason::Shutdown => self.drain_until_deadline().await?,
        }

        self.advance().await?;
        self.log_progress();

        Ok(RunSummary {
            stop,
            stats: self.stats.clone(),
            cursor: self.committed.clone(),
        })
    }

    async fn drain_until_deadline(&mut self) -> Result<(), SinkError> {
        let deadline = Instant::now() + self.config.shutdown_timeout;

        while self.publisher.in_flight() > 0 {
            match timeout_at(deadline, self.publisher.next_completion()).await {
                Ok(Some(result)) => self.on_ack(result?),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        timeout_secs = self.config.shutdown_timeout.as_secs(),
                        "Shutdown timeout reached, remaining publishes will be redelivered"
                    );
                    self.publisher.abort();
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_data(&mut self, record: DataRecord) -> Result<(), SinkError> {
        if let DriverState::Compensating { .. } = self.state {
            return Err(SinkError::Compensating(record.position));
        }

        if let Some(last) = self.last_accepted {
            if record.position.number <= last {
                warn!(
                    block = record.position.number,
                    last_accepted = last,
                    "Skipping redelivered block"
                );
                self.stats.duplicates += 1;
                return Ok(());
            }
        }

        if self.last_accepted.is_none() {
            self.undo_log
                .start_at(record.position.number.saturating_sub(1));
        }
        self.last_accepted = Some(record.position.number);
        self.stats.processed += 1;

        let cursor = record.resume_cursor();

        if record.payload.is_empty() && self.config.skip_empty_output {
            debug!(block = record.position.number, "Empty module output, not publishing");
            self.stats.skipped_empty += 1;
            self.watermark.track(cursor, record.final_block_height, 0);
            return self.advance().await;
        }

        self.watermark.track(cursor, record.final_block_height, 1);

        let request = PublishRequest {
            position: record.position.clone(),
            message: self.data_message(record),
        };

        for ack in self.publisher.submit(request).await? {
            self.on_ack(ack);
        }

        self.advance().await
    }

    async fn handle_undo(&mut self, undo: UndoSignal) -> Result<(), SinkError> {
        let last_valid = undo.last_valid_position.clone();
        info!(
            last_valid = last_valid.number,
            in_flight = self.publisher.in_flight(),
            "Undo signal received, compensating"
        );

        self.stats.undo_signals += 1;
        self.state = DriverState::Compensating {
            last_valid: last_valid.clone(),
        };

        for ack in self.publisher.drain().await? {
            self.on_ack(ack);
        }
        // Record everything acknowledged so far without committing a cursor
        // on the retracted branch.
        self.release();

        let actions = self.resolver.resolve(&undo, &mut self.undo_log)?;

        for action in &actions {
            let message =
                self.config
                    .compensation
                    .message(&self.config.topic, action, &last_valid)?;
            self.publisher
                .publish(PublishRequest {
                    position: action.position.clone(),
                    message,
                })
                .await?;
            self.stats.compensated += 1;
            debug!(block = action.position.number, key = %action.message.key, "Compensated");
        }

        self.commit(undo.resume_cursor()).await?;
        self.last_accepted = Some(last_valid.number);
        self.state = DriverState::Active;

        info!(
            last_valid = last_valid.number,
            compensated = actions.len(),
            "Rollback complete"
        );
        Ok(())
    }

    fn data_message(&self, record: DataRecord) -> OutboundMessage {
        let position = record.position;
        OutboundMessage::new(&self.config.topic, position.message_key(), Some(record.payload))
            .with_header(HEADER_ACTION, ACTION_PUBLISH)
            .with_header(HEADER_BLOCK_NUMBER, position.number)
            .with_header(HEADER_BLOCK_ID, &position.id)
            .with_header(HEADER_BLOCK_FINAL, position.is_final)
            .with_header(HEADER_BLOCK_LIVE, record.is_live)
    }

    fn on_ack(&mut self, ack: PublishAck) {
        self.stats.published += 1;
        self.watermark.ack(ack.position.number, ack.id);
    }

    /// Move fully acknowledged blocks into the undo log; returns the cursor of
    /// the highest one.
    fn release(&mut self) -> Option<Cursor> {
        let mut highest = None;

        for released in self.watermark.release() {
            if !released.messages.is_empty() {
                self.undo_log
                    .append(released.cursor.position.clone(), released.messages);
            }
            self.final_block_height = self.final_block_height.max(released.final_block_height);
            highest = Some(released.cursor);
        }

        highest
    }

    async fn advance(&mut self) -> Result<(), SinkError> {
        match self.release() {
            Some(cursor) => self.commit(cursor).await,
            None => Ok(()),
        }
    }

    async fn commit(&mut self, cursor: Cursor) -> Result<(), SinkError> {
        self.cursor_store.save(&self.key, &cursor).await?;
        debug!(block = cursor.position.number, "Cursor committed");

        self.undo_log
            .prune_up_to(cursor.position.number.min(self.final_block_height));
        self.committed = Some(cursor);
        Ok(())
    }

    fn log_progress(&self) {
        info!(
            processed = self.stats.processed,
            published = self.stats.published,
            compensated = self.stats.compensated,
            skipped = self.stats.skipped_empty + self.stats.duplicates,
            in_flight = self.publisher.in_flight(),
            pending_from = self.watermark.lowest_unacknowledged(),
            undo_log = self.undo_log.len(),
            cursor = self.committed.as_ref().map(|c| c.position.number),
            "Sink progress"
        );
    }
}

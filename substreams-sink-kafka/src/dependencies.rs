//! Dependency initialization and wiring for the sink.

use std::pin::Pin;
use std::sync::Arc;

use futures03::Stream;
use tracing::info;

use sink::cursor::CursorStore;
use sink::driver::SinkDriver;
use sink::source::live_events;
use sink::{SinkError, SinkEvent};
use sink_kafka::{KafkaBus, ProducerConfig};
use stream::substreams::SubstreamsEndpoint;
use stream::substreams_stream::{StreamOptions, SubstreamsStream};
use stream::{read_block_range, read_package};

use crate::config::SinkConfig;
use crate::errors::AppError;

/// Default Kafka broker address.
const DEFAULT_KAFKA_BROKER: &str = "localhost:9092";

pub type EventStream = Pin<Box<dyn Stream<Item = Result<SinkEvent, SinkError>> + Send>>;

/// Container for all initialized dependencies.
pub struct Dependencies {
    pub driver: SinkDriver,
    pub events: EventStream,
}

impl Dependencies {
    /// Load the package, open the cursor store and the Kafka producer, and
    /// start the Substreams stream from the persisted cursor.
    pub async fn new(config: &SinkConfig) -> Result<Self, AppError> {
        info!(
            endpoint = %config.endpoint,
            package = %config.package,
            module = %config.output_module,
            topic = %config.full_topic(),
            cursor_store = %config.cursor_store,
            compensation = %config.compensation,
            "Initializing dependencies"
        );

        let package = read_package(&config.package).await?;
        let (start_block, stop_block) = read_block_range(
            &package,
            &config.output_module,
            config.block_range.as_deref(),
        )?;

        let cursor_store: Arc<dyn CursorStore> =
            Arc::from(config.cursor_store.clone().into_store().await?);

        let producer_config = ProducerConfig::from_env(DEFAULT_KAFKA_BROKER, config.client_id());
        let bus = Arc::new(
            KafkaBus::connect(&producer_config)?.with_flush_timeout(config.shutdown_timeout),
        );

        let driver = SinkDriver::start(
            config.driver_config(),
            config.cursor_key(),
            cursor_store,
            bus,
        )
        .await?;

        let cursor = driver.committed_cursor().map(|cursor| cursor.token.clone());
        info!(
            start_block,
            stop_block,
            resuming = cursor.is_some(),
            "Opening substreams stream"
        );

        let endpoint =
            Arc::new(SubstreamsEndpoint::new(&config.endpoint, config.api_token.clone()).await?);

        let stream = SubstreamsStream::new(
            endpoint,
            cursor,
            package.modules,
            config.output_module.clone(),
            start_block,
            stop_block,
            StreamOptions {
                final_blocks_only: config.final_blocks_only,
                production_mode: !config.development_mode,
                max_reconnects: config.max_reconnects,
            },
        );

        Ok(Self {
            driver,
            events: Box::pin(live_events(stream, config.live_block_threshold)),
        })
    }
}

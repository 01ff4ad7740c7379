#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sink::cursor::{CursorKey, MemoryCursorStore};
use sink::driver::{DriverConfig, SinkDriver};
use sink::publisher::RetryPolicy;
use sink::rollback::CompensationStrategy;
use sink::types::{Cursor, Position};
use sink::MockBus;

pub const TOPIC: &str = "test.events";

pub fn key() -> CursorKey {
    CursorKey::new("mock://substreams", "map_events")
}

pub fn config() -> DriverConfig {
    DriverConfig {
        topic: TOPIC.to_string(),
        compensation: CompensationStrategy::Tombstone,
        publish_concurrency: 4,
        retry: RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(20),
        },
        undo_retention: 100,
        skip_empty_output: true,
        shutdown_timeout: Duration::from_secs(5),
        progress_interval: Duration::from_secs(10),
    }
}

pub fn cursor_at(n: u64) -> Cursor {
    Cursor {
        position: Position::new(n, format!("block_{}", n)),
        token: format!("cursor_{}", n),
    }
}

pub struct Harness {
    pub bus: MockBus,
    pub store: Arc<MemoryCursorStore>,
    pub driver: SinkDriver,
}

impl Harness {
    pub async fn new(config: DriverConfig) -> Self {
        Self::with_store(config, MemoryCursorStore::new()).await
    }

    pub async fn resumed_at(config: DriverConfig, block: u64) -> Self {
        Self::with_store(config, MemoryCursorStore::with_cursor(&key(), cursor_at(block))).await
    }

    async fn with_store(config: DriverConfig, store: MemoryCursorStore) -> Self {
        let bus = MockBus::new();
        let store = Arc::new(store);
        let driver = SinkDriver::start(config, key(), store.clone(), Arc::new(bus.clone()))
            .await
            .unwrap();
        Self { bus, store, driver }
    }

    pub fn cursor_block(&self) -> Option<u64> {
        self.store.get(&key()).map(|c| c.position.number)
    }
}

pub fn never() -> std::future::Pending<()> {
    std::future::pending()
}

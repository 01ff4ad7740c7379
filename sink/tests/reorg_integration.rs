//! Reorg, restart and shutdown behaviour of the sink driver.

mod common;

use std::time::Duration;

use futures03::StreamExt;
use sink::bus::{ACTION_INVALIDATE, ACTION_PUBLISH, HEADER_ACTION, HEADER_BLOCK_ID};
use sink::publisher::RetryPolicy;
use sink::rollback::CompensationStrategy;
use sink::source::MockSource;
use sink::types::{DataRecord, Position, SinkEvent};
use sink::{BusError, DriverState, SinkError, StopReason};

use common::{config, never, Harness};

fn record(n: u64) -> SinkEvent {
    SinkEvent::Data(DataRecord {
        position: Position::new(n, format!("block_{}", n)),
        payload: vec![n as u8],
        is_live: true,
        cursor: format!("cursor_{}", n),
        final_block_height: 0,
        timestamp: 0,
    })
}

#[tokio::test]
async fn test_new_branch_is_published_after_compensations() {
    let mut harness = Harness::new(config()).await;
    let source = MockSource::builder(b"payload".to_vec())
        .blocks(100, 103)
        .undo_to(100)
        .on_branch("fork")
        .blocks(101, 103)
        .build();

    harness
        .driver
        .run(source.into_events(), never())
        .await
        .unwrap();

    let published = harness.bus.published();
    let actions: Vec<_> = published
        .iter()
        .map(|m| m.header(HEADER_ACTION).unwrap_or_default())
        .collect();

    // Three data, two retractions, then the fork's data: never interleaved.
    assert_eq!(&actions[3..5], &["retract", "retract"]);
    assert!(actions[5..].iter().all(|a| *a == ACTION_PUBLISH));
    assert_eq!(published.len(), 7);

    let cursor = harness.store.get(&common::key()).unwrap();
    assert_eq!(cursor.position, Position::new(102, "fork_102"));
    assert_eq!(harness.driver.state(), &DriverState::Active);
}

#[tokio::test]
async fn test_invalidation_strategy() {
    let mut harness = Harness::new(sink::DriverConfig {
        compensation: CompensationStrategy::Invalidation,
        ..config()
    })
    .await;
    let source = MockSource::builder(b"payload".to_vec())
        .blocks(100, 102)
        .undo_to(100)
        .build();

    harness
        .driver
        .run(source.into_events(), never())
        .await
        .unwrap();

    let published = harness.bus.published();
    let invalidation = published.last().unwrap();
    assert_eq!(invalidation.key, "101-block_101");
    assert_eq!(invalidation.header(HEADER_ACTION), Some(ACTION_INVALIDATE));
    assert_eq!(invalidation.header(HEADER_BLOCK_ID), Some("block_101"));

    let body: serde_json::Value =
        serde_json::from_slice(invalidation.payload.as_ref().unwrap()).unwrap();
    assert_eq!(body["retracted_key"], "101-block_101");
    assert_eq!(body["last_valid_block"], 100);
}

#[tokio::test]
async fn test_rollback_deeper_than_retention_is_a_gap() {
    let mut harness = Harness::new(sink::DriverConfig {
        undo_retention: 2,
        ..config()
    })
    .await;
    let source = MockSource::builder(b"payload".to_vec())
        .blocks(100, 104)
        .undo_to(100)
        .build();

    let err = harness
        .driver
        .run(source.into_events(), never())
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::UndoLogGap { last_valid: 100, .. }));
    // Nothing was retracted and the cursor never moved back.
    let published = harness.bus.published();
    assert_eq!(published.len(), 4);
    assert!(published.iter().all(|m| m.payload.is_some()));
    assert_ne!(harness.cursor_block(), Some(100));
}

#[tokio::test]
async fn test_rollback_at_retention_boundary_succeeds() {
    let mut harness = Harness::new(sink::DriverConfig {
        undo_retention: 3,
        ..config()
    })
    .await;
    let source = MockSource::builder(b"payload".to_vec())
        .blocks(100, 104)
        .undo_to(100)
        .build();

    let summary = harness
        .driver
        .run(source.into_events(), never())
        .await
        .unwrap();

    assert_eq!(summary.stats.compensated, 3);
    assert_eq!(harness.cursor_block(), Some(100));
}

#[tokio::test]
async fn test_rollback_below_resumed_cursor_is_a_gap() {
    let mut harness = Harness::resumed_at(config(), 102).await;
    let source = MockSource::builder(b"payload".to_vec())
        .undo_to(100)
        .build();

    let err = harness
        .driver
        .run(source.into_events(), never())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SinkError::UndoLogGap {
            last_valid: 100,
            retained_after: 102
        }
    ));
    assert_eq!(harness.cursor_block(), Some(102));
}

#[tokio::test]
async fn test_redelivered_blocks_produce_identical_keys() {
    let source = MockSource::builder(b"payload".to_vec()).with_blocks(100, 105);

    let mut first = Harness::new(config()).await;
    first
        .driver
        .run(source.clone().into_events(), never())
        .await
        .unwrap();

    let mut second = Harness::new(config()).await;
    second
        .driver
        .run(source.into_events(), never())
        .await
        .unwrap();

    let mut first_keys = first.bus.published_keys();
    let mut second_keys = second.bus.published_keys();
    first_keys.sort();
    second_keys.sort();
    assert_eq!(first_keys, second_keys);
}

#[tokio::test]
async fn test_resumed_driver_skips_blocks_behind_cursor() {
    let mut harness = Harness::resumed_at(config(), 101).await;
    let source = MockSource::builder(b"payload".to_vec()).with_blocks(100, 104);

    let summary = harness
        .driver
        .run(source.into_events(), never())
        .await
        .unwrap();

    assert_eq!(summary.stats.duplicates, 2);
    assert_eq!(
        harness.bus.published_keys().len(),
        2,
        "only blocks 102 and 103 are new"
    );
    assert_eq!(harness.cursor_block(), Some(103));
}

#[tokio::test]
async fn test_empty_blocks_move_cursor_without_messages() {
    let mut harness = Harness::new(config()).await;
    let source = MockSource::builder(b"payload".to_vec())
        .blocks(100, 101)
        .empty_block(101)
        .empty_block(102)
        .build();

    let summary = harness
        .driver
        .run(source.into_events(), never())
        .await
        .unwrap();

    assert_eq!(summary.stats.skipped_empty, 2);
    assert_eq!(harness.bus.published().len(), 1);
    assert_eq!(harness.cursor_block(), Some(102));
}

#[tokio::test]
async fn test_rollback_into_leading_empty_blocks() {
    let mut harness = Harness::new(config()).await;
    let source = MockSource::builder(b"payload".to_vec())
        .empty_block(100)
        .empty_block(101)
        .empty_block(102)
        .blocks(103, 104)
        .undo_to(101)
        .build();

    let summary = harness
        .driver
        .run(source.into_events(), never())
        .await
        .unwrap();

    assert_eq!(summary.stats.compensated, 1);
    let published = harness.bus.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[1].key, "103-block_103");
    assert!(published[1].payload.is_none());
    assert_eq!(harness.cursor_block(), Some(101));
}

#[tokio::test]
async fn test_in_flight_window_bounds_publishes() {
    let mut harness = Harness::new(config()).await;
    harness.bus.hold_acks();

    for n in 1..=4 {
        harness.driver.process(record(n)).await.unwrap();
    }
    assert_eq!(harness.driver.in_flight(), 4);
    assert_eq!(harness.cursor_block(), None);

    let mut driver = harness.driver;
    let blocked = tokio::spawn(async move {
        driver.process(record(5)).await.unwrap();
        driver
    });

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!blocked.is_finished());

    harness.bus.release_acks();
    let mut driver = blocked.await.unwrap();
    driver.flush().await.unwrap();

    assert!(harness.bus.peak_in_flight() <= 4);
    assert_eq!(harness.bus.published().len(), 5);
    assert_eq!(harness.store.get(&common::key()).unwrap().position.number, 5);
}

#[tokio::test]
async fn test_permanent_reject_is_fatal() {
    let mut harness = Harness::new(config()).await;
    harness
        .bus
        .fail_next("101-block_101", [BusError::fatal("message too large")]);
    let source = MockSource::builder(b"payload".to_vec()).with_blocks(100, 103);

    let err = harness
        .driver
        .run(source.into_events(), never())
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::PermanentReject { .. }));
    assert_eq!(harness.bus.attempts("101-block_101"), 1);
    // 100 may or may not have been committed, but nothing past the rejected
    // block ever is.
    assert!(harness.cursor_block().map_or(true, |block| block < 101));
    assert!(harness.bus.is_closed());
}

#[tokio::test]
async fn test_upstream_error_halts_and_closes_bus() {
    let mut harness = Harness::new(config()).await;
    let events = MockSource::builder(b"payload".to_vec())
        .single_block(100)
        .into_events()
        .chain(futures03::stream::iter(vec![Err(SinkError::upstream(
            "connection reset",
        ))]));

    let err = harness.driver.run(events, never()).await.unwrap_err();

    assert!(matches!(err, SinkError::UpstreamStream(_)));
    assert!(harness.bus.is_closed());
}

#[tokio::test]
async fn test_shutdown_signal_stops_cleanly() {
    let mut harness = Harness::new(config()).await;
    let source = MockSource::builder(b"payload".to_vec()).with_blocks(100, 103);

    let summary = harness
        .driver
        .run(source.into_events(), std::future::ready(()))
        .await
        .unwrap();

    assert_eq!(summary.stop, StopReason::Shutdown);
    assert_eq!(summary.stats.processed, 0);
    assert!(harness.bus.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_unacknowledged_publishes() {
    let mut harness = Harness::new(config()).await;
    harness.bus.hold_acks();
    let events = MockSource::builder(b"payload".to_vec())
        .with_blocks(100, 103)
        .into_events()
        .chain(futures03::stream::pending());

    let summary = harness
        .driver
        .run(events, tokio::time::sleep(Duration::from_secs(1)))
        .await
        .unwrap();

    assert_eq!(summary.stop, StopReason::Shutdown);
    assert_eq!(summary.stats.processed, 3);
    assert_eq!(summary.cursor, None);
    assert_eq!(harness.cursor_block(), None);
    assert!(harness.bus.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stream_end_waits_for_retrying_publishes() {
    let mut harness = Harness::new(sink::DriverConfig {
        shutdown_timeout: Duration::from_millis(10),
        retry: RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        },
        ..config()
    })
    .await;
    harness.bus.fail_transient("102-block_102", 3);
    let source = MockSource::builder(b"payload".to_vec()).with_blocks(100, 103);

    let summary = harness
        .driver
        .run(source.into_events(), never())
        .await
        .unwrap();

    assert_eq!(summary.stop, StopReason::StreamEnded);
    assert_eq!(harness.bus.attempts("102-block_102"), 4);
    assert_eq!(harness.cursor_block(), Some(102));
    assert_eq!(summary.cursor.map(|c| c.position.number), Some(102));
}

#[tokio::test(start_paused = true)]
async fn test_stream_end_with_undeliverable_block_fails() {
    let mut harness = Harness::new(sink::DriverConfig {
        shutdown_timeout: Duration::from_millis(10),
        ..config()
    })
    .await;
    harness.bus.fail_transient("102-block_102", 10);
    let source = MockSource::builder(b"payload".to_vec()).with_blocks(100, 103);

    let err = harness
        .driver
        .run(source.into_events(), never())
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::RetryCeilingExceeded { attempts: 6, .. }));
    assert!(harness.cursor_block().map_or(true, |block| block < 102));
    assert!(harness.bus.is_closed());
}

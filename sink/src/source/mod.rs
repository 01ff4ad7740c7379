//! Upstream event sources.
//!
//! Turns Substreams responses into [`SinkEvent`]s, either from a live
//! endpoint or from generated mock blocks.

mod mock;

use std::time::Duration;

use futures03::{Stream, StreamExt};
use stream::{
    pb::sf::substreams::rpc::v2::{BlockScopedData, BlockUndoSignal},
    substreams_stream::{BlockResponse, SubstreamsStream},
    utils,
};
use tracing::trace;

pub use mock::{MockSource, MockSourceBuilder};

use crate::errors::SinkError;
use crate::types::{DataRecord, Position, SinkEvent, UndoSignal};

/// Default age under which a block counts as live.
pub const DEFAULT_LIVE_THRESHOLD: Duration = Duration::from_secs(60);

pub fn data_record(
    block: &BlockScopedData,
    live_threshold: Duration,
) -> Result<DataRecord, SinkError> {
    let meta = utils::block_metadata(block).ok_or_else(|| {
        SinkError::invalid_block(format!("block without clock (cursor {})", block.cursor))
    })?;

    let drift = utils::drift_seconds(&meta);
    let is_live = drift <= live_threshold.as_secs() as i64;
    let is_final = meta.block_number <= meta.final_block_height;
    let payload = utils::output(block)
        .map(|any| any.value.clone())
        .unwrap_or_default();

    trace!(
        block = meta.block_number,
        drift = %utils::format_drift(&meta),
        bytes = payload.len(),
        "Block received"
    );

    Ok(DataRecord {
        position: Position::new(meta.block_number, meta.block_id).finalized(is_final),
        payload,
        is_live,
        cursor: meta.cursor,
        final_block_height: meta.final_block_height,
        timestamp: meta.timestamp,
    })
}

pub fn undo_signal(undo: &BlockUndoSignal) -> Result<UndoSignal, SinkError> {
    let block = undo.last_valid_block.as_ref().ok_or_else(|| {
        SinkError::invalid_block("undo signal without last valid block")
    })?;

    Ok(UndoSignal {
        last_valid_position: Position::new(block.number, block.id.clone()),
        last_valid_cursor: undo.last_valid_cursor.clone(),
    })
}

pub fn sink_event(response: &BlockResponse, live_threshold: Duration) -> Result<SinkEvent, SinkError> {
    match response {
        BlockResponse::New(block) => data_record(block, live_threshold).map(SinkEvent::Data),
        BlockResponse::Undo(undo) => undo_signal(undo).map(SinkEvent::Undo),
    }
}

/// Adapt a live Substreams stream into sink events.
pub fn live_events(
    stream: SubstreamsStream,
    live_threshold: Duration,
) -> impl Stream<Item = Result<SinkEvent, SinkError>> + Send + Unpin {
    stream.map(move |response| match response {
        Ok(response) => sink_event(&response, live_threshold),
        Err(err) => Err(SinkError::upstream(format!("{:#}", err))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream::pb::sf::substreams::{
        rpc::v2::MapModuleOutput,
        v1::{BlockRef, Clock},
    };

    fn block(number: u64, final_block_height: u64, output: Option<Vec<u8>>) -> BlockScopedData {
        BlockScopedData {
            output: output.map(|value| MapModuleOutput {
                name: "map_events".to_string(),
                map_output: Some(prost_types::Any {
                    type_url: "type.googleapis.com/events.Events".to_string(),
                    value,
                }),
            }),
            clock: Some(Clock {
                id: format!("block_{}", number),
                number,
                timestamp: Some(prost_types::Timestamp {
                    seconds: 1_600_000_000,
                    nanos: 0,
                }),
            }),
            cursor: format!("cursor_{}", number),
            final_block_height,
        }
    }

    #[test]
    fn test_data_record_from_block() {
        let record = data_record(&block(100, 90, Some(vec![1, 2])), DEFAULT_LIVE_THRESHOLD).unwrap();

        assert_eq!(record.position, Position::new(100, "block_100"));
        assert!(!record.position.is_final);
        assert_eq!(record.payload, vec![1, 2]);
        assert_eq!(record.cursor, "cursor_100");
        assert_eq!(record.final_block_height, 90);
        assert!(!record.is_live);
    }

    #[test]
    fn test_final_block_and_missing_output() {
        let record = data_record(&block(100, 100, None), DEFAULT_LIVE_THRESHOLD).unwrap();
        assert!(record.position.is_final);
        assert!(record.payload.is_empty());
    }

    #[test]
    fn test_block_without_clock_is_invalid() {
        let mut data = block(1, 0, None);
        data.clock = None;
        assert!(matches!(
            data_record(&data, DEFAULT_LIVE_THRESHOLD),
            Err(SinkError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_undo_signal() {
        let undo = BlockUndoSignal {
            last_valid_block: Some(BlockRef {
                id: "block_100".to_string(),
                number: 100,
            }),
            last_valid_cursor: "cursor_100".to_string(),
        };
        let signal = undo_signal(&undo).unwrap();
        assert_eq!(signal.last_valid_position, Position::new(100, "block_100"));
        assert_eq!(signal.last_valid_cursor, "cursor_100");

        let missing = BlockUndoSignal {
            last_valid_block: None,
            last_valid_cursor: String::new(),
        };
        assert!(undo_signal(&missing).is_err());
    }
}

//! Mock upstream for testing the sink.
//!
//! # Example
//!
//! ```ignore
//! use sink::source::MockSource;
//!
//! // Blocks 100..103, then a reorg back to 100 and a replacement branch.
//! let source = MockSource::builder(b"payload".to_vec())
//!     .blocks(100, 103)
//!     .undo_to(100)
//!     .on_branch("fork")
//!     .blocks(101, 104)
//!     .build();
//!
//! driver.run(source.into_events(), shutdown).await?;
//! ```

use std::collections::HashMap;

use futures03::Stream;
use prost_types::Timestamp;
use stream::{
    pb::sf::substreams::{
        rpc::v2::{BlockScopedData, BlockUndoSignal, MapModuleOutput},
        v1::{BlockRef, Clock},
    },
    substreams_stream::BlockResponse,
};

use super::{sink_event, DEFAULT_LIVE_THRESHOLD};
use crate::errors::SinkError;
use crate::types::SinkEvent;

const MODULE_NAME: &str = "map_events";

/// Blocks stay this far behind the head of the mock chain before they are
/// final.
pub const DEFAULT_FINALITY_LAG: u64 = 10;

/// Scripted sequence of upstream responses.
#[derive(Debug, Clone)]
pub struct MockSource {
    responses: Vec<BlockResponse>,
}

impl MockSource {
    /// Create a builder whose blocks carry `output` as module output.
    pub fn builder(output: Vec<u8>) -> MockSourceBuilder {
        MockSourceBuilder {
            output,
            branch: "block".to_string(),
            finality_lag: DEFAULT_FINALITY_LAG,
            ids: HashMap::new(),
            responses: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Convert into the event stream consumed by the driver.
    pub fn into_events(self) -> impl Stream<Item = Result<SinkEvent, SinkError>> + Send + Unpin {
        let events: Vec<_> = self
            .responses
            .iter()
            .map(|response| sink_event(response, DEFAULT_LIVE_THRESHOLD))
            .collect();
        futures03::stream::iter(events)
    }
}

impl IntoIterator for MockSource {
    type Item = BlockResponse;
    type IntoIter = std::vec::IntoIter<BlockResponse>;

    fn into_iter(self) -> Self::IntoIter {
        self.responses.into_iter()
    }
}

pub struct MockSourceBuilder {
    output: Vec<u8>,
    branch: String,
    finality_lag: u64,
    ids: HashMap<u64, String>,
    responses: Vec<BlockResponse>,
}

impl MockSourceBuilder {
    /// Set how many blocks behind each block the final block height sits.
    pub fn with_finality_lag(mut self, lag: u64) -> Self {
        self.finality_lag = lag;
        self
    }

    /// Block ids generated from here on are `{branch}_{number}`.
    pub fn on_branch(mut self, branch: &str) -> Self {
        self.branch = branch.to_string();
        self
    }

    /// Append blocks for a range [start_block, end_block).
    pub fn blocks(mut self, start_block: u64, end_block: u64) -> Self {
        for number in start_block..end_block {
            let block = self.build_block(number, Some(self.output.clone()));
            self.responses.push(BlockResponse::New(block));
        }
        self
    }

    /// Append a block whose module produced no output.
    pub fn empty_block(mut self, number: u64) -> Self {
        let block = self.build_block(number, None);
        self.responses.push(BlockResponse::New(block));
        self
    }

    /// Append an undo signal back to `block_number`.
    pub fn undo_to(mut self, block_number: u64) -> Self {
        let id = self
            .ids
            .get(&block_number)
            .cloned()
            .unwrap_or_else(|| format!("{}_{}", self.branch, block_number));

        self.responses.push(BlockResponse::Undo(BlockUndoSignal {
            last_valid_block: Some(BlockRef {
                id,
                number: block_number,
            }),
            last_valid_cursor: format!("cursor_{}", block_number),
        }));
        self
    }

    pub fn build(self) -> MockSource {
        MockSource {
            responses: self.responses,
        }
    }

    /// Generate blocks for a range [start_block, end_block).
    pub fn with_blocks(self, start_block: u64, end_block: u64) -> MockSource {
        self.blocks(start_block, end_block).build()
    }

    pub fn single_block(self, block_number: u64) -> MockSource {
        self.with_blocks(block_number, block_number + 1)
    }

    fn build_block(&mut self, block_number: u64, output: Option<Vec<u8>>) -> BlockScopedData {
        let id = format!("{}_{}", self.branch, block_number);
        self.ids.insert(block_number, id.clone());

        BlockScopedData {
            cursor: format!("cursor_{}", block_number),
            final_block_height: block_number.saturating_sub(self.finality_lag),
            clock: Some(Clock {
                id,
                number: block_number,
                timestamp: Some(Timestamp {
                    seconds: (block_number * 12) as i64,
                    nanos: 0,
                }),
            }),
            output: output.map(|value| MapModuleOutput {
                name: MODULE_NAME.to_string(),
                map_output: Some(prost_types::Any {
                    type_url: String::new(),
                    value,
                }),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures03::StreamExt;

    #[test]
    fn test_iterates_blocks_in_order() {
        let blocks: Vec<_> = MockSource::builder(vec![1, 2, 3])
            .with_blocks(100, 103)
            .into_iter()
            .collect();

        assert_eq!(blocks.len(), 3);
        for (response, expected) in blocks.iter().zip(100..) {
            match response {
                BlockResponse::New(data) => {
                    assert_eq!(data.clock.as_ref().unwrap().number, expected);
                    assert_eq!(data.final_block_height, expected - DEFAULT_FINALITY_LAG);
                }
                other => panic!("unexpected response: {other:?}"),
            }
        }
    }

    #[test]
    fn test_undo_refers_to_generated_block_id() {
        let source = MockSource::builder(vec![1])
            .on_branch("main")
            .blocks(100, 103)
            .undo_to(100)
            .on_branch("fork")
            .blocks(101, 102)
            .build();

        let responses: Vec<_> = source.into_iter().collect();
        assert_eq!(responses.len(), 5);
        match &responses[3] {
            BlockResponse::Undo(undo) => {
                let block = undo.last_valid_block.as_ref().unwrap();
                assert_eq!(block.number, 100);
                assert_eq!(block.id, "main_100");
                assert_eq!(undo.last_valid_cursor, "cursor_100");
            }
            other => panic!("unexpected response: {other:?}"),
        }
        match &responses[4] {
            BlockResponse::New(data) => assert_eq!(data.clock.as_ref().unwrap().id, "fork_101"),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_into_events() {
        let events: Vec<_> = MockSource::builder(vec![42])
            .single_block(999)
            .into_events()
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            Ok(SinkEvent::Data(record)) => {
                assert_eq!(record.position.number, 999);
                assert_eq!(record.payload, vec![42]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

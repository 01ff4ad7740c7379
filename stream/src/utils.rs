use std::time::{SystemTime, UNIX_EPOCH};

use crate::pb::sf::substreams::rpc::v2::BlockScopedData;

/// Raw map output of the block, `None` when the module produced nothing.
pub fn output(block_data: &BlockScopedData) -> Option<&prost_types::Any> {
    block_data
        .output
        .as_ref()
        .and_then(|output| output.map_output.as_ref())
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlockMetadata {
    pub cursor: String,
    pub block_number: u64,
    pub block_id: String,
    pub timestamp: i64,
    pub final_block_height: u64,
}

pub fn block_metadata(block_data: &BlockScopedData) -> Option<BlockMetadata> {
    let clock = block_data.clock.as_ref()?;
    let timestamp = clock.timestamp.as_ref().map(|t| t.seconds).unwrap_or_default();

    Some(BlockMetadata {
        cursor: block_data.cursor.clone(),
        block_number: clock.number,
        block_id: clock.id.clone(),
        timestamp,
        final_block_height: block_data.final_block_height,
    })
}

/// Seconds between the block timestamp and now.
pub fn drift_seconds(block_meta: &BlockMetadata) -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();

    now - block_meta.timestamp
}

pub fn format_drift(block_meta: &BlockMetadata) -> String {
    let drift = drift_seconds(block_meta).max(0);

    match drift {
        d if d < 60 => format!("{}s", d),
        d if d < 3600 => format!("{}m{}s", d / 60, d % 60),
        d => format!("{}h{}m", d / 3600, (d % 3600) / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pb::sf::substreams::v1::Clock;

    fn block(number: u64, seconds: i64) -> BlockScopedData {
        BlockScopedData {
            output: None,
            clock: Some(Clock {
                id: format!("block_{}", number),
                number,
                timestamp: Some(prost_types::Timestamp { seconds, nanos: 0 }),
            }),
            cursor: format!("cursor_{}", number),
            final_block_height: number.saturating_sub(10),
        }
    }

    #[test]
    fn test_block_metadata() {
        let meta = block_metadata(&block(42, 1_700_000_000)).unwrap();

        assert_eq!(meta.block_number, 42);
        assert_eq!(meta.block_id, "block_42");
        assert_eq!(meta.cursor, "cursor_42");
        assert_eq!(meta.timestamp, 1_700_000_000);
        assert_eq!(meta.final_block_height, 32);
    }

    #[test]
    fn test_block_without_clock() {
        let mut data = block(1, 0);
        data.clock = None;
        assert!(block_metadata(&data).is_none());
        assert!(output(&data).is_none());
    }

    #[test]
    fn test_format_drift_of_old_block() {
        let meta = block_metadata(&block(1, 0)).unwrap();
        assert!(format_drift(&meta).ends_with('m'));
    }
}

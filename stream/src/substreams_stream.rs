use std::{pin::Pin, sync::Arc, task::Poll, time::Duration};

use anyhow::{anyhow, Error};
use async_stream::try_stream;
use futures03::{Stream, StreamExt};
use tokio::time::sleep;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, info, warn};

use crate::pb::sf::substreams::rpc::v2::{
    response::Message, BlockScopedData, BlockUndoSignal, Request, Response,
};
use crate::substreams::SubstreamsEndpoint;

/// A message delivered by the stream, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockResponse {
    New(BlockScopedData),
    Undo(BlockUndoSignal),
}

/// Request flags and reconnect policy.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub final_blocks_only: bool,
    pub production_mode: bool,
    /// Consecutive failed connections tolerated before the stream errors out.
    /// `None` retries until the backoff gives up.
    pub max_reconnects: Option<usize>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            final_blocks_only: false,
            production_mode: false,
            max_reconnects: Some(10),
        }
    }
}

pub struct SubstreamsStream {
    stream: Pin<Box<dyn Stream<Item = Result<BlockResponse, Error>> + Send>>,
}

impl SubstreamsStream {
    pub fn new(
        endpoint: Arc<SubstreamsEndpoint>,
        cursor: Option<String>,
        modules: Vec<u8>,
        output_module_name: String,
        start_block: i64,
        end_block: u64,
        options: StreamOptions,
    ) -> Self {
        SubstreamsStream {
            stream: Box::pin(stream_blocks(
                endpoint,
                cursor,
                modules,
                output_module_name,
                start_block,
                end_block,
                options,
            )),
        }
    }
}

fn new_backoff() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(250)
        .max_delay(Duration::from_secs(45))
}

fn stream_blocks(
    endpoint: Arc<SubstreamsEndpoint>,
    cursor: Option<String>,
    modules: Vec<u8>,
    output_module_name: String,
    start_block_num: i64,
    stop_block_num: u64,
    options: StreamOptions,
) -> impl Stream<Item = Result<BlockResponse, Error>> {
    let mut latest_cursor = cursor.unwrap_or_default();
    let mut backoff = new_backoff();
    let mut failed_connections = 0usize;

    try_stream! {
        loop {
            info!(
                endpoint = %endpoint,
                start_block = start_block_num,
                cursor = %latest_cursor,
                "Connecting to substreams"
            );

            let result = endpoint.clone().substreams(Request {
                start_block_num,
                start_cursor: latest_cursor.clone(),
                stop_block_num,
                final_blocks_only: options.final_blocks_only,
                production_mode: options.production_mode,
                output_module: output_module_name.clone(),
                modules: modules.clone(),
                debug_initial_store_snapshot_for_modules: vec![],
            }).await;

            match result {
                Ok(stream) => {
                    info!("Substreams connected");

                    let mut encountered_error = false;
                    for await response in stream {
                        match process_substreams_response(response) {
                            BlockProcessedResult::BlockScopedData(block_scoped_data) => {
                                // A good value from the stream resets the reconnect policy
                                backoff = new_backoff();
                                failed_connections = 0;

                                let cursor = block_scoped_data.cursor.clone();
                                yield BlockResponse::New(block_scoped_data);

                                latest_cursor = cursor;
                            },
                            BlockProcessedResult::BlockUndoSignal(block_undo_signal) => {
                                backoff = new_backoff();
                                failed_connections = 0;

                                let cursor = block_undo_signal.last_valid_cursor.clone();
                                yield BlockResponse::Undo(block_undo_signal);

                                latest_cursor = cursor;
                            },
                            BlockProcessedResult::Skip() => {},
                            BlockProcessedResult::FatalError(error) => {
                                return Err(anyhow!(
                                    "substreams module '{}' failed: {}",
                                    error.module,
                                    error.reason
                                ))?;
                            },
                            BlockProcessedResult::TonicError(status) => {
                                // Unauthenticated errors are not retried, the token will not fix itself
                                if status.code() == tonic::Code::Unauthenticated {
                                    return Err(anyhow::Error::new(status.clone()))?;
                                }

                                warn!(error = %status, "Substreams stream interrupted");
                                encountered_error = true;
                                break;
                            },
                        }
                    }

                    if !encountered_error {
                        info!("Substreams stream completed, reached end block");
                        return;
                    }
                },
                Err(status) => {
                    if status.code() == tonic::Code::Unauthenticated {
                        return Err(anyhow::Error::new(status.clone()))?;
                    }
                    warn!(error = %status, "Unable to connect to substreams endpoint");
                }
            }

            failed_connections += 1;
            if let Some(max) = options.max_reconnects {
                if failed_connections > max {
                    return Err(anyhow!("giving up after {} consecutive reconnect attempts", max))?;
                }
            }

            match backoff.next() {
                Some(duration) => {
                    debug!(delay_ms = duration.as_millis() as u64, "Waiting before reconnecting");
                    sleep(duration).await;
                }
                None => {
                    return Err(anyhow!("backoff requested to stop retrying, quitting"))?;
                }
            }
        }
    }
}

enum BlockProcessedResult {
    Skip(),
    BlockScopedData(BlockScopedData),
    BlockUndoSignal(BlockUndoSignal),
    FatalError(crate::pb::sf::substreams::rpc::v2::Error),
    TonicError(tonic::Status),
}

fn process_substreams_response(result: Result<Response, tonic::Status>) -> BlockProcessedResult {
    let response = match result {
        Ok(v) => v,
        Err(e) => return BlockProcessedResult::TonicError(e),
    };

    match response.message {
        Some(Message::BlockScopedData(block_scoped_data)) => {
            BlockProcessedResult::BlockScopedData(block_scoped_data)
        }
        Some(Message::BlockUndoSignal(block_undo_signal)) => {
            BlockProcessedResult::BlockUndoSignal(block_undo_signal)
        }
        Some(Message::FatalError(error)) => BlockProcessedResult::FatalError(error),
        Some(Message::Session(session)) => {
            info!(
                trace_id = %session.trace_id,
                resolved_start_block = session.resolved_start_block,
                linear_handoff_block = session.linear_handoff_block,
                "Substreams session initialized"
            );
            BlockProcessedResult::Skip()
        }
        // Progress and debug messages are not decoded
        None => BlockProcessedResult::Skip(),
    }
}

impl Stream for SubstreamsStream {
    type Item = Result<BlockResponse, Error>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pb::sf::substreams::{rpc::v2::SessionInit, v1::BlockRef};

    #[test]
    fn undo_signal_is_forwarded() {
        let response = Response {
            message: Some(Message::BlockUndoSignal(BlockUndoSignal {
                last_valid_block: Some(BlockRef {
                    id: "block_100".to_string(),
                    number: 100,
                }),
                last_valid_cursor: "cursor_100".to_string(),
            })),
        };

        match process_substreams_response(Ok(response)) {
            BlockProcessedResult::BlockUndoSignal(undo) => {
                assert_eq!(undo.last_valid_cursor, "cursor_100");
            }
            _ => panic!("expected an undo signal"),
        }
    }

    #[test]
    fn session_and_unknown_messages_are_skipped() {
        let session = Response {
            message: Some(Message::Session(SessionInit::default())),
        };
        assert!(matches!(
            process_substreams_response(Ok(session)),
            BlockProcessedResult::Skip()
        ));
        assert!(matches!(
            process_substreams_response(Ok(Response { message: None })),
            BlockProcessedResult::Skip()
        ));
    }

    #[test]
    fn transport_errors_are_surfaced() {
        let result = process_substreams_response(Err(tonic::Status::unavailable("down")));
        assert!(matches!(result, BlockProcessedResult::TonicError(_)));
    }

    #[test]
    fn backoff_is_capped() {
        let delays: Vec<_> = new_backoff().take(12).collect();
        assert_eq!(delays[0], Duration::from_millis(500));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(45)));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(45));
    }
}

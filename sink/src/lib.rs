//! Reorg-aware substreams sink.
//!
//! Consumes ordered block data and undo signals, publishes each block's
//! module output to a [`bus::MessageBus`], compensates retracted messages
//! after a rollback and keeps a durable resume cursor behind acknowledged
//! publishes.
//!
//! # Example
//!
//! ```ignore
//! use sink::{cursor::CursorStoreSource, driver::{DriverConfig, SinkDriver}};
//!
//! let store = CursorStoreSource::mock().into_store().await?;
//! let mut driver = SinkDriver::start(config, key, store.into(), bus).await?;
//!
//! let summary = driver.run(events, tokio::signal::ctrl_c().map(|_| ())).await?;
//! ```

pub mod bus;
pub mod cursor;
pub mod driver;
pub mod errors;
pub mod publisher;
pub mod rollback;
pub mod source;
pub mod types;
pub mod undo_log;
pub mod watermark;

pub use bus::{MessageBus, MockBus, OutboundMessage};
pub use driver::{DriverConfig, DriverState, RunSummary, SinkDriver, StopReason};
pub use errors::{BusError, CursorStoreError, SinkError};
pub use types::{Cursor, DataRecord, MessageId, Position, SinkEvent, UndoSignal};

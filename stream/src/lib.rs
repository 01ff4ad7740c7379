//! Substreams client.
//!
//! Connects to a Substreams endpoint and exposes the block stream as a
//! `futures::Stream` of [`substreams_stream::BlockResponse`], reconnecting from
//! the last received cursor when the connection drops.

pub mod package;
pub mod pb;
pub mod substreams;
pub mod substreams_stream;
pub mod utils;

pub use package::{read_block_range, read_package};

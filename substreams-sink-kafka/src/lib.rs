//! Substreams to Kafka sink.
//!
//! Wires the reorg-aware [`sink`] core to a live Substreams endpoint and a
//! Kafka producer, configured from the environment.

pub mod config;
pub mod dependencies;
pub mod errors;

pub use config::SinkConfig;
pub use dependencies::Dependencies;
pub use errors::AppError;

//! Kafka message bus for the substreams sink.
//!
//! ## Usage
//!
//! ```ignore
//! use sink_kafka::{KafkaBus, ProducerConfig};
//!
//! // Using environment variables
//! let bus = KafkaBus::connect(&ProducerConfig::from_env("localhost:9092", "my-project"))?;
//!
//! // Or with explicit configuration
//! let config = ProducerConfig::new("localhost:9092", "my-project")
//!     .with_credentials("user".to_string(), "secret".to_string());
//! let bus = KafkaBus::connect(&config)?;
//! ```

mod bus;
mod config;

pub use bus::{classify, KafkaBus, KafkaBusError};
pub use config::{create_producer_with_config, ProducerConfig};

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use thiserror::Error;
use tracing::{debug, info};

use sink::bus::{MessageBus, OutboundMessage};
use sink::errors::BusError;

use crate::config::{create_producer_with_config, ProducerConfig};

#[derive(Debug, Error)]
pub enum KafkaBusError {
    #[error("failed to create producer: {0}")]
    Creation(#[from] KafkaError),
}

/// [`MessageBus`] backed by an rdkafka [`FutureProducer`].
///
/// The transport id of a delivered message is `"{partition}:{offset}"`.
pub struct KafkaBus {
    producer: FutureProducer,
    queue_timeout: Duration,
    flush_timeout: Duration,
}

impl KafkaBus {
    pub fn connect(config: &ProducerConfig) -> Result<Self, KafkaBusError> {
        let producer = create_producer_with_config(config)?;
        info!(broker = %config.broker, client_id = %config.client_id, "Kafka producer created");

        Ok(Self {
            producer,
            queue_timeout: Duration::from_secs(1),
            flush_timeout: Duration::from_secs(10),
        })
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    async fn publish(&self, message: &OutboundMessage) -> Result<String, BusError> {
        let mut headers = OwnedHeaders::new();
        for (key, value) in &message.headers {
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            });
        }

        let mut record: FutureRecord<'_, str, [u8]> = FutureRecord::to(&message.topic)
            .key(message.key.as_str())
            .headers(headers);
        if let Some(payload) = &message.payload {
            record = record.payload(payload.as_slice());
        }

        match self.producer.send(record, self.queue_timeout).await {
            Ok((partition, offset)) => {
                debug!(key = %message.key, partition, offset, "Message delivered");
                Ok(format!("{}:{}", partition, offset))
            }
            Err((err, _)) => Err(classify(&err)),
        }
    }

    async fn close(&self) -> Result<(), BusError> {
        let producer = self.producer.clone();
        let timeout = self.flush_timeout;

        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|err| BusError::fatal(format!("flush task failed: {}", err)))?
            .map_err(|err| classify(&err))?;

        info!("Kafka producer flushed");
        Ok(())
    }
}

/// Split Kafka failures into ones worth retrying and ones that never succeed.
pub fn classify(err: &KafkaError) -> BusError {
    let retryable = matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::QueueFull
                | RDKafkaErrorCode::MessageTimedOut
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::OperationTimedOut
                | RDKafkaErrorCode::NotEnoughReplicas
                | RDKafkaErrorCode::NotEnoughReplicasAfterAppend
                | RDKafkaErrorCode::LeaderNotAvailable
                | RDKafkaErrorCode::NotLeaderForPartition
                | RDKafkaErrorCode::NetworkException
                | RDKafkaErrorCode::BrokerNotAvailable
                | RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::AllBrokersDown
        )
    );

    if retryable {
        BusError::retryable(err.to_string())
    } else {
        BusError::fatal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        for code in [
            RDKafkaErrorCode::QueueFull,
            RDKafkaErrorCode::MessageTimedOut,
            RDKafkaErrorCode::AllBrokersDown,
            RDKafkaErrorCode::NotEnoughReplicas,
        ] {
            assert!(
                classify(&KafkaError::MessageProduction(code)).is_retryable(),
                "{:?} should be retryable",
                code
            );
        }
    }

    #[test]
    fn test_rejections_are_fatal() {
        for code in [
            RDKafkaErrorCode::MessageSizeTooLarge,
            RDKafkaErrorCode::TopicAuthorizationFailed,
            RDKafkaErrorCode::UnknownTopicOrPartition,
            RDKafkaErrorCode::InvalidRecord,
        ] {
            assert!(!classify(&KafkaError::MessageProduction(code)).is_retryable());
        }
        assert!(!classify(&KafkaError::Canceled).is_retryable());
    }

    #[tokio::test]
    #[ignore = "requires a Kafka broker in KAFKA_BROKER"]
    async fn test_publish_and_tombstone() {
        let config = ProducerConfig::from_env("localhost:9092", "sink-kafka-test");
        let bus = KafkaBus::connect(&config).unwrap();

        let message = OutboundMessage::new("sink-kafka-test", "1-block_1", Some(b"hello".to_vec()))
            .with_header("sink-action", "publish");
        let id = bus.publish(&message).await.unwrap();
        assert!(id.contains(':'));

        let tombstone = OutboundMessage::new("sink-kafka-test", "1-block_1", None);
        bus.publish(&tombstone).await.unwrap();
        bus.close().await.unwrap();
    }
}

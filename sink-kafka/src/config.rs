use std::env;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaResult;
use rdkafka::producer::FutureProducer;

/// Configuration for creating a Kafka producer.
#[derive(Clone)]
pub struct ProducerConfig {
    /// Kafka broker address (e.g., "localhost:9092")
    pub broker: String,
    /// Client ID for this producer
    pub client_id: String,
    /// SASL username (enables SASL/SSL if set)
    pub username: Option<String>,
    /// SASL password (required if username is set)
    pub password: Option<String>,
    /// Custom CA certificate in PEM format
    pub ssl_ca_pem: Option<String>,
    /// Delivery timeout for a single message, retries inside librdkafka
    /// included.
    pub message_timeout: Duration,
}

impl std::fmt::Debug for ProducerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerConfig")
            .field("broker", &self.broker)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("ssl_ca_pem", &self.ssl_ca_pem.is_some())
            .field("message_timeout", &self.message_timeout)
            .finish()
    }
}

impl ProducerConfig {
    pub fn new(broker: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            client_id: client_id.into(),
            username: None,
            password: None,
            ssl_ca_pem: None,
            message_timeout: Duration::from_secs(5),
        }
    }

    /// Create a ProducerConfig from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `KAFKA_BROKER` - Broker address (uses provided default if not set)
    /// - `KAFKA_USERNAME` - SASL username (optional)
    /// - `KAFKA_PASSWORD` - SASL password (optional)
    /// - `KAFKA_SSL_CA_PEM` - Custom CA cert in PEM format (optional)
    pub fn from_env(default_broker: &str, client_id: impl Into<String>) -> Self {
        Self {
            broker: env::var("KAFKA_BROKER").unwrap_or_else(|_| default_broker.to_string()),
            username: env::var("KAFKA_USERNAME").ok(),
            password: env::var("KAFKA_PASSWORD").ok(),
            ssl_ca_pem: env::var("KAFKA_SSL_CA_PEM").ok(),
            ..Self::new(default_broker, client_id)
        }
    }

    /// Set SASL credentials.
    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }

    /// Set custom CA certificate.
    pub fn with_ssl_ca(mut self, ca_pem: String) -> Self {
        self.ssl_ca_pem = Some(ca_pem);
        self
    }

    fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &self.broker)
            .set("client.id", &self.client_id)
            .set("compression.type", "zstd")
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set(
                "message.timeout.ms",
                self.message_timeout.as_millis().to_string(),
            )
            .set("queue.buffering.max.messages", "100000")
            .set("queue.buffering.max.kbytes", "1048576")
            .set("batch.num.messages", "10000");

        // SASL/SSL for managed Kafka, plaintext for local development
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            client_config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);

            if let Some(ca_pem) = &self.ssl_ca_pem {
                client_config.set("ssl.ca.pem", ca_pem);
            }
        }

        client_config
    }
}

/// Create a Kafka producer with the given configuration.
///
/// Configures the producer with:
/// - zstd compression
/// - idempotent delivery acknowledged by all in-sync replicas
/// - SASL/SSL authentication if credentials are provided
pub fn create_producer_with_config(config: &ProducerConfig) -> KafkaResult<FutureProducer> {
    config.client_config().create()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in ["KAFKA_BROKER", "KAFKA_USERNAME", "KAFKA_PASSWORD", "KAFKA_SSL_CA_PEM"] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();

        let config = ProducerConfig::from_env("localhost:9092", "project");

        assert_eq!(config.broker, "localhost:9092");
        assert_eq!(config.client_id, "project");
        assert!(config.username.is_none());

        let client_config = config.client_config();
        assert_eq!(client_config.get("compression.type"), Some("zstd"));
        assert_eq!(client_config.get("message.timeout.ms"), Some("5000"));
        assert_eq!(client_config.get("security.protocol"), None);
    }

    #[test]
    #[serial]
    fn test_from_env_with_credentials() {
        clear_env();
        env::set_var("KAFKA_BROKER", "broker.example.com:9093");
        env::set_var("KAFKA_USERNAME", "sink");
        env::set_var("KAFKA_PASSWORD", "secret");
        env::set_var("KAFKA_SSL_CA_PEM", "-----BEGIN CERTIFICATE-----");

        let config = ProducerConfig::from_env("localhost:9092", "project");
        let client_config = config.client_config();

        assert_eq!(
            client_config.get("bootstrap.servers"),
            Some("broker.example.com:9093")
        );
        assert_eq!(client_config.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(client_config.get("sasl.username"), Some("sink"));
        assert_eq!(
            client_config.get("ssl.ca.pem"),
            Some("-----BEGIN CERTIFICATE-----")
        );
        assert!(!format!("{:?}", config).contains("secret"));

        clear_env();
    }
}

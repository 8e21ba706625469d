use async_trait::async_trait;
use common_kafka::config::{ConsumerConfig, KafkaConfig};
use common_kafka::kafka_consumer::{Offset, SingleTopicConsumer, SubscribeErr};

use crate::codec::ValueDecoder;
use crate::consumer::{MessageSource, RawMessage, SourceError};
use crate::schema_registry::RegistryError;

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("schema registry unavailable for {topic}: {source}")]
    SchemaRegistry {
        topic: String,
        #[source]
        source: RegistryError,
    },
    #[error("failed to subscribe to {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: SubscribeErr,
    },
    #[error("consumer setup task failed: {0}")]
    Setup(#[from] tokio::task::JoinError),
}

/// `MessageSource` backed by a Kafka consumer group subscription.
pub struct KafkaSource {
    consumer: SingleTopicConsumer,
}

impl KafkaSource {
    /// Checks that `decoder` can resolve schemas, then creates the consumer
    /// and subscribes. Nothing is consumed until the source is polled.
    pub async fn subscribe(
        kafka: &KafkaConfig,
        consumer: &ConsumerConfig,
        topic: &str,
        decoder: &ValueDecoder,
    ) -> Result<Self, ConsumerError> {
        decoder
            .check_ready()
            .await
            .map_err(|source| ConsumerError::SchemaRegistry {
                topic: topic.to_string(),
                source,
            })?;

        // Consumer creation fetches broker metadata synchronously
        let (kafka, consumer, owned_topic) = (kafka.clone(), consumer.clone(), topic.to_string());
        let consumer = tokio::task::spawn_blocking(move || {
            SingleTopicConsumer::new(&kafka, &consumer, &owned_topic)
        })
        .await?
        .map_err(|source| ConsumerError::Subscribe {
            topic: topic.to_string(),
            source,
        })?;

        Ok(Self { consumer })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    type Ack = Offset;

    fn topic(&self) -> &str {
        self.consumer.topic()
    }

    async fn recv(&mut self) -> Result<RawMessage<Offset>, SourceError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| SourceError::Recv(Box::new(e)))?;

        Ok(RawMessage {
            partition: message.offset.partition(),
            offset: message.offset.offset(),
            payload: message.payload,
            ack: message.offset,
        })
    }

    fn commit(&mut self, ack: Offset) -> Result<(), SourceError> {
        ack.commit().map_err(|e| SourceError::Commit(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::schema_registry::SchemaRegistry;

    fn configs() -> (KafkaConfig, ConsumerConfig) {
        let kafka = KafkaConfig {
            kafka_hosts: "127.0.0.1:1".to_string(),
            kafka_tls: false,
            kafka_verify_ssl_certificate: false,
        };
        let consumer = ConsumerConfig {
            kafka_consumer_group: "catalog-sync-test".to_string(),
            kafka_consumer_offset_reset: "earliest".to_string(),
            kafka_session_timeout_ms: 6000,
            kafka_metadata_timeout_ms: 500,
        };
        (kafka, consumer)
    }

    #[tokio::test]
    async fn unreachable_schema_registry_fails_startup() {
        let (kafka, consumer) = configs();
        let registry = SchemaRegistry::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let decoder = ValueDecoder::Avro(Arc::new(registry));

        let result =
            KafkaSource::subscribe(&kafka, &consumer, "stock_records", &decoder).await;

        assert!(matches!(
            result,
            Err(ConsumerError::SchemaRegistry { topic, .. }) if topic == "stock_records"
        ));
    }

    #[tokio::test]
    async fn unreachable_broker_fails_startup() {
        let (kafka, consumer) = configs();

        let result =
            KafkaSource::subscribe(&kafka, &consumer, "stock_records", &ValueDecoder::Json).await;

        assert!(matches!(
            result,
            Err(ConsumerError::Subscribe { topic, .. }) if topic == "stock_records"
        ));
    }
}

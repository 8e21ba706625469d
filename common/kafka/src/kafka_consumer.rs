use std::sync::{Arc, Weak};
use std::time::Duration;

use rdkafka::{
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message, Offset as KafkaOffset, TopicPartitionList,
};
use tracing::info;

use crate::config::{ConsumerConfig, KafkaConfig};

/// A consumer bound to exactly one topic, with auto-commit disabled. Every
/// received message carries an `Offset` handle; committing it is the only
/// way the group's resume point moves forward.
#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

#[derive(Debug, thiserror::Error)]
pub enum SubscribeErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Topic {0} not found in broker metadata")]
    UnknownTopic(String),
}

/// One message pulled off the topic. The payload is copied out of the
/// consumer's buffer so the message can outlive the `recv` borrow.
pub struct ReceivedMessage {
    pub payload: Option<Vec<u8>>,
    pub offset: Offset,
}

impl ReceivedMessage {
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

impl SingleTopicConsumer {
    /// Builds the consumer, checks that the broker answers and knows the
    /// topic, then subscribes. Any failure here is fatal for the caller.
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        topic: &str,
    ) -> Result<Self, SubscribeErr> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set(
                "session.timeout.ms",
                consumer_config.kafka_session_timeout_ms.to_string(),
            )
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false");

        if common_config.kafka_tls {
            client_config.set("security.protocol", "ssl").set(
                "enable.ssl.certificate.verification",
                common_config.kafka_verify_ssl_certificate.to_string(),
            );
        };

        let consumer: StreamConsumer = client_config.create()?;

        let metadata = consumer.fetch_metadata(
            Some(topic),
            Duration::from_millis(consumer_config.kafka_metadata_timeout_ms),
        )?;
        let known = metadata
            .topics()
            .iter()
            .any(|t| t.name() == topic && t.error().is_none());
        if !known {
            return Err(SubscribeErr::UnknownTopic(topic.to_string()));
        }

        consumer.subscribe(&[topic])?;
        info!(topic, group = %consumer_config.kafka_consumer_group, "subscribed");

        let inner = Inner {
            consumer,
            topic: topic.to_string(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Waits for the next message. Cancel-safe: dropping the future before it
    /// resolves does not lose a message.
    pub async fn recv(&self) -> Result<ReceivedMessage, RecvErr> {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        Ok(ReceivedMessage {
            payload: message.payload().map(|p| p.to_vec()),
            offset,
        })
    }
}

pub struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Offset {
    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Queues an asynchronous commit of this message. The committed position
    /// is the next offset to read, so a restart resumes after this message.
    pub fn commit(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &inner.topic,
            self.partition,
            KafkaOffset::Offset(self.offset + 1),
        )?;
        inner.consumer.commit(&tpl, CommitMode::Async)?;
        Ok(())
    }
}

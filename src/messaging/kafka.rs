use async_trait::async_trait;
use futures_util::future::try_join_all;
use rdkafka::{
    config::ClientConfig,
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
};
use std::sync::Arc;
use std::time::Duration;

use super::{BrokerMessage, EventPublisher, PublishError};
use crate::actors::core::{ComponentHealth, HealthCheckable};
use crate::config::KafkaSettings;
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

const COMPONENT: &str = "kafka";

pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    message_timeout: Duration,
    circuit_breaker: CircuitBreaker,
}

impl KafkaPublisher {
    pub fn new(settings: &KafkaSettings, metrics: Arc<Metrics>) -> Result<Self, PublishError> {
        // murmur2_random matches the Java client's default key hashing
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("message.timeout.ms", settings.message_timeout.as_millis().to_string())
            .set("compression.type", "snappy")
            .set("partitioner", "murmur2_random")
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("linger.ms", "5")
            .create()
            .map_err(|e| PublishError::Producer(e.to_string()))?;

        // Configure circuit breaker for the broker
        let cb_config = CircuitBreakerConfig {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(30),
            success_threshold: 1,
        };
        let circuit_breaker = CircuitBreaker::new(cb_config).with_transition_hook(move |from, to| {
            metrics.record_circuit_breaker_transition(from.as_str(), to.as_str(), to.as_gauge())
        });

        tracing::info!(brokers = %settings.brokers, topic = %settings.users_topic, "📨 Kafka producer created");

        Ok(Self {
            producer,
            topic: settings.users_topic.clone(),
            message_timeout: settings.message_timeout,
            circuit_breaker,
        })
    }

    /// Topics are never created implicitly; a missing topic stops startup.
    pub async fn ensure_topic_exists(&self) -> Result<(), PublishError> {
        let producer = self.producer.clone();
        let topic = self.topic.clone();
        let timeout = self.message_timeout;

        // Cluster-wide metadata: a per-topic request could trigger broker-side auto-creation
        let partitions = tokio::task::spawn_blocking(move || {
            let metadata = producer.client().fetch_metadata(None, timeout)?;
            Ok::<_, rdkafka::error::KafkaError>(
                metadata
                    .topics()
                    .iter()
                    .find(|t| t.name() == topic && t.error().is_none())
                    .map(|t| t.partitions().len()),
            )
        })
        .await
        .map_err(|e| PublishError::Producer(e.to_string()))?
        .map_err(|e| PublishError::Producer(e.to_string()))?;

        match partitions {
            Some(partitions) if partitions > 0 => {
                tracing::info!(topic = %self.topic, partitions, "✅ Kafka topic verified");
                Ok(())
            }
            _ => Err(PublishError::MissingTopic(self.topic.clone())),
        }
    }

    async fn send_all(&self, messages: &[BrokerMessage]) -> Result<(), PublishError> {
        let sends = messages.iter().map(|message| {
            let record = FutureRecord::to(&self.topic)
                .key(message.key.as_str())
                .payload(message.value.as_slice())
                .headers(headers_for(message));

            self.producer.send(record, Timeout::After(self.message_timeout))
        });

        // Any failure fails the batch; already-acknowledged messages get re-sent next cycle
        try_join_all(sends)
            .await
            .map(|_| ())
            .map_err(|(e, _)| PublishError::Delivery(e.to_string()))
    }
}

fn headers_for(message: &BrokerMessage) -> OwnedHeaders {
    message.headers.iter().fold(OwnedHeaders::new(), |headers, (key, value)| {
        headers.insert(Header {
            key: key.as_str(),
            value: Some(value.as_str()),
        })
    })
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish_batch(&self, messages: Vec<BrokerMessage>) -> Result<(), PublishError> {
        let count = messages.len();

        // Use circuit breaker to fail fast while the broker is down
        match self.circuit_breaker.call(self.send_all(&messages)).await {
            Ok(()) => {
                tracing::debug!(topic = %self.topic, count, "Published batch to Kafka");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::warn!(topic = %self.topic, count, "Circuit breaker open - Kafka unavailable");
                Err(PublishError::CircuitOpen)
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(error = %e, topic = %self.topic, count, "Failed to publish batch to Kafka");
                Err(e)
            }
        }
    }

    async fn close(&self) -> Result<(), PublishError> {
        let producer = self.producer.clone();
        let timeout = self.message_timeout;

        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| PublishError::Producer(e.to_string()))?
            .map_err(|e| PublishError::Producer(e.to_string()))?;

        tracing::info!("📪 Kafka producer flushed");
        Ok(())
    }
}

impl HealthCheckable for KafkaPublisher {
    fn check_health(&self) -> ComponentHealth {
        ComponentHealth::new(COMPONENT, self.circuit_breaker.state().into())
    }

    fn component_name(&self) -> &str {
        COMPONENT
    }
}

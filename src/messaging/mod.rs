use async_trait::async_trait;

mod kafka;

pub use kafka::KafkaPublisher;

// ============================================================================
// Broker Contract
// ============================================================================
//
// The dispatcher only needs "publish this batch, tell me if all of it was
// acknowledged". Partitioning is by key, so events for one user stay ordered
// within a partition.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub key: String,
    pub value: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("broker unavailable: circuit breaker open")]
    CircuitOpen,

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("topic '{0}' does not exist")]
    MissingTopic(String),

    #[error("producer error: {0}")]
    Producer(String),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Succeeds only when every message in the batch was acknowledged.
    async fn publish_batch(&self, messages: Vec<BrokerMessage>) -> Result<(), PublishError>;

    /// Flush outstanding deliveries and release the client.
    async fn close(&self) -> Result<(), PublishError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Publisher double: records batches, fails on demand, optionally slow.
    #[derive(Default)]
    pub(crate) struct RecordingPublisher {
        pub batches: Mutex<Vec<Vec<BrokerMessage>>>,
        pub failures: Mutex<VecDeque<PublishError>>,
        pub delay: Option<Duration>,
        pub closed: Mutex<bool>,
    }

    impl RecordingPublisher {
        pub(crate) fn failing_times(n: usize) -> Self {
            let publisher = Self::default();
            {
                let mut failures = publisher.failures.lock().unwrap();
                for _ in 0..n {
                    failures.push_back(PublishError::Delivery("broker unavailable".to_string()));
                }
            }
            publisher
        }

        pub(crate) fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.batches.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish_batch(&self, messages: Vec<BrokerMessage>) -> Result<(), PublishError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.batches.lock().unwrap().push(messages);
            match self.failures.lock().unwrap().pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn close(&self) -> Result<(), PublishError> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }
}

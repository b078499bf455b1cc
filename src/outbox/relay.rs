use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

use super::message::to_broker_message;
use crate::error::AppError;
use crate::messaging::EventPublisher;
use crate::metrics::Metrics;
use crate::models::{DomainEvent, OutboxRecord};
use crate::storage::OutboxRepository;

/// What one dispatch cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub delivered: u64,
    pub failed: u64,
    pub dead_lettered: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.fetched == 0
    }

    fn outcome(&self) -> &'static str {
        if self.is_idle() {
            "idle"
        } else if self.failed > 0 {
            "failed"
        } else {
            "delivered"
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("outbox storage error: {0}")]
    Storage(#[from] AppError),

    #[error("failed to encode outbox record {id}: {source}")]
    Encode {
        id: i64,
        #[source]
        source: serde_json::Error,
    },
}

pub struct OutboxRelay {
    repo: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<Metrics>,
    batch_size: i64,
    max_attempts: Option<i32>,
}

impl OutboxRelay {
    pub fn new(
        repo: Arc<dyn OutboxRepository>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<Metrics>,
        batch_size: i64,
        max_attempts: Option<i32>,
    ) -> Self {
        Self {
            repo,
            publisher,
            metrics,
            batch_size,
            max_attempts,
        }
    }

    pub fn publisher(&self) -> Arc<dyn EventPublisher> {
        Arc::clone(&self.publisher)
    }

    /// Fetch one batch of pending rows, publish it, and record the outcome.
    ///
    /// A failed publish is not an error: the rows get their attempt counters
    /// bumped and are picked up again on a later cycle. Errors are reserved
    /// for storage failures, which leave the rows untouched.
    pub async fn run_cycle(&self) -> Result<CycleReport, OutboxError> {
        let started = Instant::now();
        let result = self.dispatch().await;

        let outcome = match &result {
            Ok(report) => report.outcome(),
            Err(_) => "error",
        };
        self.metrics.record_cycle(outcome, started.elapsed().as_secs_f64());

        result
    }

    async fn dispatch(&self) -> Result<CycleReport, OutboxError> {
        let records = self.repo.fetch_unsent(self.batch_size, self.max_attempts).await?;
        if records.is_empty() {
            return Ok(CycleReport::default());
        }

        let fetched = records.len();
        self.metrics.outbox_batch_size.observe(fetched as f64);

        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        let messages = records
            .iter()
            .map(|r| to_broker_message(r).map_err(|source| OutboxError::Encode { id: r.id, source }))
            .collect::<Result<Vec<_>, _>>()?;

        match self.publisher.publish_batch(messages).await {
            Ok(()) => {
                let delivered = self.repo.mark_delivered(&ids).await?;
                for record in &records {
                    self.metrics.record_published(record.event_type());
                }
                tracing::info!(fetched, delivered, "📤 Outbox batch delivered");

                Ok(CycleReport {
                    fetched,
                    delivered,
                    ..CycleReport::default()
                })
            }
            Err(e) => {
                self.metrics.outbox_publish_failures.inc();
                tracing::warn!(error = %e, fetched, "Outbox batch publish failed, will retry");

                let failed = self.repo.record_failed_attempt(&ids, Utc::now()).await?;
                let dead_lettered = self.report_dead_letters(&records);

                Ok(CycleReport {
                    fetched,
                    failed,
                    dead_lettered,
                    ..CycleReport::default()
                })
            }
        }
    }

    /// Rows whose failed attempt just reached the limit drop out of the fetch
    /// window for good.
    fn report_dead_letters(&self, records: &[OutboxRecord]) -> usize {
        let Some(max_attempts) = self.max_attempts else {
            return 0;
        };

        let mut parked = 0;
        for record in records.iter().filter(|r| r.attempt_count + 1 >= max_attempts) {
            self.metrics.record_dead_lettered(record.event_type());
            tracing::error!(
                outbox_id = record.id,
                event_id = %record.event_id,
                event_type = %record.event_type,
                attempts = record.attempt_count + 1,
                "☠️  Outbox event reached attempt limit, no longer dispatched"
            );
            parked += 1;
        }
        parked
    }
}

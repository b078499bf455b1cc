use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::messaging::BrokerMessage;
use crate::models::{DomainEvent, OutboxRecord, UserSnapshot};

pub const EVENT_TYPE_HEADER: &str = "event_type";

/// Wire shape of a user event. `event_id` is stable across redeliveries so
/// consumers can drop duplicates.
#[derive(Debug, Serialize)]
struct EventEnvelope<'a> {
    event_id: Uuid,
    event_type: &'a str,
    user_id: i64,
    occurred_at: DateTime<Utc>,
    user: &'a UserSnapshot,
}

pub fn to_broker_message(record: &OutboxRecord) -> Result<BrokerMessage, serde_json::Error> {
    let envelope = EventEnvelope {
        event_id: record.event_id,
        event_type: record.event_type(),
        user_id: record.aggregate_id(),
        occurred_at: record.created_at,
        user: &record.payload,
    };

    Ok(BrokerMessage {
        // Same user, same partition
        key: record.aggregate_id().to_string(),
        value: serde_json::to_vec(&envelope)?,
        headers: vec![(EVENT_TYPE_HEADER.to_string(), record.event_type().to_string())],
    })
}

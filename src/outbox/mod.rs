// ============================================================================
// Transactional Outbox Relay
// ============================================================================
//
// User mutations write their event into the `outbox` table inside the same
// transaction. The relay drains that table in id order and hands batches to
// the broker. Rows are only marked delivered after the broker acknowledged
// the whole batch, so delivery is at-least-once.
//
// ============================================================================

mod message;
mod relay;

pub use relay::{CycleReport, OutboxError, OutboxRelay};

// ============================================================================
// Actors Module
// ============================================================================
//
// Actor-based infrastructure for background work.
//
// Structure:
// - core/              - Health types shared by actors and the HTTP layer
// - outbox_dispatcher  - Periodic outbox relay with graceful stop
//
// Note: Request handling (auth, user management) stays in services called
//       directly from handlers. Actors are reserved for background concerns.
//
// ============================================================================

pub mod core;
mod outbox_dispatcher;

pub use outbox_dispatcher::{GetDispatcherHealth, OutboxDispatcher, Stop};

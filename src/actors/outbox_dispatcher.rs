use actix::prelude::*;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::actors::core::{ComponentHealth, HealthStatus};
use crate::metrics::Metrics;
use crate::outbox::{CycleReport, OutboxError, OutboxRelay};

// ============================================================================
// Outbox Dispatcher Actor - Drives the outbox relay on a fixed interval
// ============================================================================
//
// Responsibilities:
// - Run one relay cycle per tick, never two at once
// - Track consecutive failed cycles for /health
// - Drain the in-flight cycle and flush the producer on Stop
//
// ============================================================================

const COMPONENT: &str = "outbox_dispatcher";
const UNHEALTHY_AFTER: u32 = 5;

pub struct OutboxDispatcher {
    relay: Arc<OutboxRelay>,
    metrics: Arc<Metrics>,
    interval: Duration,
    tick: Option<SpawnHandle>,
    cycle_in_flight: bool,
    consecutive_failures: u32,
    last_cycle_at: Option<DateTime<Utc>>,
    idle_waiters: Vec<oneshot::Sender<()>>,
}

impl OutboxDispatcher {
    pub fn new(relay: OutboxRelay, metrics: Arc<Metrics>, interval: Duration) -> Self {
        Self {
            relay: Arc::new(relay),
            metrics,
            interval,
            tick: None,
            cycle_in_flight: false,
            consecutive_failures: 0,
            last_cycle_at: None,
            idle_waiters: Vec::new(),
        }
    }

    fn start_cycle(&mut self, ctx: &mut Context<Self>) {
        if self.cycle_in_flight {
            self.metrics.outbox_cycles_skipped.inc();
            tracing::debug!("Previous outbox cycle still running, skipping tick");
            return;
        }

        self.cycle_in_flight = true;
        let relay = Arc::clone(&self.relay);

        ctx.spawn(
            async move { relay.run_cycle().await }
                .into_actor(self)
                .map(|result, act, _ctx| act.finish_cycle(result)),
        );
    }

    fn finish_cycle(&mut self, result: Result<CycleReport, OutboxError>) {
        self.cycle_in_flight = false;
        self.last_cycle_at = Some(Utc::now());

        match result {
            Ok(report) if report.failed > 0 && report.dead_lettered as u64 >= report.failed => {
                // The whole batch hit the attempt limit; nothing is left to retry
                tracing::warn!(
                    dead_lettered = report.dead_lettered,
                    "Failed batch parked at attempt limit, clearing failure streak"
                );
                self.consecutive_failures = 0;
            }
            Ok(report) if report.failed > 0 => {
                self.consecutive_failures += 1;
            }
            Ok(report) => {
                if !report.is_idle() && self.consecutive_failures > 0 {
                    tracing::info!(
                        after_failures = self.consecutive_failures,
                        "✅ Outbox delivery recovered"
                    );
                }
                if !report.is_idle() {
                    self.consecutive_failures = 0;
                }
            }
            Err(e) => {
                self.consecutive_failures += 1;
                tracing::error!(error = %e, "Outbox cycle failed");
            }
        }

        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn health(&self) -> ComponentHealth {
        let status = match self.consecutive_failures {
            0 => HealthStatus::Healthy,
            n if n >= UNHEALTHY_AFTER => {
                HealthStatus::Unhealthy(format!("{} consecutive failed dispatch cycles", n))
            }
            n => HealthStatus::Degraded(format!("{} consecutive failed dispatch cycles", n)),
        };

        let mut health = ComponentHealth::new(COMPONENT, status);
        if let Some(at) = self.last_cycle_at {
            health.last_check = at;
        }
        health
    }
}

impl Actor for OutboxDispatcher {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(interval = ?self.interval, "📬 OutboxDispatcher started");

        // Drain any backlog left from a previous run right away
        self.start_cycle(ctx);
        self.tick = Some(ctx.run_interval(self.interval, |act, ctx| act.start_cycle(ctx)));
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        tracing::info!("🛑 OutboxDispatcher stopped");
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Message)]
#[rtype(result = "ComponentHealth")]
pub struct GetDispatcherHealth;

impl Handler<GetDispatcherHealth> for OutboxDispatcher {
    type Result = MessageResult<GetDispatcherHealth>;

    fn handle(&mut self, _: GetDispatcherHealth, _: &mut Self::Context) -> Self::Result {
        MessageResult(self.health())
    }
}

/// Stop ticking, let the running cycle finish, then flush the producer.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Stop;

impl Handler<Stop> for OutboxDispatcher {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(&mut self, _: Stop, ctx: &mut Self::Context) -> Self::Result {
        tracing::info!("OutboxDispatcher received stop signal");

        if let Some(handle) = self.tick.take() {
            ctx.cancel_future(handle);
        }

        let in_flight = if self.cycle_in_flight {
            let (tx, rx) = oneshot::channel();
            self.idle_waiters.push(tx);
            Some(rx)
        } else {
            None
        };
        let publisher = self.relay.publisher();

        Box::pin(
            async move {
                if let Some(rx) = in_flight {
                    let _ = rx.await;
                }
                if let Err(e) = publisher.close().await {
                    tracing::warn!(error = %e, "Failed to flush producer on shutdown");
                }
            }
            .into_actor(self)
            .map(|_, _act, ctx| ctx.stop()),
        )
    }
}

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers:
// - Outbox dispatch (events published, failed batches, dead-lettered rows)
// - Dispatch cycle duration and batch size
// - Authentication outcomes
// - HTTP request counts and latency
// - Broker circuit breaker state
//
// Exposed in text format at /api/v1/metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Outbox Metrics
    pub outbox_events_published: IntCounterVec,
    pub outbox_publish_failures: IntCounter,
    pub outbox_events_dead_lettered: IntCounterVec,
    pub outbox_batch_size: Histogram,
    pub outbox_cycle_duration: HistogramVec,
    pub outbox_cycles_skipped: IntCounter,

    // Auth Metrics
    pub auth_attempts: IntCounterVec,

    // HTTP Metrics
    pub http_requests: IntCounterVec,
    pub http_request_duration: HistogramVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGauge,
    pub circuit_breaker_transitions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Outbox Metrics
        let outbox_events_published = IntCounterVec::new(
            Opts::new("outbox_events_published_total", "Outbox events acknowledged by the broker"),
            &["event_type"],
        )?;
        registry.register(Box::new(outbox_events_published.clone()))?;

        let outbox_publish_failures = IntCounter::new(
            "outbox_publish_failures_total",
            "Dispatch cycles whose batch publish failed",
        )?;
        registry.register(Box::new(outbox_publish_failures.clone()))?;

        let outbox_events_dead_lettered = IntCounterVec::new(
            Opts::new(
                "outbox_events_dead_lettered_total",
                "Outbox rows parked after reaching the attempt limit",
            ),
            &["event_type"],
        )?;
        registry.register(Box::new(outbox_events_dead_lettered.clone()))?;

        let outbox_batch_size = Histogram::with_opts(
            HistogramOpts::new("outbox_batch_size", "Rows fetched per non-empty dispatch cycle")
                .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0]),
        )?;
        registry.register(Box::new(outbox_batch_size.clone()))?;

        let outbox_cycle_duration = HistogramVec::new(
            HistogramOpts::new("outbox_cycle_duration_seconds", "Dispatch cycle duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(outbox_cycle_duration.clone()))?;

        let outbox_cycles_skipped = IntCounter::new(
            "outbox_cycles_skipped_total",
            "Ticks skipped because the previous cycle was still running",
        )?;
        registry.register(Box::new(outbox_cycles_skipped.clone()))?;

        // Auth Metrics
        let auth_attempts = IntCounterVec::new(
            Opts::new("auth_attempts_total", "Login, refresh and logout attempts"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(auth_attempts.clone()))?;

        // HTTP Metrics
        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests served"),
            &["method", "route", "status"],
        )?;
        registry.register(Box::new(http_requests.clone()))?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
            &["method", "route"],
        )?;
        registry.register(Box::new(http_request_duration.clone()))?;

        // Circuit Breaker Metrics
        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Broker circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        Ok(Self {
            registry,
            outbox_events_published,
            outbox_publish_failures,
            outbox_events_dead_lettered,
            outbox_batch_size,
            outbox_cycle_duration,
            outbox_cycles_skipped,
            auth_attempts,
            http_requests,
            http_request_duration,
            circuit_breaker_state,
            circuit_breaker_transitions,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered family in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub fn record_published(&self, event_type: &str) {
        self.outbox_events_published.with_label_values(&[event_type]).inc();
    }

    pub fn record_dead_lettered(&self, event_type: &str) {
        self.outbox_events_dead_lettered.with_label_values(&[event_type]).inc();
    }

    /// Outcome is one of `idle`, `delivered`, `failed`, `error`
    pub fn record_cycle(&self, outcome: &str, duration_secs: f64) {
        self.outbox_cycle_duration.with_label_values(&[outcome]).observe(duration_secs);
    }

    pub fn record_auth(&self, operation: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.auth_attempts.with_label_values(&[operation, outcome]).inc();
    }

    pub fn record_http(&self, method: &str, route: &str, status: u16, duration_secs: f64) {
        self.http_requests
            .with_label_values(&[method, route, &status.to_string()])
            .inc();
        self.http_request_duration
            .with_label_values(&[method, route])
            .observe(duration_secs);
    }

    pub fn record_circuit_breaker_transition(&self, from_state: &str, to_state: &str, gauge: i64) {
        self.circuit_breaker_transitions.with_label_values(&[from_state, to_state]).inc();
        self.circuit_breaker_state.set(gauge);
    }
}

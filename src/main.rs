use actix::prelude::*;
use actix_web::middleware::{from_fn, Logger};
use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod actors;
mod api;
mod auth;
mod config;
mod error;
mod messaging;
mod metrics;
mod models;
mod outbox;
mod services;
mod storage;
mod utils;

use actors::core::HealthCheckable;
use actors::{OutboxDispatcher, Stop};
use api::{AppState, HealthSources};
use auth::{Argon2Hasher, SessionManager, TokenIssuer};
use config::Config;
use messaging::KafkaPublisher;
use outbox::OutboxRelay;
use services::UserService;
use storage::postgres::{PgOutboxRepository, PgSessionRepository, PgUserRepository};

#[actix::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,identity_service=debug"))
        )
        .init();

    let config = Config::load()?;
    tracing::info!(addr = %config.http_addr, "🚀 Starting identity service");
    tracing::debug!(?config, "Configuration loaded");

    // === 1. Postgres pool (retried, fatal on final failure) ===
    let pool = storage::postgres::connect(&config.database).await?;

    // === 2. Prometheus metrics ===
    let metrics = Arc::new(metrics::Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 3. Kafka producer; a missing topic stops startup ===
    let publisher = Arc::new(KafkaPublisher::new(&config.kafka, Arc::clone(&metrics))?);
    publisher.ensure_topic_exists().await?;

    // === 4. Outbox dispatcher ===
    let relay = OutboxRelay::new(
        Arc::new(PgOutboxRepository::new(pool.clone())),
        publisher.clone(),
        Arc::clone(&metrics),
        config.outbox.batch_size,
        config.outbox.max_attempts,
    );
    let dispatcher = OutboxDispatcher::new(relay, Arc::clone(&metrics), config.outbox.interval).start();

    // === 5. Request-path services ===
    let users = Arc::new(PgUserRepository::new(pool.clone()));
    let hasher = Arc::new(Argon2Hasher::new());
    let sessions = SessionManager::new(
        users.clone(),
        Arc::new(PgSessionRepository::new(pool.clone())),
        hasher.clone(),
        TokenIssuer::new(config.auth.jwt_secret.as_bytes(), config.auth.access_token_ttl),
        Arc::clone(&metrics),
    )?;

    let state = web::Data::new(AppState {
        sessions,
        users: UserService::new(users, hasher),
        metrics,
        request_timeout: config.request_timeout,
        health: HealthSources {
            database: Some(pool.clone()),
            checks: vec![publisher as Arc<dyn HealthCheckable>],
            dispatcher: Some(dispatcher.clone()),
        },
    });

    // === 6. HTTP server; returns once SIGINT/SIGTERM drained the workers ===
    tracing::info!(addr = %config.http_addr, "🌐 HTTP server listening");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(from_fn(api::track_http_metrics))
            .wrap(Logger::default())
            .configure(api::configure)
    })
    .shutdown_timeout(config.shutdown_timeout.as_secs())
    .bind(&config.http_addr)?
    .run()
    .await?;

    // === 7. Drain the dispatcher, then release the pool ===
    tracing::info!("🛑 HTTP server stopped, stopping outbox dispatcher");
    dispatcher.send(Stop).await?;
    pool.close().await;

    tracing::info!("👋 Shutdown complete");
    Ok(())
}

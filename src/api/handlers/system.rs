use actix_web::{http::StatusCode, web, HttpResponse};

use crate::actors::core::{ComponentHealth, HealthStatus, SystemHealth};
use crate::actors::GetDispatcherHealth;
use crate::api::AppState;
use crate::error::ErrorBody;
use crate::storage::postgres;

/// Liveness plus component health. 503 only when a component is unhealthy.
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let sources = &state.health;
    let mut components = Vec::new();

    if let Some(pool) = &sources.database {
        let status = match postgres::ping(pool).await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                tracing::warn!(error = %e, "Database health check failed");
                HealthStatus::Unhealthy("database unreachable".to_string())
            }
        };
        components.push(ComponentHealth::new("postgres", status));
    }

    components.extend(sources.checks.iter().map(|check| check.check_health()));

    if let Some(dispatcher) = &sources.dispatcher {
        let health = match dispatcher.send(GetDispatcherHealth).await {
            Ok(health) => health,
            Err(e) => ComponentHealth::new(
                "outbox_dispatcher",
                HealthStatus::Unhealthy(format!("dispatcher unreachable: {}", e)),
            ),
        };
        components.push(health);
    }

    let health = SystemHealth::from_components(components);
    let status = if health.status.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    HttpResponse::build(status).json(health)
}

pub async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    match state.metrics.render() {
        Ok(buffer) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().json(ErrorBody::new("Internal server error"))
        }
    }
}

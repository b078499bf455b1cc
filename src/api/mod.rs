use actix::Addr;
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::middleware::Next;
use actix_web::web;
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::actors::core::HealthCheckable;
use crate::actors::OutboxDispatcher;
use crate::auth::SessionManager;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::services::UserService;

pub mod dto;
mod handlers;

use handlers::{auth, system, users};

// ============================================================================
// HTTP API
// ============================================================================
//
// Routes (JSON):
// - GET  /health                    - component health, outside the versioned scope
// - POST /api/v1/register           - also served at /api/v1/user/register
// - POST /api/v1/login | refresh | logout
// - GET  /api/v1/user/{id}          - bearer
// - PATCH /api/v1/user/{id}         - admin, role change
// - GET  /api/v1/users              - bearer, paged search
// - PUT | DELETE /api/v1/users/{id} - admin
// - GET  /api/v1/metrics            - Prometheus text format
//
// ============================================================================

/// Shared by every worker through `web::Data`.
pub struct AppState {
    pub sessions: SessionManager,
    pub users: UserService,
    pub metrics: Arc<Metrics>,
    pub request_timeout: Duration,
    pub health: HealthSources,
}

/// What /health asks. Absent sources are simply not reported.
#[derive(Default)]
pub struct HealthSources {
    pub database: Option<PgPool>,
    pub checks: Vec<Arc<dyn HealthCheckable>>,
    pub dispatcher: Option<Addr<OutboxDispatcher>>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(path_config())
        .app_data(query_config())
        .route("/health", web::get().to(system::health))
        .service(
            web::scope("/api/v1")
                .route("/register", web::post().to(auth::register))
                .route("/user/register", web::post().to(auth::register))
                .route("/login", web::post().to(auth::login))
                .route("/refresh", web::post().to(auth::refresh))
                .route("/logout", web::post().to(auth::logout))
                .route("/metrics", web::get().to(system::metrics))
                .route("/users", web::get().to(users::list_users))
                .service(
                    web::resource("/user/{id}")
                        .route(web::get().to(users::get_user))
                        .route(web::patch().to(users::set_role)),
                )
                .service(
                    web::resource("/users/{id}")
                        .route(web::put().to(users::update_user))
                        .route(web::delete().to(users::delete_user)),
                ),
        );
}

/// Bound a request's work by `limit`; the future is dropped on expiry.
pub async fn with_timeout<T, F>(limit: Duration, work: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    tokio::time::timeout(limit, work)
        .await
        .map_err(|_| AppError::RequestTimeout)?
}

/// Request count and latency per matched route pattern.
pub async fn track_http_metrics(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let metrics = req
        .app_data::<web::Data<AppState>>()
        .map(|state| Arc::clone(&state.metrics));
    let method = req.method().to_string();
    let started = Instant::now();

    let res = next.call(req).await?;

    if let Some(metrics) = metrics {
        let route = res
            .request()
            .match_pattern()
            .unwrap_or_else(|| "unmatched".to_string());
        metrics.record_http(&method, &route, res.status().as_u16(), started.elapsed().as_secs_f64());
    }
    Ok(res)
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(16 * 1024)
        .error_handler(|err, _req| AppError::Validation(format!("Invalid request body: {}", err)).into())
}

fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|_err, _req| AppError::Validation("Invalid user ID".to_string()).into())
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| AppError::Validation(format!("Invalid query: {}", err)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::core::{ComponentHealth, HealthStatus};
    use crate::auth::password::PasswordHasher;
    use crate::auth::session_manager::tests::{PlainHasher, SECRET};
    use crate::auth::TokenIssuer;
    use crate::models::{NewUser, Role};
    use crate::storage::memory::MemoryStore;
    use crate::storage::UserRepository;
    use actix_web::http::StatusCode;
    use actix_web::middleware::from_fn;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    fn state_with(store: &MemoryStore, health: HealthSources) -> web::Data<AppState> {
        let metrics = Arc::new(Metrics::new().unwrap());
        let sessions = SessionManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(PlainHasher),
            TokenIssuer::new(SECRET, Duration::from_secs(900)),
            Arc::clone(&metrics),
        )
        .unwrap();

        web::Data::new(AppState {
            sessions,
            users: UserService::new(Arc::new(store.clone()), Arc::new(PlainHasher)),
            metrics,
            request_timeout: Duration::from_secs(5),
            health,
        })
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data($state.clone())
                    .wrap(from_fn(track_http_metrics))
                    .configure(configure),
            )
            .await
        };
    }

    macro_rules! post {
        ($uri:expr, $body:expr $(,)?) => {
            test::TestRequest::post().uri($uri).set_json($body).to_request()
        };
    }

    async fn seed_admin(store: &MemoryStore) -> i64 {
        store
            .create_user(NewUser {
                first_name: "Root".to_string(),
                last_name: "Admin".to_string(),
                email: "admin@x.com".to_string(),
                password_hash: PlainHasher.hash("adminpw").unwrap(),
                role: Role::Admin,
                phone: None,
            })
            .await
            .unwrap()
    }

    #[actix_web::test]
    async fn test_register_login_refresh_logout_flow() {
        let store = MemoryStore::new();
        let state = state_with(&store, HealthSources::default());
        let app = app!(state);

        let resp = test::call_service(
            &app,
            post!(
                "/api/v1/register",
                json!({"first_name": "Ada", "last_name": "Lovelace", "email": "ada@x.com", "password": "pw1"}),
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["id"], 1);

        let resp = test::call_service(&app, post!("/api/v1/login", json!({"email": "ada@x.com", "password": "pw1"}))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let first: Value = test::read_body_json(resp).await;
        assert!(first["accessToken"].is_string());
        let old_refresh = first["refreshToken"].as_str().unwrap().to_string();

        let resp = test::call_service(&app, post!("/api/v1/refresh", json!({"refreshToken": old_refresh}))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let second: Value = test::read_body_json(resp).await;
        let new_refresh = second["refreshToken"].as_str().unwrap().to_string();
        assert_ne!(old_refresh, new_refresh);

        let resp = test::call_service(&app, post!("/api/v1/refresh", json!({"refreshToken": old_refresh}))).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"status": "ERROR", "error": "Session not found"}));

        let resp = test::call_service(&app, post!("/api/v1/logout", json!({"refreshToken": new_refresh}))).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = test::call_service(&app, post!("/api/v1/refresh", json!({"refreshToken": new_refresh}))).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_register_rejections() {
        let store = MemoryStore::new();
        let state = state_with(&store, HealthSources::default());
        let app = app!(state);
        let body = json!({"email": "ada@x.com", "password": "pw1"});

        let resp = test::call_service(&app, post!("/api/v1/user/register", body.clone())).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = test::call_service(&app, post!("/api/v1/register", body)).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = test::call_service(&app, post!("/api/v1/register", json!({"email": "x@x.com", "password": "p"}))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(&app, post!("/api/v1/register", json!({"email": 5}))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "ERROR");

        let resp = test::call_service(&app, post!("/api/v1/login", json!({"email": "ada@x.com", "password": "bad"}))).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_admin_routes_require_admin_role() {
        let store = MemoryStore::new();
        seed_admin(&store).await;
        let state = state_with(&store, HealthSources::default());
        let app = app!(state);

        test::call_service(&app, post!("/api/v1/register", json!({"email": "ada@x.com", "password": "pw1"}))).await;

        let login = |email: &'static str, password: &'static str| post!("/api/v1/login", json!({"email": email, "password": password}));
        let user_pair: Value = test::read_body_json(test::call_service(&app, login("ada@x.com", "pw1")).await).await;
        let admin_pair: Value = test::read_body_json(test::call_service(&app, login("admin@x.com", "adminpw")).await).await;
        let bearer = |pair: &Value| format!("Bearer {}", pair["accessToken"].as_str().unwrap());

        // No token
        let req = test::TestRequest::patch()
            .uri("/api/v1/user/2")
            .set_json(json!({"role": "admin"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Authorization header is missing");

        // Plain user
        let req = test::TestRequest::patch()
            .uri("/api/v1/user/2")
            .insert_header(("Authorization", bearer(&user_pair)))
            .set_json(json!({"role": "admin"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Access denied: user is not an admin");

        // Admin
        let req = test::TestRequest::patch()
            .uri("/api/v1/user/2")
            .insert_header(("Authorization", bearer(&admin_pair)))
            .set_json(json!({"role": "admin"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["id"], 2);

        let req = test::TestRequest::patch()
            .uri("/api/v1/user/99")
            .insert_header(("Authorization", bearer(&admin_pair)))
            .set_json(json!({"role": "admin"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let events: Vec<String> = store.outbox().into_iter().map(|r| r.event_type).collect();
        assert_eq!(events, vec!["user_created", "user_created", "user_role_changed"]);
    }

    #[actix_web::test]
    async fn test_user_read_update_delete() {
        let store = MemoryStore::new();
        seed_admin(&store).await;
        let state = state_with(&store, HealthSources::default());
        let app = app!(state);

        test::call_service(&app, post!("/api/v1/register", json!({"email": "ada@x.com", "password": "pw1"}))).await;
        let admin_pair: Value = test::read_body_json(
            test::call_service(&app, post!("/api/v1/login", json!({"email": "admin@x.com", "password": "adminpw"}))).await,
        )
        .await;
        let auth = ("Authorization", format!("Bearer {}", admin_pair["accessToken"].as_str().unwrap()));

        let req = test::TestRequest::get().uri("/api/v1/user/2").insert_header(auth.clone()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let user: Value = test::read_body_json(resp).await;
        assert_eq!(user["email"], "ada@x.com");
        assert!(user.get("password_hash").is_none());

        let req = test::TestRequest::get().uri("/api/v1/user/abc").insert_header(auth.clone()).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::put()
            .uri("/api/v1/users/2")
            .insert_header(auth.clone())
            .set_json(json!({"first_name": "Ada", "last_name": "King", "email": "ada@x.com", "role": "user"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri("/api/v1/users?search=king&limit=10")
            .insert_header(auth.clone())
            .to_request();
        let page: Value = test::read_body_json(test::call_service(&app, req).await).await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["limit"], 10);
        assert_eq!(page["users"][0]["last_name"], "King");

        let req = test::TestRequest::delete().uri("/api/v1/users/2").insert_header(auth.clone()).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get().uri("/api/v1/user/2").insert_header(auth).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let last = store.outbox().pop().unwrap();
        assert_eq!(last.event_type, "user_deleted");
        assert_eq!(last.payload.id, 2);
    }

    #[actix_web::test]
    async fn test_malformed_bearer_headers_are_rejected() {
        let store = MemoryStore::new();
        let state = state_with(&store, HealthSources::default());
        let app = app!(state);

        for header in ["Basic YWRhOnB3", "Bearer ", "Bearer not.a.jwt"] {
            let req = test::TestRequest::get()
                .uri("/api/v1/users")
                .insert_header(("Authorization", header))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "header {:?}", header);
        }

        let req = test::TestRequest::get()
            .uri("/api/v1/users")
            .insert_header(("Authorization", "Basic YWRhOnB3"))
            .to_request();
        let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["error"], "Authorization header is invalid");
    }

    struct StaticHealth(HealthStatus);

    impl HealthCheckable for StaticHealth {
        fn check_health(&self) -> ComponentHealth {
            ComponentHealth::new("kafka", self.0.clone())
        }

        fn component_name(&self) -> &str {
            "kafka"
        }
    }

    #[actix_web::test]
    async fn test_health_reflects_components() {
        let store = MemoryStore::new();

        let state = state_with(
            &store,
            HealthSources {
                checks: vec![Arc::new(StaticHealth(HealthStatus::Degraded("half-open".to_string())))],
                ..HealthSources::default()
            },
        );
        let app = app!(state);
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["components"][0]["name"], "kafka");

        let state = state_with(
            &store,
            HealthSources {
                checks: vec![Arc::new(StaticHealth(HealthStatus::Unhealthy("open".to_string())))],
                ..HealthSources::default()
            },
        );
        let app = app!(state);
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_metrics_endpoint_reports_requests() {
        let store = MemoryStore::new();
        let state = state_with(&store, HealthSources::default());
        let app = app!(state);

        test::call_service(&app, post!("/api/v1/login", json!({"email": "ghost@x.com", "password": "pw1"}))).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/metrics").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let text = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();

        assert!(text.contains("http_requests_total"));
        assert!(text.contains("route=\"/api/v1/login\""));
        assert!(text.contains("auth_attempts_total{operation=\"login\",outcome=\"failure\"} 1"));
    }

    #[actix_web::test]
    async fn test_slow_work_times_out() {
        let result: AppResult<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(AppError::RequestTimeout)));
    }
}

use axum::{http::HeaderValue, middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};

use crate::admin::{stats, users as admin_users};
use crate::auth::handlers as auth_handlers;
use crate::auth::middleware::JwtSecret;
use crate::events::crud as event_crud;
use crate::state::AppState;
use crate::tasks::crud as task_crud;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    // Rate limiting on credential endpoints: 5 requests per minute per IP.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>.
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12) // 1 token every 12 seconds = 5 per minute
            .burst_size(5) // Allow burst of 5
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    let auth_routes = Router::new()
        .route("/api/auth/register", axum::routing::post(auth_handlers::register))
        .route("/api/auth/login", axum::routing::post(auth_handlers::login))
        .layer(GovernorLayer {
            config: governor_config,
        });

    // Authenticated routes (JWT required — Claims extractor validates token)
    let session_routes = Router::new()
        .route("/api/auth/profile", axum::routing::get(auth_handlers::profile))
        .route("/api/auth/password", axum::routing::put(auth_handlers::change_password));

    let task_routes = Router::new()
        .route("/api/tasks", axum::routing::get(task_crud::list_tasks))
        .route("/api/tasks", axum::routing::post(task_crud::create_task))
        .route("/api/tasks/{id}", axum::routing::get(task_crud::get_task))
        .route("/api/tasks/{id}", axum::routing::put(task_crud::update_task))
        .route("/api/tasks/{id}", axum::routing::delete(task_crud::delete_task))
        .route("/api/tasks/{id}/status", axum::routing::patch(task_crud::update_status));

    let event_routes = Router::new()
        .route("/api/events", axum::routing::get(event_crud::list_events))
        .route("/api/events", axum::routing::post(event_crud::create_event))
        .route("/api/events/{id}", axum::routing::get(event_crud::get_event))
        .route("/api/events/{id}", axum::routing::put(event_crud::update_event));

    // Admin routes (role check happens inside each handler)
    let admin_routes = Router::new()
        .route("/api/admin/statistics", axum::routing::get(stats::get_statistics))
        .route("/api/admin/users", axum::routing::get(admin_users::list_users))
        .route(
            "/api/admin/users/{id}/role",
            axum::routing::put(admin_users::change_role),
        )
        .route(
            "/api/admin/users/{id}/status",
            axum::routing::put(admin_users::change_status),
        );

    // WebSocket endpoint (auth via query param or Authorization header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    let cors = match cors_origin {
        "*" => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        origin => {
            let parsed = origin
                .parse::<HeaderValue>()
                .expect("Invalid CORS origin in config");
            CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    Router::new()
        .merge(auth_routes)
        .merge(session_routes)
        .merge(task_routes)
        .merge(event_routes)
        .merge(admin_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(cors)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

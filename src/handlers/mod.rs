// HTTP handlers and route builders

pub mod auth;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::app::AppState;

/// Routes that take no bearer token.
pub fn auth_public_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
}

/// Routes behind the authorization filter.
pub fn auth_protected_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout))
        .route(
            "/sessions",
            get(auth::list_sessions).delete(auth::revoke_all_sessions),
        )
}

/// GET /v1/health — component health for Postgres and Redis.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    use serde_json::json;

    let mut overall_healthy = true;
    let timestamp = chrono::Utc::now().to_rfc3339();

    let postgres_health = match &state.diesel_pool {
        Some(pool) => match crate::db::check_diesel_health(pool).await {
            Ok(()) => json!({ "status": "healthy", "error": null }),
            Err(e) => {
                overall_healthy = false;
                json!({
                    "status": "unhealthy",
                    "error": format!("Database connection failed: {}", e)
                })
            },
        },
        None => json!({ "status": "unconfigured" }),
    };

    let redis_health = match &state.redis_pool {
        Some(pool) => {
            let health = pool.health_check().await;
            if !health.is_healthy {
                overall_healthy = false;
            }
            json!({
                "status": if health.is_healthy { "healthy" } else { "unhealthy" },
                "latency_ms": health.latency_ms,
                "error": health.error
            })
        },
        None => json!({ "status": "unconfigured" }),
    };

    let response = json!({
        "status": if overall_healthy { "healthy" } else { "degraded" },
        "service": "authgate-core",
        "timestamp": timestamp,
        "components": {
            "postgresql": postgres_health,
            "redis": redis_health
        }
    });

    if overall_healthy {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// GET /v1/metrics — Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

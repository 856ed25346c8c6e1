// Library exports for the authgate core
// Exposes the token lifecycle services and HTTP plumbing for embedding and
// for the integration tests.

pub mod app;
pub mod app_config;
pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod schema;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use app::AppState;
pub use app_config::{AppConfig, ConfigError, Environment};
pub use config::{RateLimitSettings, RateLimitStrategy, ScopePolicy};
pub use db::{DieselPool, RedisConfig, RedisPool};
pub use middleware::{
    authorization_filter, correlation_middleware, AuthenticatedPrincipal, ClientIpResolver,
    RateLimitKeyResolver, RequestContext, CORRELATION_HEADER,
};
pub use models::auth::{JwtClaims, TokenUse};
pub use models::refresh_token::RefreshTokenRecord;
pub use models::user::{User, UserStatus};
pub use services::{
    AuthMetricsService, AuthenticationValidator, InMemoryLoginAttemptPolicy,
    InMemoryRefreshTokenStore, InMemorySessionRegistry, InMemoryTokenBlacklist,
    InMemoryUserAccountGateway, JwtError, KeyMaterial, KeyMaterialConfig, KeySource,
    LoginAttemptPolicy, LoginError, LoginUseCase, MintSpec, RefreshError, RefreshTokenStore,
    RefreshUseCase, SessionRegistry, StrictTokenValidator, TokenBlacklist, TokenCodec,
    TokenValidationError, UserAccountGateway,
};
pub use utils::{
    codes, ApiError, Argon2PasswordHasher, Clock, ManualClock, PasswordHasher, SharedClock,
    SystemClock,
};

use axum::{middleware as axum_middleware, routing::get, Router};

/// Assemble the full application router for a prepared state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/metrics", get(handlers::metrics))
        .nest(
            "/auth",
            handlers::auth_public_routes().merge(
                handlers::auth_protected_routes().route_layer(
                    axum_middleware::from_fn_with_state(state.clone(), authorization_filter),
                ),
            ),
        )
        .layer(axum_middleware::from_fn(correlation_middleware))
        .with_state(state)
}

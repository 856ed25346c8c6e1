// Application state shared across handlers
// Pools are optional the same way the service constructors treat them: test
// profiles assemble the state from in-memory components without any backing
// infrastructure.

use std::sync::Arc;

use crate::{
    app_config::AppConfig,
    db::{DieselPool, RedisPool},
    middleware::{ClientIpResolver, RateLimitKeyResolver},
    services::{
        AuditEventPublisher, AuthMetricsService, LoginUseCase, RefreshTokenStore, RefreshUseCase,
        SessionRegistry, StrictTokenValidator, TokenBlacklist, UserAccountGateway,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub diesel_pool: Option<DieselPool>,
    pub redis_pool: Option<RedisPool>,
    pub token_validator: Arc<StrictTokenValidator>,
    pub blacklist: Arc<dyn TokenBlacklist>,
    pub sessions: Arc<dyn SessionRegistry>,
    pub refresh_store: Arc<dyn RefreshTokenStore>,
    pub user_gateway: Arc<dyn UserAccountGateway>,
    pub login_use_case: Arc<LoginUseCase>,
    pub refresh_use_case: Arc<RefreshUseCase>,
    pub client_ip_resolver: Arc<ClientIpResolver>,
    pub rate_limit_key_resolver: Arc<RateLimitKeyResolver>,
    pub metrics: Arc<AuthMetricsService>,
    pub audit: Arc<dyn AuditEventPublisher>,
}

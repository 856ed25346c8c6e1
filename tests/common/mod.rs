// Common test utilities
// Builds the full HTTP application on in-memory stores, a manual clock and
// HMAC test keys, so the token lifecycle can be driven end to end without
// Postgres or Redis.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

use authgate_core::{
    app::AppState,
    app_config::{
        AppConfig, DatabaseSettings, Environment, JwtSettings, KeySourceKind, NetworkSettings,
        RedisSettings,
    },
    build_router,
    config::rate_limit::RateLimitSettings,
    middleware::{ClientIpResolver, RateLimitKeyResolver},
    services::login::LoginConfig,
    services::refresh::RefreshConfig,
    services::{
        AuthMetricsService, AuthenticationValidator, InMemoryLoginAttemptPolicy,
        InMemoryRefreshTokenStore, InMemorySessionRegistry, InMemoryTokenBlacklist,
        InMemoryUserAccountGateway, KeyMaterial, KeyMaterialConfig, KeySource, LoginUseCase,
        RefreshUseCase, StrictTokenValidator, TokenCodec, TracingAuditPublisher,
    },
    Argon2PasswordHasher, ManualClock, PasswordHasher, ScopePolicy, SharedClock, User, UserStatus,
};

pub const TEST_SECRET: &str =
    "integration-test-hmac-secret-that-clears-the-sixty-four-byte-minimum-easily";

pub const ISSUER: &str = "auth.example.com";
pub const ACCESS_AUDIENCE: &str = "api.example.com";
pub const REFRESH_AUDIENCE: &str = "refresh.example.com";

pub const ACCESS_TTL: u64 = 900;
pub const REFRESH_TTL: u64 = 604_800;

/// Test application wrapper
pub struct TestApp {
    pub router: Router,
    pub clock: ManualClock,
    pub codec: Arc<TokenCodec>,
    pub refresh_store: Arc<InMemoryRefreshTokenStore>,
    pub blacklist: Arc<InMemoryTokenBlacklist>,
    pub sessions: Arc<InMemorySessionRegistry>,
    pub gateway: Arc<InMemoryUserAccountGateway>,
    pub hasher: Arc<Argon2PasswordHasher>,
}

pub fn fast_hasher() -> Arc<Argon2PasswordHasher> {
    Arc::new(Argon2PasswordHasher::new(
        authgate_core::utils::password::PasswordConfig {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
            output_length: 32,
        },
    ))
}

fn test_config(rotate: bool) -> AppConfig {
    AppConfig {
        bind_address: "127.0.0.1:0".to_string(),
        environment: Environment::Test,
        rust_log: "debug".to_string(),
        database: DatabaseSettings {
            url: "postgresql://unused/test".to_string(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: 1,
        },
        redis: RedisSettings {
            url: "redis://unused:6379".to_string(),
            pool_size: 1,
            connection_timeout: 1,
            command_timeout: 1,
            retry_attempts: 1,
            retry_delay_ms: 1,
        },
        jwt: JwtSettings {
            issuer: ISSUER.to_string(),
            access_audience: ACCESS_AUDIENCE.to_string(),
            refresh_audience: REFRESH_AUDIENCE.to_string(),
            access_ttl_seconds: ACCESS_TTL,
            refresh_ttl_seconds: REFRESH_TTL,
            active_kid: "k1".to_string(),
            verification_kids: vec!["k1".to_string()],
            key_source: KeySourceKind::Hmac,
            rsa_key_dir: None::<PathBuf>,
            rsa_private_key_pem: None,
            rsa_public_key_pems: HashMap::new(),
            hmac_secret: Some(TEST_SECRET.to_string()),
            rotate_refresh_tokens: rotate,
            clock_skew_seconds: 0,
        },
        rate_limit: RateLimitSettings {
            max_attempts: 3,
            window_seconds: 60,
            block_seconds: 60,
            ..RateLimitSettings::default()
        },
        network: NetworkSettings {
            trusted_proxy_cidrs: vec!["10.0.0.0/8".parse().unwrap()],
        },
        cors_allowed_origins: vec![],
        role_scopes_json: None,
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_rotation(true)
    }

    pub fn with_rotation(rotate: bool) -> Self {
        let config = test_config(rotate);
        let manual = ManualClock::at(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let clock: SharedClock = Arc::new(manual.clone());

        let keys = Arc::new(
            KeyMaterial::from_config(&KeyMaterialConfig {
                source: KeySource::Hmac {
                    secret: TEST_SECRET.to_string(),
                },
                active_kid: config.jwt.active_kid.clone(),
                verification_kids: config.jwt.verification_kids.clone(),
            })
            .expect("test key material"),
        );

        let codec = Arc::new(TokenCodec::new(keys, ISSUER, 0, clock.clone()));
        let token_validator = Arc::new(StrictTokenValidator::new(
            codec.clone(),
            ACCESS_AUDIENCE,
            REFRESH_AUDIENCE,
        ));

        let refresh_store = Arc::new(InMemoryRefreshTokenStore::new(clock.clone()));
        let blacklist = Arc::new(InMemoryTokenBlacklist::new(clock.clone()));
        let sessions = Arc::new(InMemorySessionRegistry::new(clock.clone()));
        let attempts = Arc::new(InMemoryLoginAttemptPolicy::new(
            config.rate_limit.clone(),
            clock.clone(),
        ));
        let gateway = Arc::new(InMemoryUserAccountGateway::new());
        let hasher = fast_hasher();
        let scope_policy = Arc::new(ScopePolicy::with_defaults());
        let metrics = Arc::new(AuthMetricsService::new().expect("metrics"));
        let audit = Arc::new(TracingAuditPublisher);

        let login_use_case = Arc::new(LoginUseCase::new(
            attempts,
            AuthenticationValidator::new(gateway.clone(), hasher.clone()),
            scope_policy.clone(),
            codec.clone(),
            refresh_store.clone(),
            sessions.clone(),
            metrics.clone(),
            audit.clone(),
            LoginConfig {
                access_ttl_seconds: ACCESS_TTL,
                refresh_ttl_seconds: REFRESH_TTL,
                access_audience: ACCESS_AUDIENCE.to_string(),
                refresh_audience: REFRESH_AUDIENCE.to_string(),
                rate_limit_enabled: true,
            },
        ));

        let refresh_use_case = Arc::new(RefreshUseCase::new(
            token_validator.clone(),
            gateway.clone(),
            scope_policy,
            codec.clone(),
            refresh_store.clone(),
            blacklist.clone(),
            sessions.clone(),
            metrics.clone(),
            audit.clone(),
            RefreshConfig {
                access_ttl_seconds: ACCESS_TTL,
                refresh_ttl_seconds: REFRESH_TTL,
                access_audience: ACCESS_AUDIENCE.to_string(),
                refresh_audience: REFRESH_AUDIENCE.to_string(),
                rotate_refresh_tokens: rotate,
            },
            clock,
        ));

        let state = AppState {
            config: Arc::new(config.clone()),
            diesel_pool: None,
            redis_pool: None,
            token_validator,
            blacklist: blacklist.clone(),
            sessions: sessions.clone(),
            refresh_store: refresh_store.clone(),
            user_gateway: gateway.clone(),
            login_use_case,
            refresh_use_case,
            client_ip_resolver: Arc::new(ClientIpResolver::new(
                config.network.trusted_proxy_cidrs.clone(),
            )),
            rate_limit_key_resolver: Arc::new(RateLimitKeyResolver::new(
                config.rate_limit.strategy,
            )),
            metrics,
            audit,
        };

        TestApp {
            router: build_router(state),
            clock: manual,
            codec,
            refresh_store,
            blacklist,
            sessions,
            gateway,
            hasher,
        }
    }

    /// Seed an ACTIVE admin user with the canonical test credentials.
    pub fn seed_admin(&self) {
        self.seed_user("admin", "admin123", UserStatus::Active, &["ROLE_ADMIN"]);
    }

    pub fn seed_user(&self, username: &str, password: &str, status: UserStatus, roles: &[&str]) {
        let now = Utc::now();
        self.gateway.insert(User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{}@example.com", username),
            password_hash: self.hasher.hash(password).expect("hash"),
            status,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            created_at: now,
            updated_at: now,
        });
    }

    /// Send a request through the router with a fixed peer address.
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.send_from("203.0.113.7:44188".parse().unwrap(), request)
            .await
    }

    /// Send a request with an explicit peer address, as the listener would
    /// record it.
    pub async fn send_from(&self, addr: SocketAddr, mut request: Request<Body>) -> Response {
        request.extensions_mut().insert(ConnectInfo(addr));

        self.router.clone().oneshot(request).await.expect("infallible")
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn get_with_bearer(&self, uri: &str, token: &str) -> Response {
        self.send(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header("authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn login(&self, username: &str, password: &str) -> Response {
        self.post_json(
            "/auth/login",
            serde_json::json!({ "usernameOrEmail": username, "password": password }),
        )
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Response {
        self.post_json(
            "/auth/refresh",
            serde_json::json!({ "refreshToken": refresh_token }),
        )
        .await
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub async fn assert_status_and_body(
    response: Response,
    expected: StatusCode,
) -> serde_json::Value {
    assert_eq!(response.status(), expected);
    json_body(response).await
}

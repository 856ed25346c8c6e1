use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use authgate_core::{
    app::AppState,
    app_config::AppConfig,
    build_router,
    db::{create_diesel_pool, mask_connection_string, DieselDatabaseConfig, RedisConfig, RedisPool},
    middleware::{ClientIpResolver, RateLimitKeyResolver},
    migrations,
    services::{
        AuthMetricsService, AuthenticationValidator, DieselUserAccountGateway, KeyMaterial,
        LoginUseCase, RedisLoginAttemptPolicy, RedisRefreshTokenStore, RedisSessionRegistry,
        RedisTokenBlacklist, RefreshUseCase, StrictTokenValidator, TokenCodec,
        TracingAuditPublisher,
    },
    services::login::LoginConfig,
    services::refresh::RefreshConfig,
    utils::{Argon2PasswordHasher, SharedClock, SystemClock},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Handle version flag for container health checks - must be FIRST
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "--version" {
        println!("authgate-core v{}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authgate_core=debug,axum=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    // Load and validate configuration; any failure aborts before the
    // listener opens
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("✗ Configuration loading failed: {}", e);
            anyhow::bail!("configuration invalid: {}", e);
        },
    };
    if let Err(e) = config.validate() {
        error!("✗ Configuration validation failed: {}", e);
        anyhow::bail!("configuration invalid: {}", e);
    }

    info!("=== STARTING AUTHGATE CORE ===");
    info!("Environment: {}", config.environment);
    info!("Binding on {}", config.bind_address);

    // Load key material (fail fast on bad keys)
    info!("Loading JWT key material...");
    let key_config = config.jwt.key_material_config()?;
    let keys = match KeyMaterial::from_config(&key_config) {
        Ok(keys) => Arc::new(keys),
        Err(e) => {
            error!("✗ Key material loading failed: {}", e);
            anyhow::bail!("key material invalid: {}", e);
        },
    };

    // Initialize database pool
    info!("Initializing database pool...");
    info!("Database URL: {}", mask_connection_string(&config.database.url));
    let diesel_pool =
        match create_diesel_pool(DieselDatabaseConfig::from_settings(&config.database)).await {
            Ok(pool) => {
                info!("✓ Database connection pool initialized");
                pool
            },
            Err(e) => {
                error!("✗ Failed to initialize database pool: {}", e);
                anyhow::bail!("database initialization failed: {}", e);
            },
        };

    // Run embedded migrations
    info!("Running embedded migrations...");
    migrations::run_migrations(config.database.url.clone())
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    // Initialize Redis pool
    info!("Initializing Redis pool...");
    let redis_pool = match RedisPool::new(RedisConfig::from_settings(&config.redis)).await {
        Ok(pool) => {
            info!("✓ Redis connection pool initialized");
            pool
        },
        Err(e) => {
            error!("✗ Failed to initialize Redis pool: {}", e);
            anyhow::bail!("redis initialization failed: {}", e);
        },
    };

    // Assemble services
    let clock: SharedClock = Arc::new(SystemClock);
    let jwt = &config.jwt;

    let codec = Arc::new(TokenCodec::new(
        keys,
        jwt.issuer.clone(),
        jwt.clock_skew_seconds,
        clock.clone(),
    ));
    let token_validator = Arc::new(StrictTokenValidator::new(
        codec.clone(),
        jwt.access_audience.clone(),
        jwt.refresh_audience.clone(),
    ));

    let refresh_store = Arc::new(RedisRefreshTokenStore::new(
        redis_pool.clone(),
        jwt.issuer.clone(),
        clock.clone(),
    ));
    let blacklist = Arc::new(RedisTokenBlacklist::new(redis_pool.clone(), clock.clone()));
    let sessions = Arc::new(RedisSessionRegistry::new(redis_pool.clone(), clock.clone()));
    let attempts = Arc::new(RedisLoginAttemptPolicy::new(
        redis_pool.clone(),
        config.rate_limit.clone(),
    ));

    let user_gateway = Arc::new(DieselUserAccountGateway::new(diesel_pool.clone()));
    let hasher = Arc::new(Argon2PasswordHasher::default());
    let scope_policy = Arc::new(config.scope_policy()?);
    let metrics = Arc::new(AuthMetricsService::new()?);
    let audit = Arc::new(TracingAuditPublisher);

    let login_use_case = Arc::new(LoginUseCase::new(
        attempts,
        AuthenticationValidator::new(user_gateway.clone(), hasher),
        scope_policy.clone(),
        codec.clone(),
        refresh_store.clone(),
        sessions.clone(),
        metrics.clone(),
        audit.clone(),
        LoginConfig {
            access_ttl_seconds: jwt.access_ttl_seconds,
            refresh_ttl_seconds: jwt.refresh_ttl_seconds,
            access_audience: jwt.access_audience.clone(),
            refresh_audience: jwt.refresh_audience.clone(),
            rate_limit_enabled: config.rate_limit.enabled,
        },
    ));

    let refresh_use_case = Arc::new(RefreshUseCase::new(
        token_validator.clone(),
        user_gateway.clone(),
        scope_policy,
        codec.clone(),
        refresh_store.clone(),
        blacklist.clone(),
        sessions.clone(),
        metrics.clone(),
        audit.clone(),
        RefreshConfig {
            access_ttl_seconds: jwt.access_ttl_seconds,
            refresh_ttl_seconds: jwt.refresh_ttl_seconds,
            access_audience: jwt.access_audience.clone(),
            refresh_audience: jwt.refresh_audience.clone(),
            rotate_refresh_tokens: jwt.rotate_refresh_tokens,
        },
        clock,
    ));

    let client_ip_resolver = Arc::new(ClientIpResolver::new(
        config.network.trusted_proxy_cidrs.clone(),
    ));
    let rate_limit_key_resolver = Arc::new(RateLimitKeyResolver::new(config.rate_limit.strategy));

    let app_state = AppState {
        config: Arc::new(config.clone()),
        diesel_pool: Some(diesel_pool),
        redis_pool: Some(redis_pool),
        token_validator,
        blacklist,
        sessions,
        refresh_store,
        user_gateway,
        login_use_case,
        refresh_use_case,
        client_ip_resolver,
        rate_limit_key_resolver,
        metrics,
        audit,
    };

    // CORS: whitelist mode from configuration
    let cors = if config.cors_allowed_origins.is_empty() {
        CorsLayer::new()
    } else {
        let origins: Vec<_> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    let app = build_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Bind and serve with peer addresses available to the IP resolver
    let addr: SocketAddr = config.bind_address.parse()?;
    info!("Starting HTTP server on {}...", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// Service layer modules

pub mod accounts;
pub mod audit;
pub mod blacklist;
pub mod jwt;
pub mod keys;
pub mod login;
pub mod login_attempts;
pub mod metrics;
pub mod refresh;
pub mod refresh_store;
pub mod sessions;
pub mod token_validator;

pub use accounts::{
    AuthenticationError, AuthenticationValidator, DieselUserAccountGateway, GatewayError,
    InMemoryUserAccountGateway, UserAccountGateway,
};
pub use audit::{AuditEvent, AuditEventPublisher, RecordingAuditPublisher, TracingAuditPublisher};
pub use blacklist::{BlacklistError, InMemoryTokenBlacklist, RedisTokenBlacklist, TokenBlacklist};
pub use jwt::{JwtError, MintSpec, MintedToken, TokenCodec};
pub use keys::{derive_public_pem, KeyMaterial, KeyMaterialConfig, KeyMaterialError, KeySource};
pub use login::{LoginCommand, LoginConfig, LoginError, LoginOutcome, LoginUseCase};
pub use login_attempts::{
    AttemptDecision, AttemptError, InMemoryLoginAttemptPolicy, LoginAttemptPolicy,
    RedisLoginAttemptPolicy,
};
pub use metrics::AuthMetricsService;
pub use refresh::{RefreshConfig, RefreshError, RefreshOutcome, RefreshUseCase};
pub use refresh_store::{
    InMemoryRefreshTokenStore, RedisRefreshTokenStore, RefreshStoreError, RefreshTokenStore,
};
pub use sessions::{
    InMemorySessionRegistry, RedisSessionRegistry, SessionEntry, SessionError, SessionRegistry,
};
pub use token_validator::{StrictTokenValidator, TokenValidationError};

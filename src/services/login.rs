// Login orchestration
// Attempt policy runs before any credential work so the account store never
// sees unauthenticated floods. Tokens are only returned once the refresh
// record is durably persisted.

use axum::http::StatusCode;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::scope_policy::ScopePolicy;
use crate::models::auth::TokenUse;
use crate::models::refresh_token::RefreshTokenRecord;
use crate::services::accounts::{AuthenticationError, AuthenticationValidator};
use crate::services::audit::{AuditEvent, AuditEventPublisher};
use crate::services::jwt::{MintSpec, TokenCodec};
use crate::services::login_attempts::LoginAttemptPolicy;
use crate::services::metrics::AuthMetricsService;
use crate::services::refresh_store::RefreshTokenStore;
use crate::services::sessions::SessionRegistry;
use crate::utils::auth_errors::codes;

#[derive(Error, Debug)]
pub enum LoginError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account locked")]
    UserLocked,

    #[error("account disabled")]
    UserDisabled,

    #[error("account deleted")]
    UserDeleted,

    #[error("too many attempts")]
    RateLimited { retry_after_seconds: u64 },

    #[error("login failed: {0}")]
    Internal(String),
}

impl LoginError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            LoginError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            LoginError::UserLocked | LoginError::UserDisabled | LoginError::UserDeleted => {
                StatusCode::FORBIDDEN
            },
            LoginError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            LoginError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            LoginError::InvalidCredentials => codes::INVALID_CREDENTIALS,
            LoginError::UserLocked => codes::USER_LOCKED,
            LoginError::UserDisabled => codes::USER_DISABLED,
            LoginError::UserDeleted => codes::USER_DELETED,
            LoginError::RateLimited { .. } => codes::RATE_LIMITED,
            LoginError::Internal(_) => codes::INTERNAL,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            LoginError::RateLimited {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

impl From<AuthenticationError> for LoginError {
    fn from(err: AuthenticationError) -> Self {
        match err {
            AuthenticationError::InvalidCredentials => LoginError::InvalidCredentials,
            AuthenticationError::UserLocked => LoginError::UserLocked,
            AuthenticationError::UserDisabled => LoginError::UserDisabled,
            AuthenticationError::UserDeleted => LoginError::UserDeleted,
            AuthenticationError::Gateway(e) => LoginError::Internal(e.to_string()),
        }
    }
}

/// Token TTLs and audiences for minting.
#[derive(Debug, Clone)]
pub struct LoginConfig {
    pub access_ttl_seconds: u64,
    pub refresh_ttl_seconds: u64,
    pub access_audience: String,
    pub refresh_audience: String,
    pub rate_limit_enabled: bool,
}

/// One login request as seen by the use case.
#[derive(Debug, Clone)]
pub struct LoginCommand {
    pub username_or_email: String,
    pub password: String,
    pub rate_limit_key: String,
    pub client_ip: String,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry of the access token, epoch seconds
    pub access_expires_at: u64,
}

pub struct LoginUseCase {
    attempts: Arc<dyn LoginAttemptPolicy>,
    authenticator: AuthenticationValidator,
    scope_policy: Arc<ScopePolicy>,
    codec: Arc<TokenCodec>,
    refresh_store: Arc<dyn RefreshTokenStore>,
    sessions: Arc<dyn SessionRegistry>,
    metrics: Arc<AuthMetricsService>,
    audit: Arc<dyn AuditEventPublisher>,
    config: LoginConfig,
}

impl LoginUseCase {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        attempts: Arc<dyn LoginAttemptPolicy>,
        authenticator: AuthenticationValidator,
        scope_policy: Arc<ScopePolicy>,
        codec: Arc<TokenCodec>,
        refresh_store: Arc<dyn RefreshTokenStore>,
        sessions: Arc<dyn SessionRegistry>,
        metrics: Arc<AuthMetricsService>,
        audit: Arc<dyn AuditEventPublisher>,
        config: LoginConfig,
    ) -> Self {
        Self {
            attempts,
            authenticator,
            scope_policy,
            codec,
            refresh_store,
            sessions,
            metrics,
            audit,
            config,
        }
    }

    pub async fn execute(&self, command: LoginCommand) -> Result<LoginOutcome, LoginError> {
        // Attempt accounting comes first: a blocked caller never reaches the
        // account store, and a failed login is already counted here.
        if self.config.rate_limit_enabled {
            match self.attempts.register_attempt(&command.rate_limit_key).await {
                Ok(decision) if !decision.allowed => {
                    self.metrics.bruteforce_detected.inc();
                    self.audit.publish(AuditEvent::BruteForceBlocked {
                        rate_limit_key: command.rate_limit_key.clone(),
                        retry_after_seconds: decision.retry_after_seconds,
                    });
                    return Err(LoginError::RateLimited {
                        retry_after_seconds: decision.retry_after_seconds,
                    });
                },
                Ok(_) => {},
                Err(e) => {
                    // Fail open: a broken limiter must not take down login
                    warn!(error = %e, "attempt policy unavailable, continuing");
                },
            }
        }

        let user = match self
            .authenticator
            .validate(&command.username_or_email, &command.password)
            .await
        {
            Ok(user) => user,
            Err(err) => {
                let mapped = LoginError::from(err);
                self.metrics.login_failure.inc();
                if matches!(mapped, LoginError::UserLocked) {
                    self.metrics.user_locked.inc();
                }
                self.audit.publish(AuditEvent::LoginFailed {
                    username: command.username_or_email.clone(),
                    client_ip: command.client_ip.clone(),
                    error_code: mapped.error_code(),
                });
                return Err(mapped);
            },
        };

        let scopes: Vec<String> = self
            .scope_policy
            .resolve_scopes(&user.roles)
            .into_iter()
            .collect();

        let family_id = Uuid::new_v4().to_string();

        let access = self
            .codec
            .mint(MintSpec {
                subject: user.username.clone(),
                roles: user.roles.clone(),
                scopes,
                ttl_seconds: self.config.access_ttl_seconds,
                audience: self.config.access_audience.clone(),
                token_use: TokenUse::Access,
            })
            .map_err(|e| LoginError::Internal(e.to_string()))?;

        let refresh = self
            .codec
            .mint(MintSpec {
                subject: user.username.clone(),
                roles: Vec::new(),
                scopes: Vec::new(),
                ttl_seconds: self.config.refresh_ttl_seconds,
                audience: self.config.refresh_audience.clone(),
                token_use: TokenUse::Refresh,
            })
            .map_err(|e| LoginError::Internal(e.to_string()))?;

        let issued_at = Utc
            .timestamp_opt(refresh.claims.iat as i64, 0)
            .single()
            .ok_or_else(|| LoginError::Internal("unrepresentable issue time".to_string()))?;
        let expires_at = Utc
            .timestamp_opt(refresh.claims.exp as i64, 0)
            .single()
            .ok_or_else(|| LoginError::Internal("unrepresentable expiry".to_string()))?;

        let record = RefreshTokenRecord {
            jti: refresh.claims.jti.clone(),
            username: user.username.clone(),
            family_id,
            previous_jti: None,
            revoked: false,
            issued_at,
            expires_at,
            client_ip: Some(command.client_ip.clone()),
            user_agent: command.user_agent.clone(),
        };

        // No tokens leave this function unless the refresh metadata is
        // persisted: a token without a record would be unrefreshable and
        // unrevokable.
        self.refresh_store
            .save(&record)
            .await
            .map_err(|e| LoginError::Internal(e.to_string()))?;

        if let Err(e) = self
            .sessions
            .register_session(&user.username, &refresh.claims.jti, expires_at)
            .await
        {
            warn!(username = %user.username, error = %e, "session registration failed");
        }

        if self.config.rate_limit_enabled {
            if let Err(e) = self.attempts.reset_attempts(&command.rate_limit_key).await {
                warn!(error = %e, "attempt reset failed");
            }
        }

        self.metrics.login_success.inc();
        self.audit.publish(AuditEvent::LoginSucceeded {
            username: user.username.clone(),
            client_ip: command.client_ip.clone(),
        });
        info!(username = %user.username, "login succeeded");

        Ok(LoginOutcome {
            access_token: access.token,
            refresh_token: refresh.token,
            access_expires_at: access.claims.exp,
        })
    }
}

// Refresh rotation core
// Reuse detection is the load-bearing property here: any presentation of a
// revoked family member kills the whole family, and the consume-once mark
// serializes concurrent rotations of the same token so exactly one wins.

use axum::http::StatusCode;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::scope_policy::ScopePolicy;
use crate::models::auth::TokenUse;
use crate::models::refresh_token::RefreshTokenRecord;
use crate::models::user::UserStatus;
use crate::services::accounts::UserAccountGateway;
use crate::services::audit::{AuditEvent, AuditEventPublisher};
use crate::services::blacklist::TokenBlacklist;
use crate::services::jwt::{JwtError, MintSpec, TokenCodec};
use crate::services::metrics::AuthMetricsService;
use crate::services::refresh_store::RefreshTokenStore;
use crate::services::sessions::SessionRegistry;
use crate::services::token_validator::{StrictTokenValidator, TokenValidationError};
use crate::utils::auth_errors::codes;
use crate::utils::clock::SharedClock;

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error(transparent)]
    Validation(#[from] TokenValidationError),

    #[error("refresh token unknown")]
    Unknown,

    #[error("refresh token expired")]
    Expired,

    #[error("refresh token reuse detected")]
    Reuse,

    #[error("account locked")]
    UserLocked,

    #[error("account disabled")]
    UserDisabled,

    #[error("account deleted")]
    UserDeleted,

    #[error("refresh failed: {0}")]
    Internal(String),
}

impl RefreshError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RefreshError::Validation(_)
            | RefreshError::Unknown
            | RefreshError::Expired
            | RefreshError::Reuse => StatusCode::UNAUTHORIZED,
            RefreshError::UserLocked | RefreshError::UserDisabled | RefreshError::UserDeleted => {
                StatusCode::FORBIDDEN
            },
            RefreshError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            // On the refresh path an expired token is a refresh expiry
            RefreshError::Validation(TokenValidationError::Jwt(JwtError::Expired)) => {
                codes::REFRESH_EXPIRED
            },
            RefreshError::Validation(e) => e.error_code(),
            RefreshError::Unknown => codes::REFRESH_UNKNOWN,
            RefreshError::Expired => codes::REFRESH_EXPIRED,
            RefreshError::Reuse => codes::REFRESH_REUSE,
            RefreshError::UserLocked => codes::USER_LOCKED,
            RefreshError::UserDisabled => codes::USER_DISABLED,
            RefreshError::UserDeleted => codes::USER_DELETED,
            RefreshError::Internal(_) => codes::INTERNAL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub access_ttl_seconds: u64,
    pub refresh_ttl_seconds: u64,
    pub access_audience: String,
    pub refresh_audience: String,
    /// With rotation off a refresh returns a new access token and keeps the
    /// presented refresh token alive; use-after-revocation detection stays on.
    pub rotate_refresh_tokens: bool,
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: u64,
}

pub struct RefreshUseCase {
    validator: Arc<StrictTokenValidator>,
    gateway: Arc<dyn UserAccountGateway>,
    scope_policy: Arc<ScopePolicy>,
    codec: Arc<TokenCodec>,
    refresh_store: Arc<dyn RefreshTokenStore>,
    blacklist: Arc<dyn TokenBlacklist>,
    sessions: Arc<dyn SessionRegistry>,
    metrics: Arc<AuthMetricsService>,
    audit: Arc<dyn AuditEventPublisher>,
    config: RefreshConfig,
    clock: SharedClock,
}

impl RefreshUseCase {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        validator: Arc<StrictTokenValidator>,
        gateway: Arc<dyn UserAccountGateway>,
        scope_policy: Arc<ScopePolicy>,
        codec: Arc<TokenCodec>,
        refresh_store: Arc<dyn RefreshTokenStore>,
        blacklist: Arc<dyn TokenBlacklist>,
        sessions: Arc<dyn SessionRegistry>,
        metrics: Arc<AuthMetricsService>,
        audit: Arc<dyn AuditEventPublisher>,
        config: RefreshConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            validator,
            gateway,
            scope_policy,
            codec,
            refresh_store,
            blacklist,
            sessions,
            metrics,
            audit,
            config,
            clock,
        }
    }

    pub async fn execute(&self, raw_token: &str) -> Result<RefreshOutcome, RefreshError> {
        let claims = self.validator.validate_refresh(raw_token)?;

        let record = self
            .refresh_store
            .find_by_jti(&claims.jti)
            .await
            .map_err(|e| RefreshError::Internal(e.to_string()))?
            .ok_or(RefreshError::Unknown)?;

        if record.revoked {
            return Err(self.handle_reuse(&record, &claims.jti).await);
        }

        let now = self.clock.now();
        if record.is_expired(now) {
            return Err(RefreshError::Expired);
        }

        if self.config.rotate_refresh_tokens {
            // Sole serialization point: of two concurrent rotations of the
            // same token, exactly one passes this mark.
            let consumed = self
                .refresh_store
                .consume_once(&record.jti, record.remaining_seconds(now))
                .await
                .map_err(|e| RefreshError::Internal(e.to_string()))?;

            if !consumed {
                return Err(self.handle_reuse(&record, &claims.jti).await);
            }
        }

        let user = self
            .gateway
            .find_by_username_or_email(&record.username)
            .await
            .map_err(|e| RefreshError::Internal(e.to_string()))?
            .ok_or(RefreshError::Unknown)?;

        match user.status {
            UserStatus::Active => {},
            UserStatus::Locked => return Err(RefreshError::UserLocked),
            UserStatus::Disabled => return Err(RefreshError::UserDisabled),
            UserStatus::Deleted => return Err(RefreshError::UserDeleted),
        }

        let scopes: Vec<String> = self
            .scope_policy
            .resolve_scopes(&user.roles)
            .into_iter()
            .collect();

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
            .map_err(|e| self.rotation_failure(e.to_string()))?;

        if !self.config.rotate_refresh_tokens {
            self.metrics.token_refresh.inc();
            return Ok(RefreshOutcome {
                access_token: access.token,
                refresh_token: raw_token.to_string(),
                access_expires_at: access.claims.exp,
            });
        }

        let next = self
            .codec
            .mint(MintSpec {
                subject: user.username.clone(),
                roles: Vec::new(),
                scopes: Vec::new(),
                ttl_seconds: self.config.refresh_ttl_seconds,
                audience: self.config.refresh_audience.clone(),
                token_use: TokenUse::Refresh,
            })
            .map_err(|e| self.rotation_failure(e.to_string()))?;

        let issued_at = Utc
            .timestamp_opt(next.claims.iat as i64, 0)
            .single()
            .ok_or_else(|| self.rotation_failure("unrepresentable issue time".to_string()))?;
        let expires_at = Utc
            .timestamp_opt(next.claims.exp as i64, 0)
            .single()
            .ok_or_else(|| self.rotation_failure("unrepresentable expiry".to_string()))?;

        let next_record = RefreshTokenRecord {
            jti: next.claims.jti.clone(),
            username: record.username.clone(),
            family_id: record.family_id.clone(),
            previous_jti: Some(record.jti.clone()),
            revoked: false,
            issued_at,
            expires_at,
            client_ip: record.client_ip.clone(),
            user_agent: record.user_agent.clone(),
        };

        self.refresh_store
            .save(&next_record)
            .await
            .map_err(|e| self.rotation_failure(e.to_string()))?;

        // Retire the consumed token: record flips revoked, jti is
        // tombstoned for its remaining lifetime.
        self.refresh_store
            .revoke(&record.jti)
            .await
            .map_err(|e| self.rotation_failure(e.to_string()))?;
        self.blacklist
            .revoke(&record.jti, record.expires_at)
            .await
            .map_err(|e| self.rotation_failure(e.to_string()))?;

        if let Err(e) = self
            .sessions
            .remove_session(&record.username, &record.jti)
            .await
        {
            warn!(username = %record.username, error = %e, "session removal failed");
        }
        if let Err(e) = self
            .sessions
            .register_session(&record.username, &next.claims.jti, expires_at)
            .await
        {
            warn!(username = %record.username, error = %e, "session registration failed");
        }

        self.metrics.token_refresh.inc();
        self.audit.publish(AuditEvent::RefreshRotated {
            username: record.username.clone(),
            old_jti: record.jti.clone(),
            new_jti: next.claims.jti.clone(),
        });
        info!(username = %record.username, "refresh token rotated");

        Ok(RefreshOutcome {
            access_token: access.token,
            refresh_token: next.token,
            access_expires_at: access.claims.exp,
        })
    }

    /// A revoked member of a live family was presented, or a concurrent
    /// rotation lost the consume race: kill the family.
    async fn handle_reuse(&self, record: &RefreshTokenRecord, presented_jti: &str) -> RefreshError {
        if let Err(e) = self.refresh_store.revoke_family(&record.family_id).await {
            return RefreshError::Internal(format!("family revocation failed: {}", e));
        }

        if let Err(e) = self
            .blacklist
            .revoke(presented_jti, record.expires_at)
            .await
        {
            return RefreshError::Internal(format!("blacklist write failed: {}", e));
        }

        self.metrics.refresh_reused.inc();
        self.audit.publish(AuditEvent::RefreshReuseDetected {
            username: record.username.clone(),
            jti: presented_jti.to_string(),
            family_id: record.family_id.clone(),
        });
        warn!(
            username = %record.username,
            family_id = %record.family_id,
            "refresh token reuse detected"
        );

        RefreshError::Reuse
    }

    fn rotation_failure(&self, reason: String) -> RefreshError {
        self.metrics.rotation_failed.inc();
        RefreshError::Internal(reason)
    }
}

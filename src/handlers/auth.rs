// Authentication endpoints
// Thin translation layer: DTOs in, use cases, DTOs or the error envelope
// out. Domain errors map to HTTP exactly here.

use axum::{
    extract::{ConnectInfo, Extension, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use axum_extra::{headers::UserAgent, TypedHeader};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::warn;
use validator::Validate;

use crate::{
    app::AppState,
    middleware::auth::AuthenticatedPrincipal,
    middleware::correlation::RequestContext,
    services::audit::AuditEvent,
    services::login::{LoginCommand, LoginError},
    services::refresh::RefreshError,
    utils::auth_errors::ApiError,
};

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 320))]
    pub username_or_email: String,

    #[validate(length(min = 1, max = 1024))]
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token expiry, epoch seconds
    pub expires_at: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user_id: String,
    pub username: String,
    pub roles: Vec<String>,
    pub scopes: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub jti: String,
    /// Epoch seconds
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsResponse {
    pub sessions: Vec<SessionView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalLogoutResponse {
    pub revoked_sessions: usize,
}

fn login_error_response(err: LoginError, ctx: &RequestContext) -> ApiError {
    let mut api = ApiError::new(err.status_code(), err.error_code(), ctx);
    if let Some(retry_after) = err.retry_after() {
        api = api.with_retry_after(retry_after);
    }
    api
}

fn refresh_error_response(err: RefreshError, ctx: &RequestContext) -> ApiError {
    ApiError::new(err.status_code(), err.error_code(), ctx)
}

fn forwarded_for(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
}

// =============================================================================
// HANDLERS
// =============================================================================

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(ctx): Extension<RequestContext>,
    user_agent: Option<TypedHeader<UserAgent>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    if request.validate().is_err() {
        return Err(ApiError::validation(&ctx));
    }

    let client_ip = state
        .client_ip_resolver
        .resolve(addr.ip(), forwarded_for(&headers));
    let rate_limit_key = state
        .rate_limit_key_resolver
        .resolve(client_ip, &request.username_or_email);

    let user_agent = user_agent.map(|TypedHeader(ua)| ua.to_string());

    let outcome = state
        .login_use_case
        .execute(LoginCommand {
            username_or_email: request.username_or_email,
            password: request.password,
            rate_limit_key,
            client_ip: client_ip.to_string(),
            user_agent,
        })
        .await
        .map_err(|e| login_error_response(e, &ctx))?;

    Ok(Json(TokenResponse {
        access_token: outcome.access_token,
        refresh_token: outcome.refresh_token,
        token_type: "Bearer".to_string(),
        expires_at: outcome.access_expires_at,
    }))
}

/// POST /auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    if request.validate().is_err() {
        return Err(ApiError::validation(&ctx));
    }

    let outcome = state
        .refresh_use_case
        .execute(&request.refresh_token)
        .await
        .map_err(|e| refresh_error_response(e, &ctx))?;

    Ok(Json(TokenResponse {
        access_token: outcome.access_token,
        refresh_token: outcome.refresh_token,
        token_type: "Bearer".to_string(),
        expires_at: outcome.access_expires_at,
    }))
}

/// GET /auth/me
pub async fn me(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    principal: AuthenticatedPrincipal,
) -> Result<Json<MeResponse>, ApiError> {
    let user = state
        .user_gateway
        .find_by_username_or_email(&principal.subject)
        .await
        .map_err(|_| ApiError::internal(&ctx))?
        .ok_or_else(|| ApiError::unauthenticated(&ctx))?;

    Ok(Json(MeResponse {
        user_id: user.id.to_string(),
        username: user.username,
        roles: principal.roles,
        scopes: principal.scopes,
    }))
}

/// POST /auth/logout
///
/// Tombstones the presented access token and, when a refresh token is
/// supplied, retires that session as well.
pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    principal: AuthenticatedPrincipal,
    body: Option<Json<LogoutRequest>>,
) -> Result<StatusCode, ApiError> {
    let access_expiry = chrono::DateTime::from_timestamp(principal.expires_at as i64, 0)
        .ok_or_else(|| ApiError::internal(&ctx))?;

    state
        .blacklist
        .revoke(&principal.token_id, access_expiry)
        .await
        .map_err(|_| ApiError::internal(&ctx))?;

    if let Some(Json(LogoutRequest {
        refresh_token: Some(raw),
    })) = body
    {
        // A malformed refresh token does not fail the logout; the access
        // token is already dead.
        match state.token_validator.validate_refresh(&raw) {
            Ok(claims) => {
                if let Ok(Some(record)) = state.refresh_store.find_by_jti(&claims.jti).await {
                    state
                        .refresh_store
                        .revoke(&record.jti)
                        .await
                        .map_err(|_| ApiError::internal(&ctx))?;
                    state
                        .blacklist
                        .revoke(&record.jti, record.expires_at)
                        .await
                        .map_err(|_| ApiError::internal(&ctx))?;
                    if let Err(e) = state
                        .sessions
                        .remove_session(&principal.subject, &record.jti)
                        .await
                    {
                        warn!(error = %e, "session removal failed during logout");
                    }
                    state.audit.publish(AuditEvent::SessionRevoked {
                        username: principal.subject.clone(),
                        jti: record.jti.clone(),
                    });
                }
            },
            Err(e) => {
                warn!(error_code = e.error_code(), "ignoring bad refresh token on logout");
            },
        }
    }

    state.metrics.session_revoked.inc();
    Ok(StatusCode::NO_CONTENT)
}

/// GET /auth/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    principal: AuthenticatedPrincipal,
) -> Result<Json<SessionsResponse>, ApiError> {
    let sessions = state
        .sessions
        .active_sessions(&principal.subject)
        .await
        .map_err(|_| ApiError::internal(&ctx))?;

    Ok(Json(SessionsResponse {
        sessions: sessions
            .into_iter()
            .map(|entry| SessionView {
                jti: entry.jti,
                expires_at: entry.expires_at.timestamp(),
            })
            .collect(),
    }))
}

/// DELETE /auth/sessions — global logout for the authenticated user.
pub async fn revoke_all_sessions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    principal: AuthenticatedPrincipal,
) -> Result<Json<GlobalLogoutResponse>, ApiError> {
    let removed = state
        .sessions
        .remove_all(&principal.subject)
        .await
        .map_err(|_| ApiError::internal(&ctx))?;

    state
        .refresh_store
        .delete_all_for_user(&principal.subject)
        .await
        .map_err(|_| ApiError::internal(&ctx))?;

    state.metrics.session_revoked.inc_by(removed as u64);
    state.audit.publish(AuditEvent::GlobalLogout {
        username: principal.subject.clone(),
        sessions_removed: removed,
    });

    Ok(Json(GlobalLogoutResponse {
        revoked_sessions: removed,
    }))
}

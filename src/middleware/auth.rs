// Request principal
// Inserted into request extensions by the authorization filter; protected
// handlers extract it and reject with 401 when it is absent.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::app::AppState;
use crate::middleware::correlation::RequestContext;
use crate::models::auth::JwtClaims;
use crate::utils::auth_errors::ApiError;

/// The authenticated caller of a protected request.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    pub subject: String,
    pub token_id: String,
    pub roles: Vec<String>,
    pub scopes: Vec<String>,
    /// Access token expiry, epoch seconds
    pub expires_at: u64,
}

impl AuthenticatedPrincipal {
    pub fn from_claims(claims: &JwtClaims) -> Self {
        Self {
            subject: claims.sub.clone(),
            token_id: claims.jti.clone(),
            roles: claims.roles.clone(),
            scopes: claims.scopes.clone(),
            expires_at: claims.exp,
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

impl FromRequestParts<AppState> for AuthenticatedPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let ctx = parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| RequestContext {
                correlation_id: String::new(),
                path: parts.uri.path().to_string(),
            });

        parts
            .extensions
            .get::<AuthenticatedPrincipal>()
            .cloned()
            .ok_or_else(|| ApiError::unauthenticated(&ctx))
    }
}

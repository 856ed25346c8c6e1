// Per-request access-token validation
// The filter never rejects on its own: a failed validation clears the
// authentication context and lets the chain continue, so endpoint policy
// decides between 401 and 403. Nothing in here may surface a 500.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::app::AppState;
use crate::middleware::auth::AuthenticatedPrincipal;

pub async fn authorization_filter(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);

    let token = match bearer {
        Some(token) => token,
        // Missing header: continue unauthenticated
        None => return next.run(request).await,
    };

    let claims = match state.token_validator.validate_access(&token) {
        Ok(claims) => claims,
        Err(e) => {
            warn!(error_code = e.error_code(), "access token rejected");
            return next.run(request).await;
        },
    };

    // Tombstoned tokens are dead even while cryptographically valid. A
    // blacklist outage degrades to unauthenticated, never to a 500.
    match state.blacklist.is_revoked(&claims.jti).await {
        Ok(false) => {},
        Ok(true) => {
            warn!(jti = %claims.jti, "blacklisted access token rejected");
            return next.run(request).await;
        },
        Err(e) => {
            warn!(error = %e, "blacklist probe failed, treating token as unauthenticated");
            return next.run(request).await;
        },
    }

    request
        .extensions_mut()
        .insert(AuthenticatedPrincipal::from_claims(&claims));

    next.run(request).await
}

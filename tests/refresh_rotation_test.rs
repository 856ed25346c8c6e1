// Refresh rotation and reuse detection over the HTTP surface

mod common;

use axum::http::StatusCode;
use authgate_core::{RefreshTokenStore, SessionRegistry, TokenBlacklist};
use common::{assert_status_and_body, json_body, TestApp, REFRESH_TTL};

async fn login_tokens(app: &TestApp) -> (String, String) {
    let body = json_body(app.login("admin", "admin123").await).await;
    (
        body["accessToken"].as_str().unwrap().to_string(),
        body["refreshToken"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn rotation_happy_path_chains_the_family() {
    let app = TestApp::new();
    app.seed_admin();

    let (_, r1) = login_tokens(&app).await;
    let r1_jti = app.codec.extract_jti(&r1).unwrap();
    let family_id = app
        .refresh_store
        .find_by_jti(&r1_jti)
        .await
        .unwrap()
        .unwrap()
        .family_id;

    let body = assert_status_and_body(app.refresh(&r1).await, StatusCode::OK).await;
    assert_eq!(body["tokenType"], "Bearer");

    let a2 = body["accessToken"].as_str().unwrap();
    let r2 = body["refreshToken"].as_str().unwrap();
    assert_ne!(r2, r1);

    // New access token verifies with full grants
    let access = app.codec.verify(a2).unwrap();
    assert_eq!(access.sub, "admin");
    assert_eq!(access.roles, vec!["ROLE_ADMIN"]);

    // New record chains back to r1 inside the same family
    let r2_jti = app.codec.extract_jti(r2).unwrap();
    let record = app
        .refresh_store
        .find_by_jti(&r2_jti)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.family_id, family_id);
    assert_eq!(record.previous_jti, Some(r1_jti.clone()));

    // The consumed token is retired and tombstoned until its expiry
    assert!(app
        .refresh_store
        .find_by_jti(&r1_jti)
        .await
        .unwrap()
        .unwrap()
        .revoked);
    assert!(app.blacklist.is_revoked(&r1_jti).await.unwrap());

    // Session inventory moved to the new jti
    let active = app.sessions.active_sessions("admin").await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].jti, r2_jti);
}

#[tokio::test]
async fn reuse_of_a_rotated_token_revokes_the_family() {
    let app = TestApp::new();
    app.seed_admin();

    let (_, r1) = login_tokens(&app).await;
    let body = assert_status_and_body(app.refresh(&r1).await, StatusCode::OK).await;
    let r2 = body["refreshToken"].as_str().unwrap().to_string();

    // Replaying the consumed token is reuse
    let body = assert_status_and_body(app.refresh(&r1).await, StatusCode::UNAUTHORIZED).await;
    assert_eq!(body["error"], "AUTH-022");

    // The still-fresh descendant dies with the family
    let body = assert_status_and_body(app.refresh(&r2).await, StatusCode::UNAUTHORIZED).await;
    assert_eq!(body["error"], "AUTH-022");
}

#[tokio::test]
async fn unknown_refresh_token_is_rejected() {
    let app = TestApp::new();
    app.seed_admin();

    // Minted out of band, never persisted by a login
    let minted = app
        .codec
        .mint(authgate_core::MintSpec {
            subject: "admin".to_string(),
            roles: vec![],
            scopes: vec![],
            ttl_seconds: REFRESH_TTL,
            audience: common::REFRESH_AUDIENCE.to_string(),
            token_use: authgate_core::TokenUse::Refresh,
        })
        .unwrap();

    let body =
        assert_status_and_body(app.refresh(&minted.token).await, StatusCode::UNAUTHORIZED).await;
    assert_eq!(body["error"], "AUTH-020");
}

#[tokio::test]
async fn expired_refresh_token_is_not_reuse() {
    let app = TestApp::new();
    app.seed_admin();

    let (_, r1) = login_tokens(&app).await;

    app.clock
        .advance(chrono::Duration::seconds(REFRESH_TTL as i64));

    let body = assert_status_and_body(app.refresh(&r1).await, StatusCode::UNAUTHORIZED).await;
    assert_eq!(body["error"], "AUTH-021");
}

#[tokio::test]
async fn access_token_is_rejected_on_the_refresh_path() {
    let app = TestApp::new();
    app.seed_admin();

    let (a1, _) = login_tokens(&app).await;
    let body = assert_status_and_body(app.refresh(&a1).await, StatusCode::UNAUTHORIZED).await;
    assert_eq!(body["error"], "AUTH-016");
}

#[tokio::test]
async fn garbage_refresh_token_is_invalid() {
    let app = TestApp::new();
    app.seed_admin();

    let body = assert_status_and_body(
        app.refresh("definitely.not.a-jwt").await,
        StatusCode::UNAUTHORIZED,
    )
    .await;
    assert_eq!(body["error"], "AUTH-010");
}

#[tokio::test]
async fn rotation_disabled_returns_the_same_refresh_token() {
    let app = TestApp::with_rotation(false);
    app.seed_admin();

    let (_, r1) = login_tokens(&app).await;

    let first = assert_status_and_body(app.refresh(&r1).await, StatusCode::OK).await;
    assert_eq!(first["refreshToken"].as_str().unwrap(), r1);

    // The same token keeps working
    let second = assert_status_and_body(app.refresh(&r1).await, StatusCode::OK).await;
    assert_eq!(second["refreshToken"].as_str().unwrap(), r1);

    // But use after an explicit revocation is still treated as reuse
    let jti = app.codec.extract_jti(&r1).unwrap();
    app.refresh_store.revoke(&jti).await.unwrap();

    let body = assert_status_and_body(app.refresh(&r1).await, StatusCode::UNAUTHORIZED).await;
    assert_eq!(body["error"], "AUTH-022");
}

#[tokio::test]
async fn rotated_access_tokens_stay_valid_until_expiry() {
    let app = TestApp::new();
    app.seed_admin();

    let (a1, r1) = login_tokens(&app).await;
    assert_status_and_body(app.refresh(&r1).await, StatusCode::OK).await;

    // Rotation does not kill the previously issued access token
    let response = app.get_with_bearer("/auth/me", &a1).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// End-to-end login flow over the HTTP surface
// Runs against in-memory stores and a manual clock; no external services.

mod common;

use axum::http::StatusCode;
use common::{assert_status_and_body, json_body, TestApp, ACCESS_TTL};
use authgate_core::{RefreshTokenStore, SessionRegistry, UserStatus};

#[tokio::test]
async fn happy_login_returns_a_verifiable_token_pair() {
    let app = TestApp::new();
    app.seed_admin();

    let response = app.login("admin", "admin123").await;
    let body = assert_status_and_body(response, StatusCode::OK).await;

    assert_eq!(body["tokenType"], "Bearer");

    let access_token = body["accessToken"].as_str().unwrap();
    let refresh_token = body["refreshToken"].as_str().unwrap();

    let access = app.codec.verify(access_token).unwrap();
    assert_eq!(access.sub, "admin");
    assert_eq!(access.roles, vec!["ROLE_ADMIN"]);
    assert_eq!(
        access.scopes,
        vec!["profile:read", "profile:write", "user:manage"]
    );
    assert_eq!(access.exp, access.iat + ACCESS_TTL);
    assert_eq!(body["expiresAt"].as_u64().unwrap(), access.exp);

    let refresh = app.codec.verify(refresh_token).unwrap();
    assert!(refresh.roles.is_empty());
    assert!(refresh.scopes.is_empty());

    // Refresh metadata was persisted under the refresh jti
    let record = app
        .refresh_store
        .find_by_jti(&refresh.jti)
        .await
        .unwrap()
        .expect("record for minted refresh token");
    assert_eq!(record.username, "admin");
    assert!(!record.revoked);
}

#[tokio::test]
async fn login_works_with_email_identifier() {
    let app = TestApp::new();
    app.seed_admin();

    let response = app.login("admin@example.com", "admin123").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_user_and_wrong_password_are_indistinguishable() {
    let app = TestApp::new();
    app.seed_admin();

    let wrong = json_body(app.login("admin", "wrong").await).await;
    let ghost = json_body(app.login("ghost", "whatever").await).await;

    assert_eq!(wrong["status"], 401);
    assert_eq!(ghost["status"], 401);
    assert_eq!(wrong["error"], ghost["error"]);
    assert_eq!(wrong["error"], "AUTH-001");

    // Same shape: both envelopes carry the same field set
    let wrong_keys: Vec<_> = wrong.as_object().unwrap().keys().collect();
    let ghost_keys: Vec<_> = ghost.as_object().unwrap().keys().collect();
    assert_eq!(wrong_keys, ghost_keys);
}

#[tokio::test]
async fn locked_and_disabled_accounts_get_403_with_specific_codes() {
    let app = TestApp::new();
    app.seed_user("locked", "pw1", UserStatus::Locked, &["ROLE_USER"]);
    app.seed_user("disabled", "pw2", UserStatus::Disabled, &["ROLE_USER"]);
    app.seed_user("deleted", "pw3", UserStatus::Deleted, &["ROLE_USER"]);

    let body = assert_status_and_body(
        app.login("locked", "pw1").await,
        StatusCode::FORBIDDEN,
    )
    .await;
    assert_eq!(body["error"], "AUTH-002");

    let body = assert_status_and_body(
        app.login("disabled", "pw2").await,
        StatusCode::FORBIDDEN,
    )
    .await;
    assert_eq!(body["error"], "AUTH-003");

    let body = assert_status_and_body(
        app.login("deleted", "pw3").await,
        StatusCode::FORBIDDEN,
    )
    .await;
    assert_eq!(body["error"], "AUTH-004");
}

#[tokio::test]
async fn brute_force_lockout_after_three_failures() {
    let app = TestApp::new();
    app.seed_admin();

    for _ in 0..3 {
        let response = app.login("admin", "wrong").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // Fourth attempt inside the window trips the lockout
    let response = app.login("admin", "wrong").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .expect("Retry-After header");
    assert_eq!(retry_after, 60);

    let body = json_body(response).await;
    assert_eq!(body["error"], "AUTH-005");

    // A later attempt inside the block reports the shrinking TTL, even with
    // the correct password
    app.clock.advance(chrono::Duration::seconds(20));
    let response = app.login("admin", "admin123").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap();
    assert!(retry_after <= 60 && retry_after > 0);
    assert_eq!(retry_after, 40);
}

fn login_request_from(client: &str) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header("content-type", "application/json")
        .header("x-forwarded-for", client)
        .body(axum::body::Body::from(
            serde_json::json!({ "usernameOrEmail": "admin", "password": "wrong" }).to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn forwarded_client_ip_is_honored_behind_trusted_proxies() {
    let app = TestApp::new();
    app.seed_admin();

    // 10.0.0.0/8 is the configured trusted proxy range
    let proxy: std::net::SocketAddr = "10.0.0.5:33000".parse().unwrap();

    for _ in 0..4 {
        app.send_from(proxy, login_request_from("198.51.100.9")).await;
    }
    let blocked = app
        .send_from(proxy, login_request_from("198.51.100.9"))
        .await;
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

    // Another forwarded client through the same proxy has its own budget
    let other = app
        .send_from(proxy, login_request_from("198.51.100.10"))
        .await;
    assert_eq!(other.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn forwarded_header_from_untrusted_peers_is_ignored() {
    let app = TestApp::new();
    app.seed_admin();

    let attacker: std::net::SocketAddr = "192.0.2.10:40000".parse().unwrap();

    // Rotating the forwarded header does not rotate the rate-limit key:
    // attempts all land on the peer address
    for i in 0..3 {
        let response = app
            .send_from(attacker, login_request_from(&format!("198.51.100.{}", i)))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let blocked = app
        .send_from(attacker, login_request_from("198.51.100.99"))
        .await;
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn error_envelope_carries_path_and_correlation_id() {
    let app = TestApp::new();
    app.seed_admin();

    let response = app.login("admin", "wrong").await;
    let correlation_header = response
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("correlation header");

    let body = json_body(response).await;
    assert_eq!(body["path"], "/auth/login");
    assert_eq!(body["correlationId"].as_str().unwrap(), correlation_header);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn supplied_correlation_id_is_propagated() {
    let app = TestApp::new();

    let response = app
        .send(
            axum::http::Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header("content-type", "application/json")
                .header("x-correlation-id", "trace-me-42")
                .body(axum::body::Body::from(
                    serde_json::json!({ "usernameOrEmail": "x", "password": "y" }).to_string(),
                ))
                .unwrap(),
        )
        .await;

    assert_eq!(
        response.headers().get("x-correlation-id").unwrap(),
        "trace-me-42"
    );
}

#[tokio::test]
async fn blank_credentials_are_a_validation_error() {
    let app = TestApp::new();

    let body = assert_status_and_body(
        app.post_json(
            "/auth/login",
            serde_json::json!({ "usernameOrEmail": "", "password": "" }),
        )
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["error"], "AUTH-400");
}

#[tokio::test]
async fn me_reflects_the_access_token() {
    let app = TestApp::new();
    app.seed_admin();

    let login = json_body(app.login("admin", "admin123").await).await;
    let access_token = login["accessToken"].as_str().unwrap();

    let body = assert_status_and_body(
        app.get_with_bearer("/auth/me", access_token).await,
        StatusCode::OK,
    )
    .await;

    assert_eq!(body["username"], "admin");
    assert!(body["userId"].is_string());
    assert_eq!(body["roles"][0], "ROLE_ADMIN");
    assert!(body["scopes"]
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s == "user:manage"));
}

#[tokio::test]
async fn me_without_token_is_unauthenticated() {
    let app = TestApp::new();

    let response = app
        .send(
            axum::http::Request::builder()
                .method("GET")
                .uri("/auth/me")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;

    let body = assert_status_and_body(response, StatusCode::UNAUTHORIZED).await;
    assert_eq!(body["error"], "AUTH-030");
}

#[tokio::test]
async fn expired_access_token_is_rejected() {
    let app = TestApp::new();
    app.seed_admin();

    let login = json_body(app.login("admin", "admin123").await).await;
    let access_token = login["accessToken"].as_str().unwrap().to_string();

    app.clock.advance(chrono::Duration::seconds(ACCESS_TTL as i64));

    let response = app.get_with_bearer("/auth/me", &access_token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_blacklists_the_access_token() {
    let app = TestApp::new();
    app.seed_admin();

    let login = json_body(app.login("admin", "admin123").await).await;
    let access_token = login["accessToken"].as_str().unwrap().to_string();
    let refresh_token = login["refreshToken"].as_str().unwrap().to_string();

    // Logout with the refresh token included retires the session too
    let response = app
        .send(
            axum::http::Request::builder()
                .method("POST")
                .uri("/auth/logout")
                .header("authorization", format!("Bearer {}", access_token))
                .header("content-type", "application/json")
                .body(axum::body::Body::from(
                    serde_json::json!({ "refreshToken": refresh_token }).to_string(),
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // The access token is now tombstoned
    let response = app.get_with_bearer("/auth/me", &access_token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // And the refresh token is dead as well
    let response = app.refresh(&refresh_token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(app.sessions.count("admin").await.unwrap(), 0);
}

#[tokio::test]
async fn session_inventory_tracks_logins() {
    let app = TestApp::new();
    app.seed_admin();

    let first = json_body(app.login("admin", "admin123").await).await;
    let _second = json_body(app.login("admin", "admin123").await).await;

    let access_token = first["accessToken"].as_str().unwrap();
    let body = assert_status_and_body(
        app.get_with_bearer("/auth/sessions", access_token).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["sessions"].as_array().unwrap().len(), 2);

    // Global logout removes everything
    let response = app
        .send(
            axum::http::Request::builder()
                .method("DELETE")
                .uri("/auth/sessions")
                .header("authorization", format!("Bearer {}", access_token))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
    let body = assert_status_and_body(response, StatusCode::OK).await;
    assert_eq!(body["revokedSessions"], 2);

    assert_eq!(app.sessions.count("admin").await.unwrap(), 0);
    assert!(app
        .refresh_store
        .find_all_for_user("admin")
        .await
        .unwrap()
        .is_empty());
}

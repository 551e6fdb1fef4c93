mod common;

use axum::http::{Method, StatusCode};
use common::{register_input, TestApp, BOOTSTRAP_SECRET, PASSWORD};
use serde_json::json;
use shoe_shop_api::{entities::UserRole, errors::ServiceError};

#[tokio::test]
async fn bootstrap_secret_only_works_while_no_admin_exists() {
    let app = TestApp::new().await;
    // The harness registered the first admin with the secret.
    assert_eq!(app.admin.user.role, UserRole::Admin);
    assert_eq!(app.user.user.role, UserRole::User);

    let (status, body) = app
        .json(
            Method::POST,
            "/api/auth/register",
            Some(json!({
                "name": "Second Try",
                "email": "second@example.com",
                "password": PASSWORD,
                "adminSecret": BOOTSTRAP_SECRET,
            })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["user"]["role"], "user");
    assert!(body["data"]["token"].is_string());
}

#[tokio::test]
async fn wrong_secret_never_grants_admin() {
    let app = TestApp::new().await;
    let session = app
        .state
        .services
        .identity
        .register(register_input("Guess", "guess@example.com", Some("nope")))
        .await
        .unwrap();
    assert_eq!(session.user.role, UserRole::User);
}

#[tokio::test]
async fn duplicate_email_conflicts_case_insensitively() {
    let app = TestApp::new().await;
    let err = app
        .state
        .services
        .identity
        .register(register_input("Dup", "USER@Example.com", None))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
}

#[tokio::test]
async fn login_errors_do_not_reveal_which_part_was_wrong() {
    let app = TestApp::new().await;

    let (unknown_status, unknown) = app
        .json(
            Method::POST,
            "/api/auth/login",
            Some(json!({ "email": "nobody@example.com", "password": PASSWORD })),
            None,
        )
        .await;
    let (wrong_status, wrong) = app
        .json(
            Method::POST,
            "/api/auth/login",
            Some(json!({ "email": "user@example.com", "password": "not-the-password" })),
            None,
        )
        .await;

    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown["message"], wrong["message"]);
}

#[tokio::test]
async fn login_returns_token_and_public_user() {
    let app = TestApp::new().await;
    let (status, body) = app
        .json(
            Method::POST,
            "/api/auth/login",
            Some(json!({ "email": "user@example.com", "password": PASSWORD })),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["token"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["user"]["email"], "user@example.com");
    assert!(body["data"]["user"].get("passwordHash").is_none());

    let (status, profile) = app
        .json(Method::GET, "/api/auth/profile", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["data"]["name"], "Test User");
}

#[tokio::test]
async fn deleting_the_only_admin_is_refused() {
    let app = TestApp::new().await;
    let uri = format!("/api/auth/users/{}", app.admin.user.id);

    let (status, _) = app
        .json(Method::DELETE, &uri, None, Some(app.admin_token()))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, users) = app
        .json(Method::GET, "/api/auth/users", None, Some(app.admin_token()))
        .await;
    assert_eq!(users["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn a_non_last_admin_can_be_deleted() {
    let app = TestApp::new().await;
    let (status, created) = app
        .json(
            Method::POST,
            "/api/auth/admin/create",
            Some(json!({ "name": "Deputy", "email": "deputy@example.com", "password": PASSWORD })),
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["data"]["role"], "admin");

    let uri = format!("/api/auth/users/{}", created["data"]["id"].as_str().unwrap());
    let (status, _) = app
        .json(Method::DELETE, &uri, None, Some(app.admin_token()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.state.services.identity.admin_count().await.unwrap(), 1);
}

#[tokio::test]
async fn demoting_the_last_admin_is_refused_but_promotion_works() {
    let app = TestApp::new().await;

    let (status, _) = app
        .json(
            Method::PUT,
            &format!("/api/auth/users/{}", app.admin.user.id),
            Some(json!({ "role": "user" })),
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .json(
            Method::PUT,
            &format!("/api/auth/users/{}", app.user.user.id),
            Some(json!({ "role": "admin", "phone": "0911111111" })),
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["role"], "admin");
    assert_eq!(body["data"]["phone"], "0911111111");
}

#[tokio::test]
async fn role_change_applies_to_existing_tokens() {
    let app = TestApp::new().await;
    let (status, _) = app
        .json(Method::GET, "/api/auth/users", None, Some(app.user_token()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.json(
        Method::PUT,
        &format!("/api/auth/users/{}", app.user.user.id),
        Some(json!({ "role": "admin" })),
        Some(app.admin_token()),
    )
    .await;

    let (status, _) = app
        .json(Method::GET, "/api/auth/users", None, Some(app.user_token()))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn deleted_users_lose_access() {
    let app = TestApp::new().await;
    let (status, _) = app
        .json(
            Method::DELETE,
            &format!("/api/auth/users/{}", app.user.user.id),
            None,
            Some(app.admin_token()),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .json(Method::GET, "/api/auth/profile", None, Some(app.user_token()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTH_INVALID_TOKEN");
}

#[tokio::test]
async fn bad_tokens_are_rejected_with_error_codes() {
    let app = TestApp::new().await;

    let (status, body) = app
        .json(Method::GET, "/api/auth/profile", None, Some("not-a-jwt"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTH_INVALID_TOKEN");

    let response = app
        .send(
            axum::http::Request::builder()
                .uri("/api/auth/profile")
                .header("authorization", "Basic abc")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
    let (status, body) = common::read_json(response).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTH_MALFORMED_TOKEN");
}

#[tokio::test]
async fn short_passwords_are_rejected() {
    let app = TestApp::new().await;
    let (status, _) = app
        .json(
            Method::POST,
            "/api/auth/register",
            Some(json!({ "name": "Short", "email": "short@example.com", "password": "123" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

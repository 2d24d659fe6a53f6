//! Admin user management behind the permission guard

mod common;

use axum::http::StatusCode;
use common::{Browser, TestGateway, body_json, delete, get, location, post_json, valid_token};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

async fn admin(gateway: &TestGateway) -> Browser {
    let mut browser = Browser::new();
    browser
        .login(gateway, &valid_token("auth0|admin", &["admin"]))
        .await;
    browser
}

#[tokio::test]
async fn malformed_user_id_is_rejected_before_any_provider_call() {
    // GIVEN: an admin, and a provider that must not be called
    let gateway = TestGateway::start().await;
    let mut browser = admin(&gateway).await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&gateway.provider)
        .await;

    // WHEN: deleting a user id with shell metacharacters
    let response = browser
        .send(&gateway, delete("/admin/delete-user/abc;rm"))
        .await;

    // THEN
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"status": "error", "message": "Invalid user ID format"})
    );
}

#[tokio::test]
async fn delete_user_calls_management_api() {
    let gateway = TestGateway::start().await;
    gateway.issue_management_tokens().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v2/users/auth0%7C123"))
        .and(header("authorization", "Bearer m2m-token"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&gateway.provider)
        .await;
    let mut browser = admin(&gateway).await;

    let response = browser
        .send(&gateway, delete("/admin/delete-user/auth0%7C123"))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "success"}));
}

#[tokio::test]
async fn delete_user_failure_is_reported_in_body() {
    // GIVEN: the provider does not know the user
    let gateway = TestGateway::start().await;
    gateway.issue_management_tokens().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v2/users/auth0%7C404"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"message": "The user does not exist."})),
        )
        .mount(&gateway.provider)
        .await;
    let mut browser = admin(&gateway).await;

    // WHEN
    let response = browser
        .send(&gateway, delete("/admin/delete-user/auth0%7C404"))
        .await;

    // THEN: the request itself succeeds and the body carries the failure
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("The user does not exist."));
}

#[tokio::test]
async fn create_user_uses_configured_connection() {
    let gateway = TestGateway::start().await;
    gateway.issue_management_tokens().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/users"))
        .and(body_partial_json(json!({
            "email": "new@example.com",
            "password": "S3cure!pass",
            "connection": "Username-Password-Authentication"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "user_id": "auth0|new",
            "email": "new@example.com"
        })))
        .expect(1)
        .mount(&gateway.provider)
        .await;
    let mut browser = admin(&gateway).await;

    let response = browser
        .send(
            &gateway,
            post_json(
                "/admin/create-user",
                &json!({"email": "new@example.com", "password": "S3cure!pass"}),
            ),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "success"}));
}

#[tokio::test]
async fn create_user_passes_provider_message_through() {
    // GIVEN: the provider rejects a weak password
    let gateway = TestGateway::start().await;
    gateway.issue_management_tokens().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/users"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "statusCode": 400,
            "error": "Bad Request",
            "message": "PasswordStrengthError: Password is too weak"
        })))
        .mount(&gateway.provider)
        .await;
    let mut browser = admin(&gateway).await;

    // WHEN
    let response = browser
        .send(
            &gateway,
            post_json(
                "/admin/create-user",
                &json!({"email": "new@example.com", "password": "x"}),
            ),
        )
        .await;

    // THEN: the provider's own message reaches the admin
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"status": "error", "message": "PasswordStrengthError: Password is too weak"})
    );
}

#[tokio::test]
async fn create_user_rejects_incomplete_body() {
    let gateway = TestGateway::start().await;
    let mut browser = admin(&gateway).await;

    let response = browser
        .send(
            &gateway,
            post_json("/admin/create-user", &json!({"email": "new@example.com"})),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["status"], "error");
}

#[tokio::test]
async fn admin_routes_require_the_configured_permission() {
    // GIVEN: admin routes guarded by a stricter permission
    let gateway = TestGateway::start_with(|config| {
        config.admin.permission = "superadmin".to_string();
    })
    .await;
    let mut browser = admin(&gateway).await;

    // WHEN: an "admin" tries every admin route
    let dashboard = browser.send(&gateway, get("/admin")).await;
    let removal = browser
        .send(&gateway, delete("/admin/delete-user/auth0%7C123"))
        .await;
    let creation = browser
        .send(
            &gateway,
            post_json(
                "/admin/create-user",
                &json!({"email": "a@example.com", "password": "pw"}),
            ),
        )
        .await;

    // THEN: all are sent home
    for response in [dashboard, removal, creation] {
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/");
    }
}

#[tokio::test]
async fn anonymous_delete_redirects_to_login() {
    let gateway = TestGateway::start().await;
    let mut browser = Browser::new();

    let response = browser
        .send(&gateway, delete("/admin/delete-user/auth0%7C123"))
        .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn dashboard_shows_provider_error() {
    let gateway = TestGateway::start().await;
    gateway.issue_management_tokens().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/users"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "Insufficient scope"})))
        .mount(&gateway.provider)
        .await;
    let mut browser = admin(&gateway).await;

    let response = browser.send(&gateway, get("/admin")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let html = common::body_text(response).await;
    assert!(html.contains("Insufficient scope"));
}

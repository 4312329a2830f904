use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use letterbox_api::auth::AppStateInner;
use letterbox_db::Database;

fn app() -> (Router, Arc<AppStateInner>) {
    let state = Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        jwt_secret: "test-secret".into(),
    });
    (letterbox_api::router(state.clone()), state)
}

async fn post(app: &Router, uri: &str, bearer: Option<&str>, body: Value) -> (StatusCode, Value) {
    let mut req = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let resp = app
        .clone()
        .oneshot(req.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn registration(username: &str) -> Value {
    json!({
        "username": username,
        "password": "correct horse",
        "first_name": "Test",
        "last_name": "User",
        "phone": "555-0199",
    })
}

#[tokio::test]
async fn register_then_login_then_send() {
    let (app, state) = app();

    let (status, reg) = post(&app, "/auth/register", None, registration("alice")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(reg["token"].is_string());

    let (status, _) = post(&app, "/auth/register", None, registration("bob")).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, login) = post(
        &app,
        "/auth/login",
        None,
        json!({ "username": "alice", "password": "correct horse" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = login["token"].as_str().unwrap().to_string();

    let user = state.db.get_user_by_username("alice").unwrap().unwrap();
    assert!(user.last_login_at.is_some());
    assert_ne!(user.password, "correct horse");

    let (status, sent) = post(
        &app,
        "/messages",
        Some(&token),
        json!({ "to_username": "bob", "body": "hello bob" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["message"]["from_username"], "alice");
}

#[tokio::test]
async fn duplicate_username_conflicts() {
    let (app, _) = app();

    post(&app, "/auth/register", None, registration("alice")).await;
    let (status, err) = post(&app, "/auth/register", None, registration("alice")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"]["status"], 409);
}

#[tokio::test]
async fn registration_is_validated() {
    let (app, _) = app();

    let (status, _) = post(&app, "/auth/register", None, registration("al")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut short_password = registration("alice");
    short_password["password"] = json!("short");
    let (status, _) = post(&app, "/auth/register", None, short_password).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bad_credentials_are_unauthorized() {
    let (app, _) = app();
    post(&app, "/auth/register", None, registration("alice")).await;

    let (status, err) = post(
        &app,
        "/auth/login",
        None,
        json!({ "username": "alice", "password": "wrong password" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["error"]["message"], "Invalid username/password");

    let (status, _) = post(
        &app,
        "/auth/login",
        None,
        json!({ "username": "nobody", "password": "correct horse" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn username_length_counts_characters() {
    let (app, _) = app();

    let (status, _) = post(&app, "/auth/register", None, registration(&"é".repeat(32))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = post(&app, "/auth/register", None, registration(&"é".repeat(33))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&app, "/auth/register", None, registration("日本")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn incomplete_registration_is_a_json_error() {
    let (app, _) = app();

    let (status, err) = post(&app, "/auth/register", None, json!({ "username": "alice" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["status"], 400);
}

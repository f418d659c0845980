mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, read_json, TestApp};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct Session {
    access_token: String,
    token_type: String,
}

#[derive(Deserialize)]
struct Me {
    email: String,
    full_name: String,
    role: String,
    is_admin: bool,
}

#[tokio::test]
async fn register_then_me_roundtrip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app
        .post_json(
            "/api/auth/register",
            &json!({
                "email": "  Founder@Example.com ",
                "password": "launchpad-2026",
                "full_name": "Ada Founder",
                "role": "organization",
            }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().get("set-cookie").is_some());
    let session: Session = read_json(response).await?;
    assert_eq!(session.token_type, "Bearer");

    let response = app.get("/api/auth/me", Some(&session.access_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let me: Me = read_json(response).await?;
    assert_eq!(me.email, "founder@example.com");
    assert_eq!(me.full_name, "Ada Founder");
    assert_eq!(me.role, "organization");
    assert!(!me.is_admin);

    let recipients = app.queued_email_recipients().await?;
    assert_eq!(recipients, vec!["founder@example.com".to_string()]);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn duplicate_email_and_bad_input_are_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.insert_user("taken@example.com", "correct-horse-battery", "expert", false)
        .await?;

    let response = app
        .post_json(
            "/api/auth/register",
            &json!({
                "email": "taken@example.com",
                "password": "another-password",
                "full_name": "Someone Else",
                "role": "expert",
            }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .post_json(
            "/api/auth/register",
            &json!({
                "email": "not-an-email",
                "password": "1234",
                "full_name": "X",
                "role": "admin",
            }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = read_json(response).await?;
    let fields = body["fields"].as_object().expect("field errors");
    for field in ["email", "password", "full_name", "role"] {
        assert!(fields.contains_key(field), "missing error for {field}");
    }

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn login_failures_and_password_change() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.insert_user("expert@example.com", "correct-horse-battery", "expert", false)
        .await?;

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "expert@example.com", "password": "wrong-password" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "nobody@example.com", "password": "whatever-123" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let token = app
        .login_token("expert@example.com", "correct-horse-battery")
        .await?;

    let response = app
        .post_json(
            "/api/auth/password",
            &json!({ "current_password": "not-it-at-all", "new_password": "fresh-password-1" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            "/api/auth/password",
            &json!({ "current_password": "correct-horse-battery", "new_password": "fresh-password-1" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert!(app
        .login_token("expert@example.com", "correct-horse-battery")
        .await
        .is_err());
    app.login_token("expert@example.com", "fresh-password-1")
        .await?;

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn protected_routes_require_a_token() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app.get("/api/campaigns", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/api/notifications", Some("not-a-jwt")).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/api/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, read_json, TestApp};
use serde_json::{json, Value};

#[tokio::test]
async fn admin_routes_require_the_admin_flag() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, token) = app.signed_in("plain@example.com", "organization").await?;

    for path in ["/api/admin/users", "/api/admin/logs", "/api/admin/analytics"] {
        let response = app.get(path, Some(&token)).await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{path}");
    }

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn admin_mutations_are_logged() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (admin_id, admin_token) = app.signed_in_admin("root@example.com").await?;
    let (expert_id, _) = app.signed_in("mentor@example.com", "expert").await?;

    let response = app
        .patch_json(
            &format!("/api/admin/users/{admin_id}"),
            &json!({ "is_admin": false }),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .patch_json(
            &format!("/api/admin/users/{expert_id}"),
            &json!({ "is_active": false }),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Value = read_json(response).await?;
    assert_eq!(updated["is_active"], false);

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "mentor@example.com", "password": "correct-horse-battery" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.clear_jobs().await?;
    let response = app
        .post_json(
            "/api/email/send",
            &json!({
                "to": "mentor@example.com",
                "subject": "Account review",
                "message": "Your account is paused while we review a report.\n\nReply to this email with questions.",
            }),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        app.queued_email_recipients().await?,
        vec!["mentor@example.com".to_string()]
    );

    let logs: Vec<Value> =
        read_json(app.get("/api/admin/logs", Some(&admin_token)).await?).await?;
    let actions: Vec<&str> = logs.iter().filter_map(|l| l["action"].as_str()).collect();
    assert_eq!(actions, vec!["email.send", "user.update"]);
    assert_eq!(logs[1]["target_id"], json!(expert_id));
    assert_eq!(logs[1]["details"]["is_active"]["from"], true);
    assert_eq!(logs[1]["admin_email"], "root@example.com");

    let filtered: Vec<Value> = read_json(
        app.get("/api/admin/logs?action=user.update", Some(&admin_token))
            .await?,
    )
    .await?;
    assert_eq!(filtered.len(), 1);

    let response = app
        .get("/api/admin/logs?format=csv", Some(&admin_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let csv = String::from_utf8(body_to_vec(response.into_body()).await?)?;
    assert!(csv.starts_with("created_at,admin_email,action,target_type,target_id,details"));
    assert_eq!(csv.lines().count(), 3);

    let response = app
        .delete(&format!("/api/admin/users/{admin_id}"), Some(&admin_token))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let response = app
        .delete(&format!("/api/admin/users/{expert_id}"), Some(&admin_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let users: Value = read_json(
        app.get("/api/admin/users?role=expert", Some(&admin_token))
            .await?,
    )
    .await?;
    assert_eq!(users["total"], 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn admin_overrides_and_analytics() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, admin_token) = app.signed_in_admin("root@example.com").await?;
    let (_, org_token) = app.signed_in("hub@example.com", "organization").await?;
    let (_, first_token) = app.signed_in("first@example.com", "expert").await?;
    let (_, second_token) = app.signed_in("second@example.com", "expert").await?;

    let campaign_id = app.open_campaign(&org_token, "Customer discovery interviews").await?;
    let first = app.submit_proposal(&first_token, campaign_id).await?;
    app.submit_proposal(&second_token, campaign_id).await?;

    let listing: Value = read_json(
        app.get(
            &format!("/api/admin/proposals?campaign_id={campaign_id}&status=pending"),
            Some(&admin_token),
        )
        .await?,
    )
    .await?;
    assert_eq!(listing["total"], 2);

    app.clear_jobs().await?;
    let response = app
        .patch_json(
            &format!("/api/admin/proposals/{first}"),
            &json!({ "status": "rejected" }),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let overridden: Value = read_json(response).await?;
    assert_eq!(overridden["status"], "rejected");
    assert!(overridden["decided_at"].is_string());
    assert!(app.queued_email_recipients().await?.is_empty());

    let analytics: Value =
        read_json(app.get("/api/admin/analytics", Some(&admin_token)).await?).await?;
    assert_eq!(analytics["total_users"], 4);
    assert_eq!(analytics["users_by_role"]["expert"], 2);
    assert_eq!(analytics["users_by_role"]["organization"], 2);
    assert_eq!(analytics["campaigns_by_status"]["open"], 1);
    assert_eq!(analytics["campaigns_by_status"]["draft"], 0);
    assert_eq!(analytics["proposals_by_status"]["pending"], 1);
    assert_eq!(analytics["proposals_by_status"]["rejected"], 1);
    assert_eq!(analytics["acceptance_rate"], 0.0);
    let days = analytics["signups_last_30_days"].as_array().expect("days");
    assert_eq!(days.len(), 30);
    assert_eq!(days[29]["count"], 4);

    app.cleanup().await?;
    Ok(())
}

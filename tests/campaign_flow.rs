mod common;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, read_json, TestApp};
use diesel::connection::SimpleConnection;
use serde_json::{json, Value};

#[tokio::test]
async fn drafts_are_private_until_published() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, org_token) = app.signed_in("hub@example.com", "organization").await?;
    let (_, expert_token) = app.signed_in("mentor@example.com", "expert").await?;

    let response = app
        .post_json(
            "/api/campaigns",
            &json!({
                "title": "Pricing strategy sprint",
                "description": "Help three portfolio startups settle on a pricing model before demo day.",
                "required_skills": ["Pricing"],
                "budget_min": 3000,
                "budget_max": 1000,
            }),
            Some(&org_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .post_json(
            "/api/campaigns",
            &json!({
                "title": "Pricing strategy sprint",
                "description": "Help three portfolio startups settle on a pricing model before demo day.",
                "required_skills": ["Pricing"],
            }),
            Some(&expert_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            "/api/campaigns",
            &json!({
                "title": "Pricing strategy sprint",
                "description": "Help three portfolio startups settle on a pricing model before demo day.",
                "required_skills": ["Pricing"],
            }),
            Some(&org_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let campaign: Value = read_json(response).await?;
    assert_eq!(campaign["status"], "draft");
    let id = campaign["id"].as_str().expect("id").to_string();

    let response = app
        .get(&format!("/api/campaigns/{id}"), Some(&expert_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let listing: Value = read_json(app.get("/api/campaigns", Some(&expert_token)).await?).await?;
    assert_eq!(listing["total"], 0);

    let response = app
        .post_json(
            &format!("/api/campaigns/{id}/status"),
            &json!({ "status": "completed" }),
            Some(&org_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .post_json(
            &format!("/api/campaigns/{id}/status"),
            &json!({ "status": "open" }),
            Some(&org_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let listing: Value = read_json(
        app.get("/api/campaigns?skill=Pricing", Some(&expert_token))
            .await?,
    )
    .await?;
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["items"][0]["id"], json!(id));

    let response = app
        .patch_json(
            &format!("/api/campaigns/{id}"),
            &json!({ "deadline": null, "title": "Pricing and packaging sprint" }),
            Some(&org_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Value = read_json(response).await?;
    assert_eq!(updated["title"], "Pricing and packaging sprint");

    let response = app
        .delete(&format!("/api/campaigns/{id}"), Some(&org_token))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn accepting_a_proposal_rejects_the_rest() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, org_token) = app.signed_in("hub@example.com", "organization").await?;
    let (_, first_token) = app.signed_in("first@example.com", "expert").await?;
    let (_, second_token) = app.signed_in("second@example.com", "expert").await?;
    let (_, third_token) = app.signed_in("third@example.com", "expert").await?;

    let campaign_id = app.open_campaign(&org_token, "Go-to-market for pilot cohort").await?;
    let winner = app.submit_proposal(&first_token, campaign_id).await?;
    let loser = app.submit_proposal(&second_token, campaign_id).await?;
    let withdrawn = app.submit_proposal(&third_token, campaign_id).await?;

    let response = app
        .post_json(
            &format!("/api/campaigns/{campaign_id}/proposals"),
            &json!({
                "cover_letter": "Submitting twice should never create a second proposal for the same campaign.",
                "proposed_rate": 90,
            }),
            Some(&first_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .post_empty(&format!("/api/proposals/{withdrawn}/withdraw"), Some(&third_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_empty(&format!("/api/proposals/{winner}/accept"), Some(&first_token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.clear_jobs().await?;
    let response = app
        .post_empty(&format!("/api/proposals/{winner}/accept"), Some(&org_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let accepted: Value = read_json(response).await?;
    assert_eq!(accepted["proposal"]["status"], "accepted");
    assert_eq!(accepted["proposal"]["expert_name"], "first Tester");
    assert_eq!(accepted["rejected_count"], 1);
    assert_eq!(accepted["campaign_status"], "in_progress");

    let mut recipients = app.queued_email_recipients().await?;
    recipients.sort();
    assert_eq!(recipients, vec!["first@example.com", "second@example.com"]);

    let proposals: Vec<Value> = read_json(
        app.get(&format!("/api/campaigns/{campaign_id}/proposals"), Some(&org_token))
            .await?,
    )
    .await?;
    let status_of = |id: uuid::Uuid| {
        proposals
            .iter()
            .find(|p| p["id"] == json!(id))
            .map(|p| p["status"].clone())
    };
    assert_eq!(status_of(winner), Some(json!("accepted")));
    assert_eq!(status_of(loser), Some(json!("rejected")));
    assert_eq!(status_of(withdrawn), Some(json!("withdrawn")));

    let response = app
        .post_empty(&format!("/api/proposals/{loser}/accept"), Some(&org_token))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .post_json(
            &format!("/api/campaigns/{campaign_id}/proposals"),
            &json!({
                "cover_letter": "Late to the party but happy to help if anything changes on this campaign.",
                "proposed_rate": 100,
            }),
            Some(&third_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let campaign: Value = read_json(
        app.get(&format!("/api/campaigns/{campaign_id}"), Some(&first_token))
            .await?,
    )
    .await?;
    assert_eq!(campaign["status"], "in_progress");

    let notifications: Vec<Value> =
        read_json(app.get("/api/notifications", Some(&first_token)).await?).await?;
    assert!(notifications
        .iter()
        .any(|n| n["kind"] == "proposal_accepted"));
    let mine: Vec<Value> =
        read_json(app.get("/api/proposals/mine", Some(&first_token)).await?).await?;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["campaign_title"], "Go-to-market for pilot cohort");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_accepts_pick_one_winner() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = Arc::new(TestApp::new().await?);
    let (_, org_token) = app.signed_in("hub@example.com", "organization").await?;
    let (_, first_token) = app.signed_in("first@example.com", "expert").await?;
    let (_, second_token) = app.signed_in("second@example.com", "expert").await?;

    let campaign_id = app.open_campaign(&org_token, "Pricing page rework").await?;
    let first = app.submit_proposal(&first_token, campaign_id).await?;
    let second = app.submit_proposal(&second_token, campaign_id).await?;

    let accept = |proposal_id: uuid::Uuid| {
        let app = app.clone();
        let token = org_token.clone();
        tokio::spawn(async move {
            app.post_empty(&format!("/api/proposals/{proposal_id}/accept"), Some(&token))
                .await
                .map(|response| response.status())
        })
    };
    let (a, b) = tokio::join!(accept(first), accept(second));
    let mut statuses = vec![a??, b??];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

    let proposals: Vec<Value> = read_json(
        app.get(&format!("/api/campaigns/{campaign_id}/proposals"), Some(&org_token))
            .await?,
    )
    .await?;
    let mut decided: Vec<&str> = proposals
        .iter()
        .filter_map(|p| p["status"].as_str())
        .collect();
    decided.sort();
    assert_eq!(decided, vec!["accepted", "rejected"]);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn failed_accept_leaves_the_campaign_untouched() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, org_token) = app.signed_in("hub@example.com", "organization").await?;
    let (_, first_token) = app.signed_in("first@example.com", "expert").await?;
    let (second_id, second_token) = app.signed_in("second@example.com", "expert").await?;

    let campaign_id = app.open_campaign(&org_token, "Investor update template").await?;
    let winner = app.submit_proposal(&first_token, campaign_id).await?;
    app.submit_proposal(&second_token, campaign_id).await?;

    // Make the rejection notification for the second expert fail mid-transaction.
    let constraint = format!("reject_{}", second_id.simple());
    let add = format!(
        "ALTER TABLE notifications ADD CONSTRAINT {constraint} \
         CHECK (user_id <> '{second_id}') NOT VALID"
    );
    app.with_conn(move |conn| conn.batch_execute(&add).context("add constraint"))
        .await?;
    app.clear_jobs().await?;

    let response = app
        .post_empty(&format!("/api/proposals/{winner}/accept"), Some(&org_token))
        .await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let drop = format!("ALTER TABLE notifications DROP CONSTRAINT {constraint}");
    app.with_conn(move |conn| conn.batch_execute(&drop).context("drop constraint"))
        .await?;

    let campaign: Value = read_json(
        app.get(&format!("/api/campaigns/{campaign_id}"), Some(&org_token))
            .await?,
    )
    .await?;
    assert_eq!(campaign["status"], "open");
    let proposals: Vec<Value> = read_json(
        app.get(&format!("/api/campaigns/{campaign_id}/proposals"), Some(&org_token))
            .await?,
    )
    .await?;
    assert_eq!(proposals.len(), 2);
    assert!(proposals.iter().all(|p| p["status"] == "pending"));
    assert!(app.queued_email_recipients().await?.is_empty());
    let notifications: Vec<Value> =
        read_json(app.get("/api/notifications", Some(&first_token)).await?).await?;
    assert!(notifications.is_empty());

    let response = app
        .post_empty(&format!("/api/proposals/{winner}/accept"), Some(&org_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn owners_export_proposals_as_csv() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, org_token) = app.signed_in("hub@example.com", "organization").await?;
    let (_, expert_token) = app.signed_in("mentor@example.com", "expert").await?;
    let campaign_id = app.open_campaign(&org_token, "Investor readiness review").await?;
    app.submit_proposal(&expert_token, campaign_id).await?;

    let response = app
        .get(
            &format!("/api/campaigns/{campaign_id}/proposals/export"),
            Some(&expert_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .get(
            &format!("/api/campaigns/{campaign_id}/proposals/export"),
            Some(&org_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/csv; charset=utf-8"
    );
    let body = String::from_utf8(body_to_vec(response.into_body()).await?)?;
    let mut lines = body.lines();
    assert!(lines.next().expect("header").contains("status"));
    let row = lines.next().expect("one proposal");
    assert!(row.starts_with("mentor Tester,mentor@example.com,pending,120,20,"));
    assert!(row.contains("pending"));
    assert!(lines.next().is_none());

    app.cleanup().await?;
    Ok(())
}

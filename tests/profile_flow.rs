mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, read_json, TestApp};
use serde_json::{json, Value};

#[tokio::test]
async fn expert_wizard_resumes_and_completes() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (expert_id, token) = app.signed_in("mentor@example.com", "expert").await?;

    let me: Value = read_json(app.get("/api/profiles/me", Some(&token)).await?).await?;
    assert_eq!(me["current_step_name"], "basics");
    assert_eq!(me["completed"], false);

    let response = app
        .put_json(
            "/api/profiles/me/draft",
            &json!({ "headline": "Half-typed head" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let me: Value = read_json(app.get("/api/profiles/me", Some(&token)).await?).await?;
    assert_eq!(me["draft"]["headline"], "Half-typed head");

    let response = app
        .put_json(
            "/api/profiles/me/steps/basics",
            &json!({ "headline": "Go", "bio": "short", "location": "" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = read_json(response).await?;
    assert!(body["fields"]["headline"].is_string());
    assert!(body["fields"]["bio"].is_string());
    assert!(body["fields"]["location"].is_string());

    let response = app
        .put_json(
            "/api/profiles/me/steps/basics",
            &json!({
                "headline": "Fractional CFO for seed startups",
                "bio": "Fifteen years in venture finance, two exits, many board seats.",
                "location": "Berlin",
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let me: Value = read_json(response).await?;
    assert_eq!(me["current_step_name"], "expertise");
    assert!(me["draft"].is_null());

    let response = app
        .post_empty("/api/profiles/me/complete", Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    for (step, body) in [
        (
            "expertise",
            json!({ "skills": ["Fundraising", "Financial Modeling"], "industries": ["Fintech"], "years_experience": 15 }),
        ),
        ("rates", json!({ "hourly_rate": 180, "availability": "part_time" })),
        ("links", json!({ "linkedin_url": "https://linkedin.com/in/cfo" })),
    ] {
        let response = app
            .put_json(&format!("/api/profiles/me/steps/{step}"), &body, Some(&token))
            .await?;
        assert_eq!(response.status(), StatusCode::OK, "step {step}");
    }

    let response = app
        .post_empty("/api/profiles/me/complete", Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let me: Value = read_json(response).await?;
    assert_eq!(me["completed"], true);
    let hashtags = me["profile"]["hashtags"].as_array().expect("hashtags");
    assert!(hashtags.contains(&json!("#fundraising")));
    assert!(hashtags.contains(&json!("#fintech")));

    let (_, org_token) = app.signed_in("hub@example.com", "organization").await?;
    let listing: Value = read_json(
        app.get("/api/experts?skill=fundraising", Some(&org_token))
            .await?,
    )
    .await?;
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["items"][0]["user_id"], json!(expert_id));

    let listing: Value =
        read_json(app.get("/api/experts?skill=design", Some(&org_token)).await?).await?;
    assert_eq!(listing["total"], 0);

    let response = app
        .get(&format!("/api/experts/{expert_id}"), Some(&org_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn skill_search_covers_every_skill_and_follows_edits() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (expert_id, token) = app.signed_in("generalist@example.com", "expert").await?;
    let (_, org_token) = app.signed_in("hub@example.com", "organization").await?;

    let skills: Vec<String> = (0..15).map(|n| format!("Skill{n}")).collect();
    for (step, body) in [
        (
            "basics",
            json!({
                "headline": "Generalist operator",
                "bio": "Has done a bit of everything across a dozen early-stage teams.",
                "location": "Lisbon",
            }),
        ),
        (
            "expertise",
            json!({ "skills": skills, "industries": ["SaaS"], "years_experience": 9 }),
        ),
        ("rates", json!({ "hourly_rate": 95, "availability": "part_time" })),
        ("links", json!({ "linkedin_url": "https://linkedin.com/in/generalist" })),
    ] {
        let response = app
            .put_json(&format!("/api/profiles/me/steps/{step}"), &body, Some(&token))
            .await?;
        assert_eq!(response.status(), StatusCode::OK, "step {step}");
    }
    let response = app
        .post_empty("/api/profiles/me/complete", Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let listing: Value =
        read_json(app.get("/api/experts?skill=skill14", Some(&org_token)).await?).await?;
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["items"][0]["user_id"], json!(expert_id));

    let response = app
        .put_json(
            "/api/profiles/me/steps/expertise",
            &json!({ "skills": ["Pricing"], "industries": ["SaaS"], "years_experience": 9 }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let me: Value = read_json(response).await?;
    let hashtags = me["profile"]["hashtags"].as_array().expect("hashtags");
    assert!(hashtags.contains(&json!("#pricing")));
    assert!(!hashtags.contains(&json!("#skill0")));

    let listing: Value =
        read_json(app.get("/api/experts?skill=PRICING", Some(&org_token)).await?).await?;
    assert_eq!(listing["total"], 1);
    let listing: Value =
        read_json(app.get("/api/experts?skill=skill0", Some(&org_token)).await?).await?;
    assert_eq!(listing["total"], 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn unfinished_profiles_stay_private() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (expert_id, expert_token) = app.signed_in("draft@example.com", "expert").await?;
    let (org_id, org_token) = app.signed_in("org@example.com", "organization").await?;

    let response = app
        .get(&format!("/api/experts/{expert_id}"), Some(&org_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = app
        .get(&format!("/api/experts/{expert_id}"), Some(&expert_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .get(&format!("/api/organizations/{org_id}"), Some(&expert_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .put_json("/api/profiles/me/steps/payment", &json!({}), Some(&org_token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .put_json("/api/profiles/me/draft", &json!(["not", "an", "object"]), Some(&org_token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

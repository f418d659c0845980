use axum::{extract::State, http::StatusCode, response::Json};
use diesel::prelude::*;
use serde::Serialize;
use serde_json::json;

use crate::{
    error::AppResult,
    schema::{campaigns, expert_profiles, organization_profiles},
    state::AppState,
    status::CampaignStatus,
};

pub async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

#[derive(Debug, Serialize)]
pub struct PublicStats {
    pub experts: i64,
    pub organizations: i64,
    pub open_campaigns: i64,
}

/// Counters shown on the landing page.
pub async fn public_stats(State(state): State<AppState>) -> AppResult<Json<PublicStats>> {
    let mut conn = state.db()?;

    let experts = expert_profiles::table
        .filter(expert_profiles::completed_at.is_not_null())
        .count()
        .get_result(&mut conn)?;
    let organizations = organization_profiles::table
        .filter(organization_profiles::completed_at.is_not_null())
        .count()
        .get_result(&mut conn)?;
    let open_campaigns = campaigns::table
        .filter(campaigns::status.eq(CampaignStatus::Open.as_str()))
        .count()
        .get_result(&mut conn)?;

    Ok(Json(PublicStats {
        experts,
        organizations,
        open_campaigns,
    }))
}

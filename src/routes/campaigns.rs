use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::pg::{Pg, PgConnection};
use diesel::{prelude::*, select};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Campaign, NewCampaign},
    notify::{insert_notifications, new_notification, publish_inserted, NotificationKind},
    schema::{campaigns, organization_profiles, proposals},
    state::AppState,
    status::{CampaignStatus, ProposalStatus, UserRole},
    utils::{
        json::{classify_field, NullableField},
        pagination::{Page, PageParams},
        time::{to_iso, today},
    },
    validation::Checks,
};

const MAX_REQUIRED_SKILLS: usize = 20;
const MAX_DESCRIPTION_LENGTH: usize = 10_000;

#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub organization_name: Option<String>,
    pub title: String,
    pub description: String,
    pub required_skills: Vec<String>,
    pub budget_min: Option<i32>,
    pub budget_max: Option<i32>,
    pub deadline: Option<NaiveDate>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl CampaignResponse {
    pub fn new(campaign: Campaign, organization_name: Option<String>) -> Self {
        Self {
            id: campaign.id,
            organization_id: campaign.organization_id,
            organization_name,
            title: campaign.title,
            description: campaign.description,
            required_skills: campaign.required_skills,
            budget_min: campaign.budget_min,
            budget_max: campaign.budget_max,
            deadline: campaign.deadline,
            status: campaign.status,
            created_at: to_iso(campaign.created_at),
            updated_at: to_iso(campaign.updated_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CampaignListQuery {
    pub status: Option<String>,
    pub skill: Option<String>,
    pub query: Option<String>,
    pub organization_id: Option<Uuid>,
    #[serde(default)]
    pub mine: bool,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub required_skills: Option<Vec<String>>,
    pub budget_min: Option<i32>,
    pub budget_max: Option<i32>,
    pub deadline: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = campaigns)]
struct CampaignChanges {
    title: Option<String>,
    description: Option<String>,
    required_skills: Option<Vec<String>>,
    budget_min: Option<Option<i32>>,
    budget_max: Option<Option<i32>>,
    deadline: Option<Option<NaiveDate>>,
    reminder_sent_at: Option<Option<NaiveDateTime>>,
    updated_at: Option<NaiveDateTime>,
}

fn campaign_listing(
    query: &CampaignListQuery,
    caller: Uuid,
    status: Option<CampaignStatus>,
) -> campaigns::BoxedQuery<'static, Pg> {
    let mut statement = campaigns::table.into_boxed();

    if query.mine {
        statement = statement.filter(campaigns::organization_id.eq(caller));
        if let Some(status) = status {
            statement = statement.filter(campaigns::status.eq(status.as_str()));
        }
    } else {
        let status = status.unwrap_or(CampaignStatus::Open);
        if status == CampaignStatus::Draft {
            statement = statement
                .filter(campaigns::organization_id.eq(caller))
                .filter(campaigns::status.eq(status.as_str()));
        } else {
            statement = statement.filter(campaigns::status.eq(status.as_str()));
        }
        if let Some(organization_id) = query.organization_id {
            statement = statement.filter(campaigns::organization_id.eq(organization_id));
        }
    }

    if let Some(skill) = query.skill.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        statement = statement.filter(campaigns::required_skills.contains(vec![skill.to_string()]));
    }

    if let Some(text) = query.query.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = format!("%{}%", text.replace('%', "\\%").replace('_', "\\_"));
        statement = statement.filter(
            campaigns::title
                .ilike(pattern.clone())
                .or(campaigns::description.ilike(pattern)),
        );
    }

    statement
}

pub async fn list_campaigns(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<CampaignListQuery>,
) -> AppResult<Json<Page<CampaignResponse>>> {
    let status = query
        .status
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(str::parse::<CampaignStatus>)
        .transpose()
        .map_err(AppError::bad_request)?;
    let params = PageParams {
        page: query.page,
        per_page: query.per_page,
    };

    let mut conn = state.db()?;
    let total: i64 = campaign_listing(&query, user.user_id, status)
        .count()
        .get_result(&mut conn)?;
    let rows: Vec<Campaign> = campaign_listing(&query, user.user_id, status)
        .order(campaigns::created_at.desc())
        .limit(params.per_page())
        .offset(params.offset())
        .load(&mut conn)?;

    let names = organization_names(&mut conn, rows.iter().map(|c| c.organization_id))?;
    let items = rows
        .into_iter()
        .map(|campaign| {
            let name = names.get(&campaign.organization_id).cloned().flatten();
            CampaignResponse::new(campaign, name)
        })
        .collect();

    Ok(Json(Page::new(items, params, total)))
}

pub async fn create_campaign(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCampaignRequest>,
) -> AppResult<(StatusCode, Json<CampaignResponse>)> {
    user.require_role(UserRole::Organization)?;

    let mut checks = Checks::new();
    let title = checks.text("title", payload.title.as_deref(), 5, 160);
    let description = checks.text(
        "description",
        payload.description.as_deref(),
        30,
        MAX_DESCRIPTION_LENGTH,
    );
    let required_skills = checks.labels(
        "required_skills",
        payload.required_skills.as_deref(),
        0,
        MAX_REQUIRED_SKILLS,
    );
    check_budget(&mut checks, payload.budget_min, payload.budget_max);
    check_deadline(&mut checks, payload.deadline);
    let (Some(title), Some(description), Some(required_skills)) =
        (title, description, required_skills)
    else {
        return Err(AppError::validation(checks.into_errors()));
    };
    checks.finish_http(())?;

    let new_campaign = NewCampaign {
        id: Uuid::new_v4(),
        organization_id: user.user_id,
        title,
        description,
        required_skills,
        budget_min: payload.budget_min,
        budget_max: payload.budget_max,
        deadline: payload.deadline,
        status: CampaignStatus::Draft.as_str().to_string(),
    };

    let mut conn = state.db()?;
    let campaign: Campaign = diesel::insert_into(campaigns::table)
        .values(&new_campaign)
        .get_result(&mut conn)?;
    let name = organization_name(&mut conn, user.user_id)?;

    info!(campaign_id = %campaign.id, organization_id = %user.user_id, "campaign created");
    Ok((StatusCode::CREATED, Json(CampaignResponse::new(campaign, name))))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(campaign_id): Path<Uuid>,
) -> AppResult<Json<CampaignResponse>> {
    let mut conn = state.db()?;
    let campaign = load_campaign(&mut conn, campaign_id)?;
    if campaign.organization_id != user.user_id
        && campaign_status(&campaign)? == CampaignStatus::Draft
    {
        return Err(AppError::not_found());
    }
    let name = organization_name(&mut conn, campaign.organization_id)?;
    Ok(Json(CampaignResponse::new(campaign, name)))
}

pub async fn update_campaign(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(campaign_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<CampaignResponse>> {
    if !body.is_object() {
        return Err(AppError::bad_request("body must be a JSON object"));
    }

    let mut conn = state.db()?;
    let campaign = load_campaign(&mut conn, campaign_id)?;
    require_owner(&campaign, user.user_id)?;
    if !campaign_status(&campaign)?.is_editable() {
        return Err(AppError::conflict(
            "only draft or open campaigns can be edited",
        ));
    }

    let mut checks = Checks::new();
    let mut changes = CampaignChanges::default();

    match classify_field::<String>(&body, "title") {
        Ok(NullableField::Omitted) => {}
        Ok(NullableField::Value(title)) => {
            changes.title = checks.text("title", Some(&title), 5, 160);
        }
        Ok(NullableField::Null) => checks.fail("title", "is required"),
        Err(message) => checks.fail("title", message),
    }
    match classify_field::<String>(&body, "description") {
        Ok(NullableField::Omitted) => {}
        Ok(NullableField::Value(description)) => {
            changes.description =
                checks.text("description", Some(&description), 30, MAX_DESCRIPTION_LENGTH);
        }
        Ok(NullableField::Null) => checks.fail("description", "is required"),
        Err(message) => checks.fail("description", message),
    }
    match classify_field::<Vec<String>>(&body, "required_skills") {
        Ok(NullableField::Omitted) => {}
        Ok(NullableField::Value(skills)) => {
            changes.required_skills =
                checks.labels("required_skills", Some(&skills), 0, MAX_REQUIRED_SKILLS);
        }
        Ok(NullableField::Null) => changes.required_skills = Some(Vec::new()),
        Err(message) => checks.fail("required_skills", message),
    }
    match classify_field::<i32>(&body, "budget_min") {
        Ok(field) => changes.budget_min = field.into_change(),
        Err(message) => checks.fail("budget_min", message),
    }
    match classify_field::<i32>(&body, "budget_max") {
        Ok(field) => changes.budget_max = field.into_change(),
        Err(message) => checks.fail("budget_max", message),
    }
    match classify_field::<NaiveDate>(&body, "deadline") {
        Ok(field) => {
            if let NullableField::Value(deadline) = &field {
                check_deadline(&mut checks, Some(*deadline));
            }
            changes.deadline = field.into_change();
            if changes.deadline.is_some_and(|deadline| deadline != campaign.deadline) {
                changes.reminder_sent_at = Some(None);
            }
        }
        Err(message) => checks.fail("deadline", message),
    }

    let budget_min = changes.budget_min.unwrap_or(campaign.budget_min);
    let budget_max = changes.budget_max.unwrap_or(campaign.budget_max);
    check_budget(&mut checks, budget_min, budget_max);
    checks.finish_http(())?;

    changes.updated_at = Some(Utc::now().naive_utc());
    let updated: Campaign = diesel::update(campaigns::table.find(campaign.id))
        .set(&changes)
        .get_result(&mut conn)?;
    let name = organization_name(&mut conn, updated.organization_id)?;

    Ok(Json(CampaignResponse::new(updated, name)))
}

pub async fn change_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(campaign_id): Path<Uuid>,
    Json(payload): Json<StatusRequest>,
) -> AppResult<Json<CampaignResponse>> {
    let next: CampaignStatus = payload.status.parse().map_err(AppError::bad_request)?;

    let mut conn = state.db()?;
    let (updated, notified) = conn.transaction::<_, AppError, _>(|conn| {
        let campaign: Campaign = campaigns::table
            .find(campaign_id)
            .for_update()
            .first(conn)?;
        require_owner(&campaign, user.user_id)?;

        let current = campaign_status(&campaign)?;
        if !current.can_transition_to(next) {
            return Err(AppError::conflict(format!(
                "cannot move a {current} campaign to {next}"
            )));
        }
        if next == CampaignStatus::InProgress && accepted_expert(conn, campaign.id)?.is_none() {
            return Err(AppError::conflict(
                "accept a proposal before starting the campaign",
            ));
        }

        let now = Utc::now().naive_utc();
        let updated: Campaign = diesel::update(campaigns::table.find(campaign.id))
            .set((
                campaigns::status.eq(next.as_str()),
                campaigns::updated_at.eq(now),
            ))
            .get_result(conn)?;

        let notified = if next.is_terminal() {
            let experts: Vec<Uuid> = proposals::table
                .filter(proposals::campaign_id.eq(campaign.id))
                .filter(proposals::status.eq_any(vec![
                    ProposalStatus::Pending.as_str(),
                    ProposalStatus::Accepted.as_str(),
                ]))
                .select(proposals::expert_id)
                .load(conn)?;
            let link = Some(format!("/campaigns/{}", campaign.id));
            let drafts: Vec<_> = experts
                .into_iter()
                .map(|expert_id| {
                    new_notification(
                        expert_id,
                        NotificationKind::CampaignUpdated,
                        format!("Campaign {next}"),
                        format!("\"{}\" is now {next}.", campaign.title),
                        link.clone(),
                    )
                })
                .collect();
            insert_notifications(conn, &drafts)?
        } else {
            Vec::new()
        };

        Ok((updated, notified))
    })?;

    publish_inserted(&state.realtime, notified);
    info!(campaign_id = %campaign_id, status = %next, "campaign status changed");

    let name = organization_name(&mut conn, updated.organization_id)?;
    Ok(Json(CampaignResponse::new(updated, name)))
}

pub async fn delete_campaign(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(campaign_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let campaign = load_campaign(&mut conn, campaign_id)?;
    require_owner(&campaign, user.user_id)?;

    match campaign_status(&campaign)? {
        CampaignStatus::Draft | CampaignStatus::Cancelled => {}
        _ => {
            return Err(AppError::conflict(
                "only draft or cancelled campaigns can be deleted",
            ))
        }
    }

    diesel::delete(campaigns::table.find(campaign.id)).execute(&mut conn)?;
    info!(campaign_id = %campaign.id, "campaign deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn check_budget(checks: &mut Checks, min: Option<i32>, max: Option<i32>) {
    if min.is_some_and(|value| value < 0) {
        checks.fail("budget_min", "must not be negative");
    }
    if max.is_some_and(|value| value < 0) {
        checks.fail("budget_max", "must not be negative");
    }
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            checks.fail("budget_max", "must be at least budget_min");
        }
    }
}

fn check_deadline(checks: &mut Checks, deadline: Option<NaiveDate>) {
    if deadline.is_some_and(|date| date < today()) {
        checks.fail("deadline", "must not be in the past");
    }
}

pub(crate) fn load_campaign(conn: &mut PgConnection, campaign_id: Uuid) -> AppResult<Campaign> {
    Ok(campaigns::table.find(campaign_id).first(conn)?)
}

pub(crate) fn campaign_status(campaign: &Campaign) -> AppResult<CampaignStatus> {
    campaign
        .status
        .parse()
        .map_err(|err| AppError::internal(format!("campaign {}: {err}", campaign.id)))
}

pub(crate) fn require_owner(campaign: &Campaign, user_id: Uuid) -> AppResult<()> {
    if campaign.organization_id == user_id {
        Ok(())
    } else {
        Err(AppError::forbidden("only the campaign owner may do this"))
    }
}

/// The expert whose proposal was accepted, if any.
pub(crate) fn accepted_expert(
    conn: &mut PgConnection,
    campaign_id: Uuid,
) -> QueryResult<Option<Uuid>> {
    proposals::table
        .filter(proposals::campaign_id.eq(campaign_id))
        .filter(proposals::status.eq(ProposalStatus::Accepted.as_str()))
        .select(proposals::expert_id)
        .first(conn)
        .optional()
}

/// Owner, or an expert with any proposal on the campaign.
pub(crate) fn is_participant(
    conn: &mut PgConnection,
    campaign: &Campaign,
    user_id: Uuid,
) -> QueryResult<bool> {
    if campaign.organization_id == user_id {
        return Ok(true);
    }
    select(exists(
        proposals::table
            .filter(proposals::campaign_id.eq(campaign.id))
            .filter(proposals::expert_id.eq(user_id)),
    ))
    .get_result(conn)
}

pub(crate) fn organization_name(
    conn: &mut PgConnection,
    organization_id: Uuid,
) -> AppResult<Option<String>> {
    let name = organization_profiles::table
        .find(organization_id)
        .select(organization_profiles::organization_name)
        .first::<Option<String>>(conn)
        .optional()?;
    Ok(name.flatten())
}

pub(crate) fn organization_names(
    conn: &mut PgConnection,
    ids: impl Iterator<Item = Uuid>,
) -> AppResult<HashMap<Uuid, Option<String>>> {
    let ids: Vec<Uuid> = ids.collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = organization_profiles::table
        .filter(organization_profiles::user_id.eq_any(&ids))
        .select((
            organization_profiles::user_id,
            organization_profiles::organization_name,
        ))
        .load::<(Uuid, Option<String>)>(conn)?;
    Ok(rows.into_iter().collect())
}

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::pg::{Pg, PgConnection};
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_types::{Bool, Text};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{ExpertProfile, OrganizationProfile, User},
    profiles::{
        expert_hashtags, organization_hashtags,
        wizard::{
            resume_step, ExpertFields, ExpertWizard, OrganizationFields, OrganizationWizard,
            ProfileWizard,
        },
        MAX_DRAFT_BYTES,
    },
    schema::{expert_profiles, organization_profiles, users},
    state::AppState,
    status::UserRole,
    utils::{
        pagination::{Page, PageParams},
        time::to_iso,
    },
};

#[derive(Debug, Serialize)]
pub struct ExpertProfileResponse {
    pub user_id: Uuid,
    pub full_name: String,
    pub headline: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub skills: Vec<String>,
    pub industries: Vec<String>,
    pub years_experience: Option<i32>,
    pub hourly_rate: Option<i32>,
    pub availability: Option<String>,
    pub linkedin_url: Option<String>,
    pub portfolio_url: Option<String>,
    pub hashtags: Vec<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

impl ExpertProfileResponse {
    fn new(profile: ExpertProfile, full_name: String) -> Self {
        Self {
            user_id: profile.user_id,
            full_name,
            headline: profile.headline,
            bio: profile.bio,
            location: profile.location,
            skills: profile.skills,
            industries: profile.industries,
            years_experience: profile.years_experience,
            hourly_rate: profile.hourly_rate,
            availability: profile.availability,
            linkedin_url: profile.linkedin_url,
            portfolio_url: profile.portfolio_url,
            hashtags: profile.hashtags,
            completed_at: profile.completed_at.map(to_iso),
            updated_at: to_iso(profile.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrganizationProfileResponse {
    pub user_id: Uuid,
    pub full_name: String,
    pub organization_name: Option<String>,
    pub organization_type: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub location: Option<String>,
    pub team_size: Option<i32>,
    pub focus_areas: Vec<String>,
    pub hashtags: Vec<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
}

impl OrganizationProfileResponse {
    fn new(profile: OrganizationProfile, full_name: String) -> Self {
        Self {
            user_id: profile.user_id,
            full_name,
            organization_name: profile.organization_name,
            organization_type: profile.organization_type,
            description: profile.description,
            website: profile.website,
            location: profile.location,
            team_size: profile.team_size,
            focus_areas: profile.focus_areas,
            hashtags: profile.hashtags,
            completed_at: profile.completed_at.map(to_iso),
            updated_at: to_iso(profile.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ProfileBody {
    Expert(ExpertProfileResponse),
    Organization(OrganizationProfileResponse),
}

/// The caller's own profile together with where the wizard stands.
#[derive(Debug, Serialize)]
pub struct MyProfileResponse {
    pub role: UserRole,
    pub profile: ProfileBody,
    pub steps: &'static [&'static str],
    pub current_step: usize,
    pub current_step_name: &'static str,
    pub draft: Option<Value>,
    pub completed: bool,
}

impl MyProfileResponse {
    fn expert(profile: ExpertProfile, full_name: String) -> Self {
        let steps = ExpertWizard::STEPS;
        let current_step = resume_step(profile.wizard_step, steps.len());
        Self {
            role: UserRole::Expert,
            draft: profile.draft.clone(),
            completed: profile.completed_at.is_some(),
            profile: ProfileBody::Expert(ExpertProfileResponse::new(profile, full_name)),
            steps,
            current_step,
            current_step_name: steps[current_step],
        }
    }

    fn organization(profile: OrganizationProfile, full_name: String) -> Self {
        let steps = OrganizationWizard::STEPS;
        let current_step = resume_step(profile.wizard_step, steps.len());
        Self {
            role: UserRole::Organization,
            draft: profile.draft.clone(),
            completed: profile.completed_at.is_some(),
            profile: ProfileBody::Organization(OrganizationProfileResponse::new(
                profile, full_name,
            )),
            steps,
            current_step,
            current_step_name: steps[current_step],
        }
    }
}

pub async fn get_my_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<MyProfileResponse>> {
    let mut conn = state.db()?;
    let full_name = load_full_name(&mut conn, user.user_id)?;

    let response = match user.role {
        UserRole::Expert => {
            let profile = load_expert_profile(&mut conn, user.user_id)?;
            MyProfileResponse::expert(profile, full_name)
        }
        UserRole::Organization => {
            let profile = load_organization_profile(&mut conn, user.user_id)?;
            MyProfileResponse::organization(profile, full_name)
        }
    };
    Ok(Json(response))
}

pub async fn save_step(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(step): Path<String>,
    Json(body): Json<Value>,
) -> AppResult<Json<MyProfileResponse>> {
    let mut conn = state.db()?;
    let full_name = load_full_name(&mut conn, user.user_id)?;
    let now = Utc::now().naive_utc();

    let response = match user.role {
        UserRole::Expert => {
            let index = ExpertWizard::step_index(&step)
                .ok_or_else(|| AppError::bad_request(format!("unknown wizard step '{step}'")))?;
            let fields: ExpertFields = parse_fields(body)?;
            let changes =
                ExpertWizard::validate_step(index, &fields).map_err(AppError::validation)?;

            let current = load_expert_profile(&mut conn, user.user_id)?;
            let next_step = current.wizard_step.max(index as i32 + 1);
            let mut updated: ExpertProfile =
                diesel::update(expert_profiles::table.find(user.user_id))
                    .set((
                        &changes,
                        expert_profiles::wizard_step.eq(next_step),
                        expert_profiles::draft.eq(None::<Value>),
                        expert_profiles::updated_at.eq(now),
                    ))
                    .get_result(&mut conn)?;
            if updated.completed_at.is_some() {
                refresh_expert_hashtags(&mut conn, &mut updated);
            }
            MyProfileResponse::expert(updated, full_name)
        }
        UserRole::Organization => {
            let index = OrganizationWizard::step_index(&step)
                .ok_or_else(|| AppError::bad_request(format!("unknown wizard step '{step}'")))?;
            let fields: OrganizationFields = parse_fields(body)?;
            let changes =
                OrganizationWizard::validate_step(index, &fields).map_err(AppError::validation)?;

            let current = load_organization_profile(&mut conn, user.user_id)?;
            let next_step = current.wizard_step.max(index as i32 + 1);
            let mut updated: OrganizationProfile =
                diesel::update(organization_profiles::table.find(user.user_id))
                    .set((
                        &changes,
                        organization_profiles::wizard_step.eq(next_step),
                        organization_profiles::draft.eq(None::<Value>),
                        organization_profiles::updated_at.eq(now),
                    ))
                    .get_result(&mut conn)?;
            if updated.completed_at.is_some() {
                refresh_organization_hashtags(&mut conn, &mut updated);
            }
            MyProfileResponse::organization(updated, full_name)
        }
    };

    info!(user_id = %user.user_id, step = %step, "profile step saved");
    Ok(Json(response))
}

pub async fn save_draft(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(draft): Json<Value>,
) -> AppResult<StatusCode> {
    if !draft.is_object() {
        return Err(AppError::bad_request("draft must be a JSON object"));
    }
    let size = serde_json::to_vec(&draft)?.len();
    if size > MAX_DRAFT_BYTES {
        return Err(AppError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("draft exceeds {MAX_DRAFT_BYTES} bytes"),
        ));
    }

    let mut conn = state.db()?;
    store_draft(&mut conn, user.user_id, user.role, Some(draft))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_draft(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    store_draft(&mut conn, user.user_id, user.role, None)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn complete_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<MyProfileResponse>> {
    let mut conn = state.db()?;
    let full_name = load_full_name(&mut conn, user.user_id)?;
    let now = Utc::now().naive_utc();

    let response = match user.role {
        UserRole::Expert => {
            let profile = load_expert_profile(&mut conn, user.user_id)?;
            ExpertWizard::validate_all(&ExpertFields::from(&profile))
                .map_err(AppError::validation)?;

            let mut completed: ExpertProfile =
                diesel::update(expert_profiles::table.find(user.user_id))
                    .set((
                        expert_profiles::completed_at.eq(profile.completed_at.or(Some(now))),
                        expert_profiles::wizard_step.eq(ExpertWizard::STEPS.len() as i32),
                        expert_profiles::draft.eq(None::<Value>),
                        expert_profiles::updated_at.eq(now),
                    ))
                    .get_result(&mut conn)?;

            refresh_expert_hashtags(&mut conn, &mut completed);
            MyProfileResponse::expert(completed, full_name)
        }
        UserRole::Organization => {
            let profile = load_organization_profile(&mut conn, user.user_id)?;
            OrganizationWizard::validate_all(&OrganizationFields::from(&profile))
                .map_err(AppError::validation)?;

            let mut completed: OrganizationProfile =
                diesel::update(organization_profiles::table.find(user.user_id))
                    .set((
                        organization_profiles::completed_at
                            .eq(profile.completed_at.or(Some(now))),
                        organization_profiles::wizard_step
                            .eq(OrganizationWizard::STEPS.len() as i32),
                        organization_profiles::draft.eq(None::<Value>),
                        organization_profiles::updated_at.eq(now),
                    ))
                    .get_result(&mut conn)?;

            refresh_organization_hashtags(&mut conn, &mut completed);
            MyProfileResponse::organization(completed, full_name)
        }
    };

    info!(user_id = %user.user_id, "profile completed");
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ExpertSearchQuery {
    pub query: Option<String>,
    pub skill: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ExpertSummary {
    pub user_id: Uuid,
    pub full_name: String,
    pub headline: Option<String>,
    pub location: Option<String>,
    pub skills: Vec<String>,
    pub hourly_rate: Option<i32>,
    pub availability: Option<String>,
    pub years_experience: Option<i32>,
    pub hashtags: Vec<String>,
}

fn expert_directory(query: &ExpertSearchQuery) -> expert_profiles::BoxedQuery<'static, Pg> {
    let active_users = users::table
        .filter(users::is_active.eq(true))
        .select(users::id);
    let mut statement = expert_profiles::table
        .filter(expert_profiles::completed_at.is_not_null())
        .filter(expert_profiles::user_id.eq_any(active_users))
        .into_boxed();

    if let Some(skill) = query.skill.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        // Case-insensitive match against any stored skill.
        statement = statement.filter(
            sql::<Bool>(
                "EXISTS (SELECT 1 FROM unnest(expert_profiles.skills) AS skill \
                 WHERE lower(skill) = lower(",
            )
            .bind::<Text, _>(skill.to_string())
            .sql("))"),
        );
    }

    if let Some(text) = query.query.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = format!("%{}%", text.replace('%', "\\%").replace('_', "\\_"));
        let named = users::table
            .filter(users::full_name.ilike(pattern.clone()))
            .select(users::id);
        statement = statement.filter(
            expert_profiles::headline
                .ilike(pattern.clone())
                .or(expert_profiles::bio.ilike(pattern))
                .or(expert_profiles::user_id.eq_any(named).nullable()),
        );
    }

    statement
}

pub async fn list_experts(
    State(state): State<AppState>,
    Query(query): Query<ExpertSearchQuery>,
) -> AppResult<Json<Page<ExpertSummary>>> {
    let params = PageParams {
        page: query.page,
        per_page: query.per_page,
    };
    let mut conn = state.db()?;

    let total: i64 = expert_directory(&query).count().get_result(&mut conn)?;
    let profiles: Vec<ExpertProfile> = expert_directory(&query)
        .order(expert_profiles::completed_at.desc())
        .limit(params.per_page())
        .offset(params.offset())
        .load(&mut conn)?;

    let ids: Vec<Uuid> = profiles.iter().map(|profile| profile.user_id).collect();
    let names: HashMap<Uuid, String> = users::table
        .filter(users::id.eq_any(&ids))
        .select((users::id, users::full_name))
        .load::<(Uuid, String)>(&mut conn)?
        .into_iter()
        .collect();

    let items = profiles
        .into_iter()
        .map(|profile| ExpertSummary {
            full_name: names.get(&profile.user_id).cloned().unwrap_or_default(),
            user_id: profile.user_id,
            headline: profile.headline,
            location: profile.location,
            skills: profile.skills,
            hourly_rate: profile.hourly_rate,
            availability: profile.availability,
            years_experience: profile.years_experience,
            hashtags: profile.hashtags,
        })
        .collect();

    Ok(Json(Page::new(items, params, total)))
}

pub async fn get_expert(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(expert_id): Path<Uuid>,
) -> AppResult<Json<ExpertProfileResponse>> {
    let mut conn = state.db()?;
    let profile = load_expert_profile(&mut conn, expert_id)?;
    if profile.completed_at.is_none() && profile.user_id != user.user_id {
        return Err(AppError::not_found());
    }
    let full_name = load_full_name(&mut conn, expert_id)?;
    Ok(Json(ExpertProfileResponse::new(profile, full_name)))
}

pub async fn get_organization(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(organization_id): Path<Uuid>,
) -> AppResult<Json<OrganizationProfileResponse>> {
    let mut conn = state.db()?;
    let profile = load_organization_profile(&mut conn, organization_id)?;
    if profile.completed_at.is_none() && profile.user_id != user.user_id {
        return Err(AppError::not_found());
    }
    let full_name = load_full_name(&mut conn, organization_id)?;
    Ok(Json(OrganizationProfileResponse::new(profile, full_name)))
}

/// Hashtags follow the stored labels. A failure is logged and the old
/// tags stay.
fn refresh_expert_hashtags(conn: &mut PgConnection, profile: &mut ExpertProfile) {
    let hashtags = expert_hashtags(profile);
    match diesel::update(expert_profiles::table.find(profile.user_id))
        .set(expert_profiles::hashtags.eq(&hashtags))
        .execute(conn)
    {
        Ok(_) => profile.hashtags = hashtags,
        Err(err) => warn!(user_id = %profile.user_id, error = %err, "failed to store hashtags"),
    }
}

fn refresh_organization_hashtags(conn: &mut PgConnection, profile: &mut OrganizationProfile) {
    let hashtags = organization_hashtags(profile);
    match diesel::update(organization_profiles::table.find(profile.user_id))
        .set(organization_profiles::hashtags.eq(&hashtags))
        .execute(conn)
    {
        Ok(_) => profile.hashtags = hashtags,
        Err(err) => warn!(user_id = %profile.user_id, error = %err, "failed to store hashtags"),
    }
}

fn parse_fields<T: serde::de::DeserializeOwned>(body: Value) -> AppResult<T> {
    serde_json::from_value(body)
        .map_err(|err| AppError::bad_request(format!("invalid profile fields: {err}")))
}

fn load_full_name(conn: &mut PgConnection, user_id: Uuid) -> AppResult<String> {
    let user: User = users::table.find(user_id).first(conn)?;
    Ok(user.full_name)
}

fn load_expert_profile(conn: &mut PgConnection, user_id: Uuid) -> AppResult<ExpertProfile> {
    Ok(expert_profiles::table.find(user_id).first(conn)?)
}

fn load_organization_profile(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> AppResult<OrganizationProfile> {
    Ok(organization_profiles::table.find(user_id).first(conn)?)
}

fn store_draft(
    conn: &mut PgConnection,
    user_id: Uuid,
    role: UserRole,
    draft: Option<Value>,
) -> AppResult<()> {
    let now = Utc::now().naive_utc();
    let updated = match role {
        UserRole::Expert => diesel::update(expert_profiles::table.find(user_id))
            .set((
                expert_profiles::draft.eq(draft),
                expert_profiles::updated_at.eq(now),
            ))
            .execute(conn)?,
        UserRole::Organization => diesel::update(organization_profiles::table.find(user_id))
            .set((
                organization_profiles::draft.eq(draft),
                organization_profiles::updated_at.eq(now),
            ))
            .execute(conn)?,
    };
    if updated == 0 {
        return Err(AppError::not_found());
    }
    Ok(())
}

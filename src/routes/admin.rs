use std::collections::{BTreeMap, HashMap};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::auth::revoke_all_refresh_tokens;
use crate::{
    auth::AdminUser,
    error::{AppError, AppResult},
    export::{CsvDownload, CsvRow},
    models::{AdminLog, NewAdminLog, Proposal, User},
    schema::{admin_logs, campaigns, proposals, users},
    state::AppState,
    status::{CampaignStatus, ProposalStatus, UserRole},
    utils::{
        pagination::{Page, PageParams},
        time::{to_iso, today},
    },
    validation::Checks,
};

const DEFAULT_LOG_LIMIT: i64 = 100;
const MAX_LOG_LIMIT: i64 = 1000;
const MAX_EXPORT_ROWS: i64 = 10_000;
const SIGNUP_WINDOW_DAYS: i64 = 30;

/// Appends one row to the admin audit trail.
pub(crate) fn record_admin_action(
    conn: &mut PgConnection,
    admin_id: Uuid,
    action: &str,
    target_type: &str,
    target_id: Option<Uuid>,
    details: Value,
) -> QueryResult<()> {
    diesel::insert_into(admin_logs::table)
        .values(&NewAdminLog {
            id: Uuid::new_v4(),
            admin_id: Some(admin_id),
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_id,
            details,
        })
        .execute(conn)?;
    Ok(())
}

fn wants_csv(format: Option<&str>) -> bool {
    format.is_some_and(|value| value.eq_ignore_ascii_case("csv"))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub action: Option<String>,
    pub admin_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdminLogResponse {
    pub id: Uuid,
    pub admin_id: Option<Uuid>,
    pub admin_email: Option<String>,
    pub action: String,
    pub target_type: String,
    pub target_id: Option<Uuid>,
    pub details: Value,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
struct AdminLogCsvRow {
    created_at: String,
    admin_email: Option<String>,
    action: String,
    target_type: String,
    target_id: Option<Uuid>,
    details: String,
}

impl CsvRow for AdminLogCsvRow {
    const HEADERS: &'static [&'static str] = &[
        "created_at",
        "admin_email",
        "action",
        "target_type",
        "target_id",
        "details",
    ];
}

pub async fn list_logs(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<LogQuery>,
) -> AppResult<Response> {
    let csv = wants_csv(query.format.as_deref());
    let limit = if csv {
        MAX_EXPORT_ROWS
    } else {
        query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT)
    };

    let mut conn = state.db()?;
    let mut statement = admin_logs::table
        .left_join(users::table)
        .select((admin_logs::all_columns, users::email.nullable()))
        .into_boxed();
    if let Some(action) = query.action.as_deref().filter(|a| !a.trim().is_empty()) {
        statement = statement.filter(admin_logs::action.eq(action.trim().to_string()));
    }
    if let Some(admin_id) = query.admin_id {
        statement = statement.filter(admin_logs::admin_id.eq(admin_id));
    }

    let rows: Vec<(AdminLog, Option<String>)> = statement
        .order(admin_logs::created_at.desc())
        .limit(limit)
        .load(&mut conn)?;

    if csv {
        let records: Vec<AdminLogCsvRow> = rows
            .into_iter()
            .map(|(log, admin_email)| AdminLogCsvRow {
                created_at: to_iso(log.created_at),
                admin_email,
                action: log.action,
                target_type: log.target_type,
                target_id: log.target_id,
                details: log.details.to_string(),
            })
            .collect();
        return Ok(CsvDownload::new("admin-logs.csv", &records)?.into_response());
    }

    let items: Vec<AdminLogResponse> = rows
        .into_iter()
        .map(|(log, admin_email)| AdminLogResponse {
            id: log.id,
            admin_id: log.admin_id,
            admin_email,
            action: log.action,
            target_type: log.target_type,
            target_id: log.target_id,
            details: log.details,
            created_at: to_iso(log.created_at),
        })
        .collect();
    Ok(Json(items).into_response())
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub query: Option<String>,
    pub role: Option<UserRole>,
    pub format: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AdminUserResponse {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub last_login_at: Option<String>,
    pub created_at: String,
}

impl CsvRow for AdminUserResponse {
    const HEADERS: &'static [&'static str] = &[
        "id",
        "email",
        "full_name",
        "role",
        "is_admin",
        "is_active",
        "last_login_at",
        "created_at",
    ];
}

impl From<User> for AdminUserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
            is_admin: user.is_admin,
            is_active: user.is_active,
            last_login_at: user.last_login_at.map(to_iso),
            created_at: to_iso(user.created_at),
        }
    }
}

fn user_listing(query: &UserQuery) -> users::BoxedQuery<'static, Pg> {
    let mut statement = users::table.into_boxed();
    if let Some(role) = query.role {
        statement = statement.filter(users::role.eq(role.as_str()));
    }
    if let Some(text) = query.query.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = format!("%{}%", text.replace('%', "\\%").replace('_', "\\_"));
        statement = statement.filter(
            users::email
                .ilike(pattern.clone())
                .or(users::full_name.ilike(pattern)),
        );
    }
    statement
}

pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<UserQuery>,
) -> AppResult<Response> {
    let mut conn = state.db()?;

    if wants_csv(query.format.as_deref()) {
        let rows: Vec<User> = user_listing(&query)
            .order(users::created_at.desc())
            .limit(MAX_EXPORT_ROWS)
            .load(&mut conn)?;
        let records: Vec<AdminUserResponse> =
            rows.into_iter().map(AdminUserResponse::from).collect();
        return Ok(CsvDownload::new("users.csv", &records)?.into_response());
    }

    let params = PageParams {
        page: query.page,
        per_page: query.per_page,
    };
    let total: i64 = user_listing(&query).count().get_result(&mut conn)?;
    let rows: Vec<User> = user_listing(&query)
        .order(users::created_at.desc())
        .limit(params.per_page())
        .offset(params.offset())
        .load(&mut conn)?;
    let items = rows.into_iter().map(AdminUserResponse::from).collect();
    Ok(Json(Page::new(items, params, total)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub is_admin: Option<bool>,
    pub is_active: Option<bool>,
    pub full_name: Option<String>,
}

#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = users)]
struct UserChanges {
    is_admin: Option<bool>,
    is_active: Option<bool>,
    full_name: Option<String>,
}

pub async fn update_user(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<AdminUserResponse>> {
    if user_id == admin.user_id {
        if payload.is_admin == Some(false) {
            return Err(AppError::conflict("you cannot remove your own admin access"));
        }
        if payload.is_active == Some(false) {
            return Err(AppError::conflict("you cannot deactivate your own account"));
        }
    }

    let mut checks = Checks::new();
    let full_name = match payload.full_name.as_deref() {
        Some(name) => checks.text("full_name", Some(name), 2, 120),
        None => None,
    };
    checks.finish_http(())?;

    let changes = UserChanges {
        is_admin: payload.is_admin,
        is_active: payload.is_active,
        full_name,
    };
    if changes.is_admin.is_none() && changes.is_active.is_none() && changes.full_name.is_none() {
        return Err(AppError::bad_request("nothing to update"));
    }

    let mut conn = state.db()?;
    let updated = conn.transaction::<_, AppError, _>(|conn| {
        let before: User = users::table.find(user_id).for_update().first(conn)?;
        let updated: User = diesel::update(users::table.find(user_id))
            .set((&changes, users::updated_at.eq(Utc::now().naive_utc())))
            .get_result(conn)?;

        if before.is_active && !updated.is_active {
            revoke_all_refresh_tokens(conn, updated.id)?;
        }

        record_admin_action(
            conn,
            admin.user_id,
            "user.update",
            "user",
            Some(updated.id),
            json!({
                "is_admin": { "from": before.is_admin, "to": updated.is_admin },
                "is_active": { "from": before.is_active, "to": updated.is_active },
                "full_name": { "from": before.full_name, "to": updated.full_name },
            }),
        )?;
        Ok(updated)
    })?;

    info!(admin_id = %admin.user_id, user_id = %updated.id, "user updated by admin");
    Ok(Json(updated.into()))
}

pub async fn delete_user(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if user_id == admin.user_id {
        return Err(AppError::conflict("you cannot delete your own account"));
    }

    let mut conn = state.db()?;
    conn.transaction::<_, AppError, _>(|conn| {
        let user: User = users::table.find(user_id).first(conn)?;
        record_admin_action(
            conn,
            admin.user_id,
            "user.delete",
            "user",
            Some(user.id),
            json!({ "email": user.email, "role": user.role }),
        )?;
        diesel::delete(users::table.find(user.id)).execute(conn)?;
        Ok(())
    })?;

    info!(admin_id = %admin.user_id, user_id = %user_id, "user deleted by admin");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ProposalQuery {
    pub status: Option<ProposalStatus>,
    pub campaign_id: Option<Uuid>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AdminProposalResponse {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub campaign_title: String,
    pub expert_id: Uuid,
    pub expert_email: String,
    pub proposed_rate: i32,
    pub status: String,
    pub decided_at: Option<String>,
    pub created_at: String,
}

fn proposal_listing(query: &ProposalQuery) -> proposals::BoxedQuery<'static, Pg> {
    let mut statement = proposals::table.into_boxed();
    if let Some(status) = query.status {
        statement = statement.filter(proposals::status.eq(status.as_str()));
    }
    if let Some(campaign_id) = query.campaign_id {
        statement = statement.filter(proposals::campaign_id.eq(campaign_id));
    }
    statement
}

pub async fn list_proposals(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ProposalQuery>,
) -> AppResult<Json<Page<AdminProposalResponse>>> {
    let params = PageParams {
        page: query.page,
        per_page: query.per_page,
    };
    let mut conn = state.db()?;

    let total: i64 = proposal_listing(&query).count().get_result(&mut conn)?;
    let rows: Vec<Proposal> = proposal_listing(&query)
        .order(proposals::created_at.desc())
        .limit(params.per_page())
        .offset(params.offset())
        .load(&mut conn)?;

    let campaign_ids: Vec<Uuid> = rows.iter().map(|p| p.campaign_id).collect();
    let expert_ids: Vec<Uuid> = rows.iter().map(|p| p.expert_id).collect();
    let titles: HashMap<Uuid, String> = campaigns::table
        .filter(campaigns::id.eq_any(&campaign_ids))
        .select((campaigns::id, campaigns::title))
        .load::<(Uuid, String)>(&mut conn)?
        .into_iter()
        .collect();
    let emails: HashMap<Uuid, String> = users::table
        .filter(users::id.eq_any(&expert_ids))
        .select((users::id, users::email))
        .load::<(Uuid, String)>(&mut conn)?
        .into_iter()
        .collect();

    let items = rows
        .into_iter()
        .map(|proposal| AdminProposalResponse {
            campaign_title: titles.get(&proposal.campaign_id).cloned().unwrap_or_default(),
            expert_email: emails.get(&proposal.expert_id).cloned().unwrap_or_default(),
            id: proposal.id,
            campaign_id: proposal.campaign_id,
            expert_id: proposal.expert_id,
            proposed_rate: proposal.proposed_rate,
            status: proposal.status,
            decided_at: proposal.decided_at.map(to_iso),
            created_at: to_iso(proposal.created_at),
        })
        .collect();

    Ok(Json(Page::new(items, params, total)))
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub status: ProposalStatus,
}

/// Sets a proposal status directly. No notifications or emails go out.
pub async fn override_proposal(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(proposal_id): Path<Uuid>,
    Json(payload): Json<OverrideRequest>,
) -> AppResult<Json<AdminProposalResponse>> {
    let mut conn = state.db()?;
    let (updated, campaign_title, expert_email) =
        conn.transaction::<_, AppError, _>(|conn| {
            let before: Proposal = proposals::table.find(proposal_id).for_update().first(conn)?;
            let now = Utc::now().naive_utc();
            let decided_at = if payload.status.is_decided() {
                before.decided_at.or(Some(now))
            } else {
                None
            };
            let updated: Proposal = diesel::update(proposals::table.find(proposal_id))
                .set((
                    proposals::status.eq(payload.status.as_str()),
                    proposals::decided_at.eq(decided_at),
                    proposals::updated_at.eq(now),
                ))
                .get_result(conn)?;

            record_admin_action(
                conn,
                admin.user_id,
                "proposal.override",
                "proposal",
                Some(updated.id),
                json!({ "from": before.status, "to": updated.status }),
            )?;

            let campaign_title: String = campaigns::table
                .find(updated.campaign_id)
                .select(campaigns::title)
                .first(conn)?;
            let expert_email: String = users::table
                .find(updated.expert_id)
                .select(users::email)
                .first(conn)?;
            Ok((updated, campaign_title, expert_email))
        })?;

    info!(admin_id = %admin.user_id, proposal_id = %updated.id, status = %payload.status, "proposal overridden");
    Ok(Json(AdminProposalResponse {
        id: updated.id,
        campaign_id: updated.campaign_id,
        campaign_title,
        expert_id: updated.expert_id,
        expert_email,
        proposed_rate: updated.proposed_rate,
        status: updated.status,
        decided_at: updated.decided_at.map(to_iso),
        created_at: to_iso(updated.created_at),
    }))
}

#[derive(Debug, Serialize)]
pub struct SignupDay {
    pub date: NaiveDate,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct Analytics {
    pub total_users: i64,
    pub users_by_role: BTreeMap<String, i64>,
    pub campaigns_by_status: BTreeMap<String, i64>,
    pub proposals_by_status: BTreeMap<String, i64>,
    pub acceptance_rate: f64,
    pub signups_last_30_days: Vec<SignupDay>,
}

pub async fn analytics(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> AppResult<Json<Analytics>> {
    let mut conn = state.db()?;

    let mut users_by_role = zeroed(UserRole::ALL.iter().map(UserRole::as_str));
    users_by_role.extend(
        users::table
            .group_by(users::role)
            .select((users::role, diesel::dsl::count_star()))
            .load::<(String, i64)>(&mut conn)?,
    );
    let mut campaigns_by_status = zeroed(CampaignStatus::ALL.iter().map(CampaignStatus::as_str));
    campaigns_by_status.extend(
        campaigns::table
            .group_by(campaigns::status)
            .select((campaigns::status, diesel::dsl::count_star()))
            .load::<(String, i64)>(&mut conn)?,
    );
    let mut proposals_by_status = zeroed(ProposalStatus::ALL.iter().map(ProposalStatus::as_str));
    proposals_by_status.extend(
        proposals::table
            .group_by(proposals::status)
            .select((proposals::status, diesel::dsl::count_star()))
            .load::<(String, i64)>(&mut conn)?,
    );

    let first_day = today() - ChronoDuration::days(SIGNUP_WINDOW_DAYS - 1);
    let since = first_day.and_time(NaiveTime::default());
    let signups: Vec<NaiveDateTime> = users::table
        .filter(users::created_at.ge(since))
        .select(users::created_at)
        .load(&mut conn)?;

    Ok(Json(Analytics {
        total_users: users_by_role.values().sum(),
        acceptance_rate: acceptance_rate(&proposals_by_status),
        signups_last_30_days: signups_per_day(first_day, SIGNUP_WINDOW_DAYS, &signups),
        users_by_role,
        campaigns_by_status,
        proposals_by_status,
    }))
}

fn zeroed<'a>(keys: impl Iterator<Item = &'a str>) -> BTreeMap<String, i64> {
    keys.map(|key| (key.to_string(), 0)).collect()
}

/// Accepted share of decided proposals, ignoring withdrawn ones.
fn acceptance_rate(by_status: &BTreeMap<String, i64>) -> f64 {
    let accepted = by_status
        .get(ProposalStatus::Accepted.as_str())
        .copied()
        .unwrap_or(0);
    let rejected = by_status
        .get(ProposalStatus::Rejected.as_str())
        .copied()
        .unwrap_or(0);
    let decided = accepted + rejected;
    if decided == 0 {
        0.0
    } else {
        accepted as f64 / decided as f64
    }
}

fn signups_per_day(
    first_day: NaiveDate,
    days: i64,
    created: &[NaiveDateTime],
) -> Vec<SignupDay> {
    let mut counts: BTreeMap<NaiveDate, i64> = (0..days)
        .map(|offset| (first_day + ChronoDuration::days(offset), 0))
        .collect();
    for timestamp in created {
        if let Some(count) = counts.get_mut(&timestamp.date()) {
            *count += 1;
        }
    }
    counts
        .into_iter()
        .map(|(date, count)| SignupDay { date, count })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acceptance_rate_ignores_pending_and_withdrawn() {
        let mut counts = zeroed(ProposalStatus::ALL.iter().map(ProposalStatus::as_str));
        assert_eq!(acceptance_rate(&counts), 0.0);

        counts.insert("accepted".into(), 1);
        counts.insert("rejected".into(), 3);
        counts.insert("pending".into(), 10);
        counts.insert("withdrawn".into(), 4);
        assert_eq!(acceptance_rate(&counts), 0.25);
    }

    #[test]
    fn signups_are_bucketed_with_empty_days_filled() {
        let first = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let at = |day: u32, hour: u32| {
            NaiveDate::from_ymd_opt(2026, 3, day)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap()
        };
        let created = vec![at(1, 9), at(1, 23), at(3, 12), at(9, 8)];

        let days = signups_per_day(first, 3, &created);
        assert_eq!(days.len(), 3);
        assert_eq!(days[0].count, 2);
        assert_eq!(days[1].count, 0);
        assert_eq!(days[2].count, 1);
        assert_eq!(days[2].date, NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
    }

    #[test]
    fn csv_format_is_case_insensitive() {
        assert!(wants_csv(Some("CSV")));
        assert!(!wants_csv(Some("json")));
        assert!(!wants_csv(None));
    }
}

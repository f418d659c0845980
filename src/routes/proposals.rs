use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::campaigns::{campaign_status, load_campaign, require_owner};
use crate::{
    auth::AuthenticatedUser,
    email::{enqueue_email, templates},
    error::{AppError, AppResult},
    export::{CsvDownload, CsvRow},
    models::{Campaign, NewProposal, Proposal},
    notify::{
        insert_notifications, load_contact, load_contacts, new_notification, publish_inserted,
        NotificationKind,
    },
    schema::{campaigns, proposals, users},
    state::AppState,
    status::{CampaignStatus, ProposalStatus, UserRole},
    utils::time::to_iso,
    validation::Checks,
};

#[derive(Debug, Serialize)]
pub struct ProposalResponse {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub campaign_title: Option<String>,
    pub expert_id: Uuid,
    pub expert_name: Option<String>,
    pub cover_letter: String,
    pub proposed_rate: i32,
    pub estimated_days: Option<i32>,
    pub status: String,
    pub decided_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ProposalResponse {
    pub fn new(
        proposal: Proposal,
        campaign_title: Option<String>,
        expert_name: Option<String>,
    ) -> Self {
        Self {
            id: proposal.id,
            campaign_id: proposal.campaign_id,
            campaign_title,
            expert_id: proposal.expert_id,
            expert_name,
            cover_letter: proposal.cover_letter,
            proposed_rate: proposal.proposed_rate,
            estimated_days: proposal.estimated_days,
            status: proposal.status,
            decided_at: proposal.decided_at.map(to_iso),
            created_at: to_iso(proposal.created_at),
            updated_at: to_iso(proposal.updated_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitProposalRequest {
    pub cover_letter: Option<String>,
    pub proposed_rate: Option<i32>,
    pub estimated_days: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct AcceptResponse {
    pub proposal: ProposalResponse,
    pub rejected_count: usize,
    pub campaign_status: CampaignStatus,
}

#[derive(Debug, Serialize)]
struct ProposalCsvRow {
    expert_name: String,
    expert_email: String,
    status: String,
    proposed_rate: i32,
    estimated_days: Option<i32>,
    submitted_at: String,
    cover_letter: String,
}

impl CsvRow for ProposalCsvRow {
    const HEADERS: &'static [&'static str] = &[
        "expert_name",
        "expert_email",
        "status",
        "proposed_rate",
        "estimated_days",
        "submitted_at",
        "cover_letter",
    ];
}

pub async fn submit_proposal(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(campaign_id): Path<Uuid>,
    Json(payload): Json<SubmitProposalRequest>,
) -> AppResult<(StatusCode, Json<ProposalResponse>)> {
    user.require_role(UserRole::Expert)?;

    let mut checks = Checks::new();
    let cover_letter = checks.text("cover_letter", payload.cover_letter.as_deref(), 50, 5000);
    let proposed_rate = checks.int_range("proposed_rate", payload.proposed_rate, 1, 1_000_000);
    let estimated_days = checks.optional_int_range("estimated_days", payload.estimated_days, 1, 365);
    let (Some(cover_letter), Some(proposed_rate)) = (cover_letter, proposed_rate) else {
        return Err(AppError::validation(checks.into_errors()));
    };
    checks.finish_http(())?;

    let mut conn = state.db()?;
    let campaign = load_campaign(&mut conn, campaign_id)?;
    if campaign_status(&campaign)? != CampaignStatus::Open {
        return Err(AppError::conflict("campaign is not accepting proposals"));
    }

    let expert = load_contact(&mut conn, user.user_id)?;
    let owner = load_contact(&mut conn, campaign.organization_id)?;
    let review_path = format!("/campaigns/{}/proposals", campaign.id);

    let new_proposal = NewProposal {
        id: Uuid::new_v4(),
        campaign_id: campaign.id,
        expert_id: user.user_id,
        cover_letter,
        proposed_rate,
        estimated_days,
        status: ProposalStatus::Pending.as_str().to_string(),
    };

    let (proposal, notified) = conn
        .transaction::<_, AppError, _>(|conn| {
            let proposal: Proposal = diesel::insert_into(proposals::table)
                .values(&new_proposal)
                .get_result(conn)
                .map_err(|err| match err {
                    diesel::result::Error::DatabaseError(
                        DatabaseErrorKind::UniqueViolation,
                        _,
                    ) => AppError::conflict("you already submitted a proposal for this campaign"),
                    other => AppError::from(other),
                })?;

            let notified = insert_notifications(
                conn,
                &[new_notification(
                    owner.id,
                    NotificationKind::ProposalReceived,
                    "New proposal",
                    format!("{} applied to \"{}\".", expert.full_name, campaign.title),
                    Some(review_path.clone()),
                )],
            )?;

            let email = templates::new_proposal(
                &owner.full_name,
                &campaign.title,
                &expert.full_name,
                &state.config.app_link(&review_path),
            )
            .to(&owner.email);
            enqueue_email(conn, &email)?;

            Ok((proposal, notified))
        })?;

    publish_inserted(&state.realtime, notified);
    info!(proposal_id = %proposal.id, campaign_id = %campaign.id, "proposal submitted");

    Ok((
        StatusCode::CREATED,
        Json(ProposalResponse::new(
            proposal,
            Some(campaign.title),
            Some(expert.full_name),
        )),
    ))
}

pub async fn list_campaign_proposals(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(campaign_id): Path<Uuid>,
) -> AppResult<Json<Vec<ProposalResponse>>> {
    let mut conn = state.db()?;
    let campaign = load_campaign(&mut conn, campaign_id)?;
    require_owner(&campaign, user.user_id)?;

    let rows = campaign_proposals_with_experts(&mut conn, campaign.id)?;
    let items = rows
        .into_iter()
        .map(|(proposal, expert_name, _)| {
            ProposalResponse::new(proposal, Some(campaign.title.clone()), Some(expert_name))
        })
        .collect();
    Ok(Json(items))
}

pub async fn export_campaign_proposals(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(campaign_id): Path<Uuid>,
) -> AppResult<CsvDownload> {
    let mut conn = state.db()?;
    let campaign = load_campaign(&mut conn, campaign_id)?;
    require_owner(&campaign, user.user_id)?;

    let rows: Vec<ProposalCsvRow> = campaign_proposals_with_experts(&mut conn, campaign.id)?
        .into_iter()
        .map(|(proposal, expert_name, expert_email)| ProposalCsvRow {
            expert_name,
            expert_email,
            status: proposal.status,
            proposed_rate: proposal.proposed_rate,
            estimated_days: proposal.estimated_days,
            submitted_at: to_iso(proposal.created_at),
            cover_letter: proposal.cover_letter,
        })
        .collect();

    Ok(CsvDownload::new(
        format!("proposals-{}.csv", campaign.id),
        &rows,
    )?)
}

pub async fn list_my_proposals(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ProposalResponse>>> {
    user.require_role(UserRole::Expert)?;
    let mut conn = state.db()?;

    let rows: Vec<(Proposal, String)> = proposals::table
        .inner_join(campaigns::table)
        .filter(proposals::expert_id.eq(user.user_id))
        .order(proposals::created_at.desc())
        .select((proposals::all_columns, campaigns::title))
        .load(&mut conn)?;

    let items = rows
        .into_iter()
        .map(|(proposal, title)| ProposalResponse::new(proposal, Some(title), None))
        .collect();
    Ok(Json(items))
}

pub async fn get_proposal(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(proposal_id): Path<Uuid>,
) -> AppResult<Json<ProposalResponse>> {
    let mut conn = state.db()?;
    let proposal: Proposal = proposals::table.find(proposal_id).first(&mut conn)?;
    let campaign = load_campaign(&mut conn, proposal.campaign_id)?;
    if proposal.expert_id != user.user_id && campaign.organization_id != user.user_id {
        return Err(AppError::not_found());
    }
    let expert = load_contact(&mut conn, proposal.expert_id)?;
    Ok(Json(ProposalResponse::new(
        proposal,
        Some(campaign.title),
        Some(expert.full_name),
    )))
}

pub async fn withdraw_proposal(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(proposal_id): Path<Uuid>,
) -> AppResult<Json<ProposalResponse>> {
    let mut conn = state.db()?;
    let proposal: Proposal = proposals::table.find(proposal_id).first(&mut conn)?;
    if proposal.expert_id != user.user_id {
        return Err(AppError::forbidden("only the author may withdraw a proposal"));
    }
    let campaign = load_campaign(&mut conn, proposal.campaign_id)?;
    let expert = load_contact(&mut conn, user.user_id)?;

    let (withdrawn, notified) = conn.transaction::<_, AppError, _>(|conn| {
        let withdrawn = decide_pending(conn, proposal.id, ProposalStatus::Withdrawn)?
            .ok_or_else(|| AppError::conflict("only pending proposals can be withdrawn"))?;
        let notified = insert_notifications(
            conn,
            &[new_notification(
                campaign.organization_id,
                NotificationKind::ProposalWithdrawn,
                "Proposal withdrawn",
                format!(
                    "{} withdrew their proposal for \"{}\".",
                    expert.full_name, campaign.title
                ),
                Some(format!("/campaigns/{}/proposals", campaign.id)),
            )],
        )?;
        Ok((withdrawn, notified))
    })?;

    publish_inserted(&state.realtime, notified);
    info!(proposal_id = %proposal.id, "proposal withdrawn");
    Ok(Json(ProposalResponse::new(
        withdrawn,
        Some(campaign.title),
        Some(expert.full_name),
    )))
}

pub async fn reject_proposal(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(proposal_id): Path<Uuid>,
) -> AppResult<Json<ProposalResponse>> {
    let mut conn = state.db()?;
    let proposal: Proposal = proposals::table.find(proposal_id).first(&mut conn)?;
    let campaign = load_campaign(&mut conn, proposal.campaign_id)?;
    require_owner(&campaign, user.user_id)?;
    let expert = load_contact(&mut conn, proposal.expert_id)?;

    let (rejected, notified) = conn.transaction::<_, AppError, _>(|conn| {
        let rejected = decide_pending(conn, proposal.id, ProposalStatus::Rejected)?
            .ok_or_else(|| AppError::conflict("only pending proposals can be rejected"))?;
        let notified = insert_notifications(
            conn,
            &[rejection_notification(expert.id, &campaign)],
        )?;
        let email = templates::proposal_rejected(
            &expert.full_name,
            &campaign.title,
            &state.config.app_link("/campaigns"),
        )
        .to(&expert.email);
        enqueue_email(conn, &email)?;
        Ok((rejected, notified))
    })?;

    publish_inserted(&state.realtime, notified);
    info!(proposal_id = %proposal.id, "proposal rejected");
    Ok(Json(ProposalResponse::new(
        rejected,
        Some(campaign.title),
        Some(expert.full_name),
    )))
}

/// Accepts one proposal, rejects every other pending one and starts the
/// campaign, all in one transaction holding the campaign row lock.
pub async fn accept_proposal(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(proposal_id): Path<Uuid>,
) -> AppResult<Json<AcceptResponse>> {
    let mut conn = state.db()?;

    let (accepted, campaign, rejected_count, notified, expert_name) =
        conn.transaction::<_, AppError, _>(|conn| {
            let campaign_id: Uuid = proposals::table
                .find(proposal_id)
                .select(proposals::campaign_id)
                .first(conn)?;
            let campaign: Campaign = campaigns::table
                .find(campaign_id)
                .for_update()
                .first(conn)?;
            require_owner(&campaign, user.user_id)?;

            if campaign_status(&campaign)? != CampaignStatus::Open {
                return Err(AppError::conflict("campaign is no longer open"));
            }

            let accepted = decide_pending(conn, proposal_id, ProposalStatus::Accepted)?
                .ok_or_else(|| AppError::conflict("only pending proposals can be accepted"))?;

            let now = Utc::now().naive_utc();
            let rejected: Vec<Proposal> = diesel::update(
                proposals::table
                    .filter(proposals::campaign_id.eq(campaign.id))
                    .filter(proposals::status.eq(ProposalStatus::Pending.as_str()))
                    .filter(proposals::id.ne(accepted.id)),
            )
            .set((
                proposals::status.eq(ProposalStatus::Rejected.as_str()),
                proposals::decided_at.eq(now),
                proposals::updated_at.eq(now),
            ))
            .get_results(conn)?;

            let campaign: Campaign = diesel::update(campaigns::table.find(campaign.id))
                .set((
                    campaigns::status.eq(CampaignStatus::InProgress.as_str()),
                    campaigns::updated_at.eq(now),
                ))
                .get_result(conn)?;

            let mut recipients: Vec<Uuid> = rejected.iter().map(|p| p.expert_id).collect();
            recipients.push(accepted.expert_id);
            let contacts = load_contacts(conn, &recipients)?;

            let campaign_path = format!("/campaigns/{}", campaign.id);
            let mut drafts = vec![new_notification(
                accepted.expert_id,
                NotificationKind::ProposalAccepted,
                "Proposal accepted",
                format!("Your proposal for \"{}\" was accepted.", campaign.title),
                Some(campaign_path.clone()),
            )];
            drafts.extend(
                rejected
                    .iter()
                    .map(|proposal| rejection_notification(proposal.expert_id, &campaign)),
            );
            let notified = insert_notifications(conn, &drafts)?;

            if let Some(expert) = contacts.get(&accepted.expert_id) {
                let email = templates::proposal_accepted(
                    &expert.full_name,
                    &campaign.title,
                    &state.config.app_link(&campaign_path),
                )
                .to(&expert.email);
                enqueue_email(conn, &email)?;
            }
            let browse_link = state.config.app_link("/campaigns");
            for proposal in &rejected {
                if let Some(expert) = contacts.get(&proposal.expert_id) {
                    let email =
                        templates::proposal_rejected(&expert.full_name, &campaign.title, &browse_link)
                            .to(&expert.email);
                    enqueue_email(conn, &email)?;
                }
            }

            let expert_name = contacts
                .get(&accepted.expert_id)
                .map(|expert| expert.full_name.clone());
            Ok((accepted, campaign, rejected.len(), notified, expert_name))
        })?;

    publish_inserted(&state.realtime, notified);
    info!(
        proposal_id = %accepted.id,
        campaign_id = %campaign.id,
        rejected = rejected_count,
        "proposal accepted"
    );

    Ok(Json(AcceptResponse {
        proposal: ProposalResponse::new(accepted, Some(campaign.title), expert_name),
        rejected_count,
        campaign_status: CampaignStatus::InProgress,
    }))
}

/// Moves a proposal out of `pending`. `None` when it was already decided.
fn decide_pending(
    conn: &mut PgConnection,
    proposal_id: Uuid,
    next: ProposalStatus,
) -> QueryResult<Option<Proposal>> {
    let now = Utc::now().naive_utc();
    diesel::update(
        proposals::table
            .find(proposal_id)
            .filter(proposals::status.eq(ProposalStatus::Pending.as_str())),
    )
    .set((
        proposals::status.eq(next.as_str()),
        proposals::decided_at.eq(now),
        proposals::updated_at.eq(now),
    ))
    .get_result(conn)
    .optional()
}

fn rejection_notification(expert_id: Uuid, campaign: &Campaign) -> crate::models::NewNotification {
    new_notification(
        expert_id,
        NotificationKind::ProposalRejected,
        "Proposal not selected",
        format!("Your proposal for \"{}\" was not selected.", campaign.title),
        Some("/campaigns".to_string()),
    )
}

fn campaign_proposals_with_experts(
    conn: &mut PgConnection,
    campaign_id: Uuid,
) -> AppResult<Vec<(Proposal, String, String)>> {
    let rows: Vec<(Proposal, String, String)> = proposals::table
        .inner_join(users::table)
        .filter(proposals::campaign_id.eq(campaign_id))
        .order(proposals::created_at.asc())
        .select((proposals::all_columns, users::full_name, users::email))
        .load(conn)?;
    Ok(rows)
}

/// Proposal counts per status for one campaign.
pub(crate) fn status_counts(
    conn: &mut PgConnection,
    campaign_id: Uuid,
) -> QueryResult<HashMap<String, i64>> {
    let rows: Vec<(String, i64)> = proposals::table
        .filter(proposals::campaign_id.eq(campaign_id))
        .group_by(proposals::status)
        .select((proposals::status, diesel::dsl::count_star()))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

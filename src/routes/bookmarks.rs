use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::select;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Bookmark, NewBookmark},
    schema::{bookmarks, campaigns, expert_profiles},
    state::AppState,
    status::{BookmarkKind, CampaignStatus, UserRole},
    utils::time::to_iso,
};

#[derive(Debug, Deserialize)]
pub struct BookmarkListQuery {
    pub kind: Option<BookmarkKind>,
}

#[derive(Debug, Deserialize)]
pub struct BookmarkRequest {
    pub kind: BookmarkKind,
    pub target_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct BookmarkResponse {
    pub kind: String,
    pub target_id: Uuid,
    pub created_at: String,
}

impl From<Bookmark> for BookmarkResponse {
    fn from(bookmark: Bookmark) -> Self {
        Self {
            kind: bookmark.kind,
            target_id: bookmark.target_id,
            created_at: to_iso(bookmark.created_at),
        }
    }
}

pub async fn list_bookmarks(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<BookmarkListQuery>,
) -> AppResult<Json<Vec<BookmarkResponse>>> {
    let mut conn = state.db()?;
    let mut statement = bookmarks::table
        .filter(bookmarks::user_id.eq(user.user_id))
        .into_boxed();
    if let Some(kind) = query.kind {
        statement = statement.filter(bookmarks::kind.eq(kind.as_str()));
    }

    let rows: Vec<Bookmark> = statement
        .order(bookmarks::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(BookmarkResponse::from).collect()))
}

/// Saving the same bookmark twice is a no-op.
pub async fn add_bookmark(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<BookmarkRequest>,
) -> AppResult<(StatusCode, Json<BookmarkResponse>)> {
    match payload.kind {
        BookmarkKind::Campaign => user.require_role(UserRole::Expert)?,
        BookmarkKind::Expert => user.require_role(UserRole::Organization)?,
    }

    let mut conn = state.db()?;
    let target_exists: bool = match payload.kind {
        BookmarkKind::Campaign => select(exists(
            campaigns::table
                .filter(campaigns::id.eq(payload.target_id))
                .filter(campaigns::status.ne(CampaignStatus::Draft.as_str())),
        ))
        .get_result(&mut conn)?,
        BookmarkKind::Expert => select(exists(
            expert_profiles::table
                .filter(expert_profiles::user_id.eq(payload.target_id))
                .filter(expert_profiles::completed_at.is_not_null()),
        ))
        .get_result(&mut conn)?,
    };
    if !target_exists {
        return Err(AppError::not_found());
    }

    let inserted = diesel::insert_into(bookmarks::table)
        .values(&NewBookmark {
            user_id: user.user_id,
            kind: payload.kind.as_str().to_string(),
            target_id: payload.target_id,
        })
        .on_conflict_do_nothing()
        .execute(&mut conn)?;

    let bookmark: Bookmark = bookmarks::table
        .find((user.user_id, payload.kind.as_str(), payload.target_id))
        .first(&mut conn)?;
    let status = if inserted == 0 {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(bookmark.into())))
}

pub async fn remove_bookmark(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((kind, target_id)): Path<(BookmarkKind, Uuid)>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    diesel::delete(bookmarks::table.find((user.user_id, kind.as_str(), target_id)))
        .execute(&mut conn)?;
    Ok(StatusCode::NO_CONTENT)
}

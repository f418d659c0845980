pub mod jwt;
pub mod password;

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::User,
    schema::users,
    state::AppState,
    status::UserRole,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: UserRole,
}

impl AuthenticatedUser {
    pub fn require_role(&self, role: UserRole) -> AppResult<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "only {} accounts may do this",
                role.as_str()
            )))
        }
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_token =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .ok()
                .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string());

        // EventSource cannot send headers, so streams pass the token in the query.
        let token = match header_token {
            Some(token) => token,
            None => Query::<TokenQuery>::from_request_parts(parts, state)
                .await
                .ok()
                .and_then(|Query(query)| query.access_token)
                .ok_or_else(AppError::unauthorized)?,
        };

        let claims = state
            .jwt
            .verify_token(&token)
            .map_err(|_| AppError::unauthorized())?;

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
        })
    }
}

/// An authenticated user whose admin flag was re-checked against the database.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub user_id: Uuid,
    pub email: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        let mut conn = state.db()?;
        let record: Option<User> = users::table
            .find(user.user_id)
            .first(&mut conn)
            .optional()?;

        match record {
            Some(record) if record.is_admin && record.is_active => Ok(AdminUser {
                user_id: record.id,
                email: record.email,
            }),
            Some(_) => Err(AppError::forbidden("admin privileges required")),
            None => Err(AppError::unauthorized()),
        }
    }
}

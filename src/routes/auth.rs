use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{password, AuthenticatedUser},
    email::{enqueue_email, templates},
    error::{AppError, AppResult},
    models::{NewExpertProfile, NewOrganizationProfile, NewRefreshToken, NewUser, RefreshToken, User},
    schema::{expert_profiles, organization_profiles, refresh_tokens, users},
    state::AppState,
    status::UserRole,
    validation::Checks,
};

const REFRESH_COOKIE_NAME: &str = "refresh_token";

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub is_admin: bool,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, HeaderMap, Json<LoginResponse>)> {
    let mut checks = Checks::new();
    let email = checks.email("email", &payload.email);
    let full_name = checks.text("full_name", Some(&payload.full_name), 2, 120);
    let role = match payload.role.parse::<UserRole>() {
        Ok(role) => Some(role),
        Err(_) => {
            checks.fail("role", "must be expert or organization");
            None
        }
    };
    if let Err(message) = password::check_password_strength(&payload.password) {
        checks.fail("password", message);
    }
    let (Some(email), Some(full_name), Some(role)) = (email, full_name, role) else {
        return Err(AppError::validation(checks.into_errors()));
    };
    checks.finish_http(())?;

    let password_hash = password::hash_password(&payload.password)?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        email,
        password_hash,
        full_name,
        role: role.as_str().to_string(),
        is_admin: false,
    };
    let welcome = templates::welcome(
        &new_user.full_name,
        role.as_str(),
        &state.config.app_link("/dashboard"),
    )
    .to(&new_user.email);

    let mut conn = state.db()?;
    let user = conn
        .transaction::<User, diesel::result::Error, _>(|conn| {
            let user: User = diesel::insert_into(users::table)
                .values(&new_user)
                .get_result(conn)?;
            match role {
                UserRole::Expert => {
                    diesel::insert_into(expert_profiles::table)
                        .values(&NewExpertProfile { user_id: user.id })
                        .execute(conn)?;
                }
                UserRole::Organization => {
                    diesel::insert_into(organization_profiles::table)
                        .values(&NewOrganizationProfile { user_id: user.id })
                        .execute(conn)?;
                }
            }
            Ok(user)
        })
        .map_err(|err| match err {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                AppError::conflict("email is already registered")
            }
            other => AppError::from(other),
        })?;

    if let Err(err) = enqueue_email(&mut conn, &welcome) {
        tracing::warn!(user_id = %user.id, error = %err, "failed to queue welcome email");
    }

    info!(user_id = %user.id, role = %role, "user registered");
    let (headers, body) = issue_session(&state, &mut conn, &user, role)?;
    Ok((StatusCode::CREATED, headers, body))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let mut conn = state.db()?;
    let email = payload.email.trim().to_lowercase();

    let user: User = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        return Err(AppError::unauthorized());
    }
    if !user.is_active {
        return Err(AppError::forbidden("account is deactivated"));
    }

    let role = stored_role(&user)?;
    diesel::update(users::table.find(user.id))
        .set(users::last_login_at.eq(Utc::now().naive_utc()))
        .execute(&mut conn)?;

    issue_session(&state, &mut conn, &user, role)
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let cookies = jar.ok_or_else(AppError::unauthorized)?;
    let refresh_value = cookies
        .get(REFRESH_COOKIE_NAME)
        .ok_or_else(AppError::unauthorized)?;

    let hashed = hash_refresh_token(refresh_value);
    let mut conn = state.db()?;
    let now_naive = Utc::now().naive_utc();

    let token = match refresh_tokens::table
        .filter(refresh_tokens::token_hash.eq(&hashed))
        .filter(refresh_tokens::revoked_at.is_null())
        .filter(refresh_tokens::expires_at.gt(now_naive))
        .first::<RefreshToken>(&mut conn)
    {
        Ok(token) => token,
        Err(diesel::result::Error::NotFound) => return Err(AppError::unauthorized()),
        Err(err) => return Err(AppError::from(err)),
    };

    diesel::update(refresh_tokens::table.find(token.id))
        .set((
            refresh_tokens::revoked_at.eq(now_naive),
            refresh_tokens::updated_at.eq(now_naive),
        ))
        .execute(&mut conn)?;

    let user: User = users::table.find(token.user_id).first(&mut conn)?;
    if !user.is_active {
        return Err(AppError::forbidden("account is deactivated"));
    }
    let role = stored_role(&user)?;

    issue_session(&state, &mut conn, &user, role)
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, StatusCode)> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let mut rows_affected = 0;

    if let Some(cookies) = jar {
        if let Some(value) = cookies.get(REFRESH_COOKIE_NAME) {
            let hashed = hash_refresh_token(value);
            rows_affected = diesel::update(
                refresh_tokens::table
                    .filter(refresh_tokens::token_hash.eq(hashed))
                    .filter(refresh_tokens::user_id.eq(user.user_id))
                    .filter(refresh_tokens::revoked_at.is_null()),
            )
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
        }
    }

    if rows_affected == 0 {
        revoke_all_refresh_tokens(&mut conn, user.user_id)?;
    }

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_clear_refresh_cookie(&state)?);
    Ok((headers, StatusCode::NO_CONTENT))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<MeResponse>> {
    let mut conn = state.db()?;
    let record: User = users::table
        .find(user.user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    Ok(Json(MeResponse {
        user_id: record.id,
        email: record.email,
        full_name: record.full_name,
        role: record.role,
        is_admin: record.is_admin,
    }))
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let record: User = users::table.find(user.user_id).first(&mut conn)?;

    let valid = password::verify_password(&payload.current_password, &record.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        return Err(AppError::forbidden("current password is incorrect"));
    }

    let mut checks = Checks::new();
    if let Err(message) = password::check_password_strength(&payload.new_password) {
        checks.fail("new_password", message);
    }
    checks.finish_http(())?;

    let new_hash = password::hash_password(&payload.new_password)?;
    let now = Utc::now().naive_utc();
    diesel::update(users::table.find(record.id))
        .set((users::password_hash.eq(new_hash), users::updated_at.eq(now)))
        .execute(&mut conn)?;

    info!(user_id = %record.id, "password changed");
    Ok(StatusCode::NO_CONTENT)
}

fn stored_role(user: &User) -> AppResult<UserRole> {
    user.role
        .parse::<UserRole>()
        .map_err(|err| AppError::internal(format!("user {}: {err}", user.id)))
}

/// Mints an access token and a fresh refresh token for `user`.
fn issue_session(
    state: &AppState,
    conn: &mut PgConnection,
    user: &User,
    role: UserRole,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let access_token = state.jwt.generate_token(user.id, &user.email, role)?;

    let now = Utc::now();
    let refresh_value = generate_refresh_token();
    let refresh_expires_at = now + ChronoDuration::days(state.config.refresh_token_expiry_days);

    let new_refresh = NewRefreshToken {
        id: Uuid::new_v4(),
        user_id: user.id,
        token_hash: hash_refresh_token(&refresh_value),
        issued_at: now.naive_utc(),
        expires_at: refresh_expires_at.naive_utc(),
    };

    diesel::insert_into(refresh_tokens::table)
        .values(&new_refresh)
        .execute(conn)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        build_refresh_cookie(state, &refresh_value, refresh_expires_at)?,
    );

    Ok((
        headers,
        Json(LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.config.jwt_expiry_minutes * 60,
        }),
    ))
}

pub(crate) fn revoke_all_refresh_tokens(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> QueryResult<usize> {
    let now = Utc::now().naive_utc();
    diesel::update(
        refresh_tokens::table
            .filter(refresh_tokens::user_id.eq(user_id))
            .filter(refresh_tokens::revoked_at.is_null()),
    )
    .set((
        refresh_tokens::revoked_at.eq(now),
        refresh_tokens::updated_at.eq(now),
    ))
    .execute(conn)
}

fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn build_refresh_cookie(
    state: &AppState,
    token: &str,
    expires_at: DateTime<Utc>,
) -> AppResult<HeaderValue> {
    let max_age = ChronoDuration::days(state.config.refresh_token_expiry_days).num_seconds();

    let mut parts = vec![format!("{}={}", REFRESH_COOKIE_NAME, token)];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    parts.push(format!("Max-Age={}", max_age));
    parts.push(format!("Expires={}", expires_at.to_rfc2822()));
    cookie_value(state, parts)
}

fn build_clear_refresh_cookie(state: &AppState) -> AppResult<HeaderValue> {
    let mut parts = vec![format!("{}=", REFRESH_COOKIE_NAME)];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    parts.push("Max-Age=0".into());
    parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".into());
    cookie_value(state, parts)
}

fn cookie_value(state: &AppState, mut parts: Vec<String>) -> AppResult<HeaderValue> {
    if state.config.refresh_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.refresh_cookie_domain {
        parts.push(format!("Domain={}", domain));
    }
    HeaderValue::from_str(&parts.join("; "))
        .map_err(|err| AppError::internal(format!("invalid refresh cookie: {err}")))
}

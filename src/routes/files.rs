use std::time::Duration;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    Json,
};
use chrono::Utc;
use diesel::dsl::exists;
use diesel::{prelude::*, select};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    export::attachment_disposition,
    models::{NewUploadedFile, UploadedFile},
    schema::{refresh_tokens, uploaded_files},
    state::AppState,
    storage::upload_key,
    utils::time::to_iso,
};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const FILE_PURPOSES: &[&str] = &["cv", "logo", "portfolio", "other"];
const PRESIGNED_URL_EXPIRY_SECONDS: u64 = 300;

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub purpose: String,
    pub original_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: String,
    pub created_at: String,
}

impl From<UploadedFile> for FileResponse {
    fn from(file: UploadedFile) -> Self {
        Self {
            id: file.id,
            owner_id: file.owner_id,
            purpose: file.purpose,
            original_name: file.original_name,
            content_type: file.content_type,
            size_bytes: file.size_bytes,
            checksum: file.checksum,
            created_at: to_iso(file.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    pub url: String,
    pub expires_in: u64,
    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub download_path: String,
}

pub async fn upload_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<FileResponse>)> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut purpose: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                original_name = field.file_name().map(|name| name.to_string());
                content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                file_bytes = Some(data.to_vec());
            }
            Some("purpose") => {
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid purpose: {err}"))
                })?;
                purpose = Some(value.trim().to_lowercase());
            }
            _ => {}
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if file_bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }
    if file_bytes.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("files are limited to {} MiB", MAX_UPLOAD_BYTES / (1024 * 1024)),
        ));
    }
    let original_name = original_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::bad_request("filename is required"))?;
    let purpose = purpose.unwrap_or_else(|| "other".to_string());
    if !FILE_PURPOSES.contains(&purpose.as_str()) {
        return Err(AppError::bad_request(format!(
            "purpose must be one of: {}",
            FILE_PURPOSES.join(", ")
        )));
    }

    let content_type = content_type
        .filter(|value| value != "application/octet-stream")
        .or_else(|| {
            mime_guess::from_path(&original_name)
                .first()
                .map(|mime| mime.essence_str().to_string())
        });
    let checksum = hex::encode(Sha256::digest(&file_bytes));
    let file_id = Uuid::new_v4();
    let key = upload_key(user.user_id, file_id, &original_name);
    let size_bytes = file_bytes.len() as i64;

    state
        .storage
        .put_object(
            &key,
            file_bytes,
            content_type.clone(),
            Some(attachment_disposition(&original_name)),
        )
        .await
        .map_err(|err| AppError::internal(format!("failed to store upload: {err}")))?;

    let new_file = NewUploadedFile {
        id: file_id,
        owner_id: user.user_id,
        purpose,
        original_name,
        content_type,
        s3_key: key.clone(),
        size_bytes,
        checksum,
    };

    let mut conn = state.db()?;
    let inserted = diesel::insert_into(uploaded_files::table)
        .values(&new_file)
        .get_result::<UploadedFile>(&mut conn);
    let file = match inserted {
        Ok(file) => file,
        Err(err) => {
            drop(conn);
            if let Err(cleanup) = state.storage.delete_object(&key).await {
                warn!(error = %cleanup, key = %key, "failed to remove orphaned upload");
            }
            return Err(err.into());
        }
    };

    info!(
        file_id = %file.id,
        owner_id = %user.user_id,
        size_bytes = file.size_bytes,
        "file uploaded"
    );
    Ok((StatusCode::CREATED, Json(file.into())))
}

pub async fn list_files(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<FileResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<UploadedFile> = uploaded_files::table
        .filter(uploaded_files::owner_id.eq(user.user_id))
        .order(uploaded_files::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(FileResponse::from).collect()))
}

/// Profile documents are visible to every signed-in member.
pub async fn download_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(file_id): Path<Uuid>,
) -> AppResult<Json<DownloadResponse>> {
    let mut conn = state.db()?;
    let file: UploadedFile = uploaded_files::table.find(file_id).first(&mut conn)?;
    drop(conn);

    let url = state
        .storage
        .presign_get_object(
            &file.s3_key,
            Duration::from_secs(PRESIGNED_URL_EXPIRY_SECONDS),
        )
        .await
        .map_err(|err| AppError::internal(format!("failed to generate download URL: {err}")))?;
    let token = state
        .jwt
        .generate_download_token(file.id, user.user_id)
        .map_err(|err| AppError::internal(format!("failed to generate download token: {err}")))?;

    Ok(Json(DownloadResponse {
        url,
        expires_in: PRESIGNED_URL_EXPIRY_SECONDS,
        filename: file.original_name,
        content_type: file.content_type,
        size_bytes: file.size_bytes,
        download_path: format!("/api/downloads/{token}"),
    }))
}

pub async fn download_with_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<impl IntoResponse> {
    let claims = state
        .jwt
        .verify_download_token(&token)
        .map_err(|_| AppError::unauthorized())?;

    let mut conn = state.db()?;
    let file: UploadedFile = uploaded_files::table.find(claims.file_id).first(&mut conn)?;

    let now = Utc::now().naive_utc();
    let has_active_session: bool = select(exists(
        refresh_tokens::table
            .filter(refresh_tokens::user_id.eq(claims.user_id))
            .filter(refresh_tokens::revoked_at.is_null())
            .filter(refresh_tokens::expires_at.gt(now)),
    ))
    .get_result(&mut conn)?;
    if !has_active_session {
        return Err(AppError::unauthorized());
    }
    drop(conn);

    let url = state
        .storage
        .presign_get_object(
            &file.s3_key,
            Duration::from_secs(PRESIGNED_URL_EXPIRY_SECONDS),
        )
        .await
        .map_err(|err| AppError::internal(format!("failed to generate download URL: {err}")))?;

    Ok(Redirect::temporary(&url))
}

pub async fn delete_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(file_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let file: UploadedFile = uploaded_files::table.find(file_id).first(&mut conn)?;
    if file.owner_id != user.user_id {
        return Err(AppError::forbidden("only the owner may delete a file"));
    }

    diesel::delete(uploaded_files::table.find(file.id)).execute(&mut conn)?;
    drop(conn);

    if let Err(err) = state.storage.delete_object(&file.s3_key).await {
        warn!(error = %err, key = %file.s3_key, "failed to delete stored object");
    }
    info!(file_id = %file.id, "file deleted");
    Ok(StatusCode::NO_CONTENT)
}

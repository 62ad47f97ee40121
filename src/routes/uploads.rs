use std::time::Duration;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::{AuthenticatedUser, EmployerUser, JobSeekerUser},
    error::{AppError, AppResult},
    schema::users,
    state::AppState,
    storage::{inline_content_disposition, object_key, UploadKind},
};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub path: String,
    pub url: String,
    pub content_type: String,
    pub size: usize,
}

struct IncomingFile {
    bytes: Vec<u8>,
    filename: String,
    content_type: Option<String>,
}

pub async fn upload_resume(
    State(state): State<AppState>,
    JobSeekerUser(user): JobSeekerUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    store_upload(&state, user.user_id, UploadKind::Resume, multipart).await
}

pub async fn upload_logo(
    State(state): State<AppState>,
    EmployerUser(user): EmployerUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    store_upload(&state, user.user_id, UploadKind::Logo, multipart).await
}

pub async fn upload_avatar(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    store_upload(&state, user.user_id, UploadKind::Avatar, multipart).await
}

async fn store_upload(
    state: &AppState,
    user_id: Uuid,
    kind: UploadKind,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    let file = read_file_field(multipart, state.config.upload_max_bytes).await?;

    let content_type = kind
        .resolve_content_type(file.content_type.as_deref(), &file.filename)
        .ok_or_else(|| {
            AppError::bad_request(format!(
                "unsupported file type for {}; allowed: {}",
                kind.prefix(),
                kind.allowed_content_types().join(", ")
            ))
        })?;

    let key = object_key(kind, user_id, &file.filename);
    let size = file.bytes.len();
    state
        .storage
        .put_object(
            &key,
            file.bytes,
            Some(content_type.to_string()),
            inline_content_disposition(&file.filename),
        )
        .await?;

    let previous = {
        let mut conn = state.db()?;
        replace_user_file(&mut conn, user_id, kind, &key)?
    };

    if let Some(previous) = previous.filter(|old| old != &key) {
        if let Err(err) = state.storage.delete_object(&previous).await {
            warn!(%user_id, key = %previous, error = %err, "failed to delete replaced upload");
        }
    }

    let url = state
        .storage
        .presign_get_object(
            &key,
            Duration::from_secs(state.config.upload_url_expiry_seconds),
        )
        .await?;

    info!(%user_id, key = %key, content_type, size, "upload stored");
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            path: key,
            url,
            content_type: content_type.to_string(),
            size,
        }),
    ))
}

async fn read_file_field(mut multipart: Multipart, max_bytes: usize) -> AppResult<IncomingFile> {
    let mut file: Option<IncomingFile> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(|mime| mime.to_string());
        let data = field.bytes().await.map_err(|err| {
            error!(error = %err, "failed to read file bytes");
            AppError::bad_request(format!("failed to read file bytes: {err}"))
        })?;
        file = Some(IncomingFile {
            bytes: data.to_vec(),
            filename,
            content_type,
        });
    }

    let file = file.ok_or_else(|| AppError::bad_request("file field is required"))?;
    check_size(file.bytes.len(), max_bytes)?;
    Ok(file)
}

fn check_size(len: usize, max_bytes: usize) -> AppResult<()> {
    if len == 0 {
        return Err(AppError::bad_request("file field must not be empty"));
    }
    if len > max_bytes {
        return Err(AppError::bad_request(format!(
            "file exceeds the {max_bytes} byte limit"
        )));
    }
    Ok(())
}

/// Points the user's column for `kind` at `key` and returns the key it
/// replaced.
fn replace_user_file(
    conn: &mut PgConnection,
    user_id: Uuid,
    kind: UploadKind,
    key: &str,
) -> AppResult<Option<String>> {
    let now = Utc::now().naive_utc();
    conn.transaction::<Option<String>, AppError, _>(|conn| {
        let previous = match kind {
            UploadKind::Resume => {
                let previous: Option<String> = users::table
                    .find(user_id)
                    .select(users::resume_url)
                    .for_update()
                    .first(conn)?;
                diesel::update(users::table.find(user_id))
                    .set((users::resume_url.eq(key), users::updated_at.eq(now)))
                    .execute(conn)?;
                previous
            }
            UploadKind::Logo => {
                let previous: Option<String> = users::table
                    .find(user_id)
                    .select(users::company_logo_url)
                    .for_update()
                    .first(conn)?;
                diesel::update(users::table.find(user_id))
                    .set((users::company_logo_url.eq(key), users::updated_at.eq(now)))
                    .execute(conn)?;
                previous
            }
            UploadKind::Avatar => {
                let previous: Option<String> = users::table
                    .find(user_id)
                    .select(users::avatar_url)
                    .for_update()
                    .first(conn)?;
                diesel::update(users::table.find(user_id))
                    .set((users::avatar_url.eq(key), users::updated_at.eq(now)))
                    .execute(conn)?;
                previous
            }
        };
        Ok(previous)
    })
}

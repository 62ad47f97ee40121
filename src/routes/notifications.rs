use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::Notification,
    schema::notifications,
    state::AppState,
};

use super::to_iso;

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub kind: String,
    pub message: String,
    pub payload: Value,
    pub is_read: bool,
    pub read_at: Option<String>,
    pub created_at: String,
}

impl From<Notification> for NotificationResponse {
    fn from(notification: Notification) -> Self {
        Self {
            id: notification.id,
            kind: notification.kind,
            message: notification.message,
            payload: notification.payload,
            is_read: notification.is_read,
            read_at: notification.read_at.map(to_iso),
            created_at: to_iso(notification.created_at),
        }
    }
}

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<NotificationQuery>,
) -> AppResult<Json<Vec<NotificationResponse>>> {
    let mut conn = state.db()?;

    let mut query = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .into_boxed();
    if params.unread_only {
        query = query.filter(notifications::is_read.eq(false));
    }

    let rows: Vec<Notification> = query
        .order((notifications::created_at.desc(), notifications::id.desc()))
        .load(&mut conn)?;

    Ok(Json(rows.into_iter().map(NotificationResponse::from).collect()))
}

/// Marks one of the caller's notifications as read. Other users'
/// notifications are reported as missing.
pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(notification_id): Path<Uuid>,
) -> AppResult<Json<NotificationResponse>> {
    let mut conn = state.db()?;

    let existing: Notification = notifications::table
        .filter(notifications::id.eq(notification_id))
        .filter(notifications::user_id.eq(user.user_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if existing.is_read {
        return Ok(Json(NotificationResponse::from(existing)));
    }

    let updated: Notification = diesel::update(notifications::table.find(existing.id))
        .set((
            notifications::is_read.eq(true),
            notifications::read_at.eq(Some(Utc::now().naive_utc())),
        ))
        .get_result(&mut conn)?;

    Ok(Json(NotificationResponse::from(updated)))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;

    let updated = diesel::update(
        notifications::table
            .filter(notifications::user_id.eq(user.user_id))
            .filter(notifications::is_read.eq(false)),
    )
    .set((
        notifications::is_read.eq(true),
        notifications::read_at.eq(Some(Utc::now().naive_utc())),
    ))
    .execute(&mut conn)?;

    Ok(Json(json!({ "updated": updated })))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(notification_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;

    let deleted = diesel::delete(
        notifications::table
            .filter(notifications::id.eq(notification_id))
            .filter(notifications::user_id.eq(user.user_id)),
    )
    .execute(&mut conn)?;

    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

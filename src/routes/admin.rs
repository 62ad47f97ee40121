use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AdminUser,
    domain::Role,
    error::{AppError, AppResult},
    models::User,
    schema::users,
    state::AppState,
};

use super::profile::ProfileResponse;

#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    pub role: Option<String>,
}

pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(params): Query<UserListQuery>,
) -> AppResult<Json<Vec<ProfileResponse>>> {
    let mut conn = state.db()?;

    let mut query = users::table.into_boxed();
    if let Some(raw) = params.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        let role = raw.parse::<Role>()?;
        query = query.filter(users::role.eq(role.as_str()));
    }

    let rows: Vec<User> = query
        .order((users::created_at.desc(), users::id.desc()))
        .load(&mut conn)?;

    Ok(Json(rows.into_iter().map(ProfileResponse::from).collect()))
}

/// Removes an account together with everything it owns.
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if user_id == admin.user_id {
        return Err(AppError::bad_request("admins cannot delete their own account"));
    }

    let mut conn = state.db()?;
    let deleted = diesel::delete(users::table.find(user_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }

    info!(%user_id, admin_id = %admin.user_id, "user deleted by admin");
    Ok(StatusCode::NO_CONTENT)
}

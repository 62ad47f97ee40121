use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    domain::Role,
    error::{AppError, AppResult},
    models::User,
    schema::users,
    state::AppState,
    utils::json::{nullable_i32, nullable_string, required_string, string_list, Patch},
};

use super::{jobs::normalize_skills, to_iso};

const JOBSEEKER_FIELDS: &[&str] = &["headline", "skills", "experience_years"];
const EMPLOYER_FIELDS: &[&str] = &["company_name", "company_website", "company_description"];
const IMMUTABLE_FIELDS: &[&str] = &["id", "email", "role"];

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub headline: Option<String>,
    pub resume_url: Option<String>,
    pub skills: Vec<String>,
    pub experience_years: Option<i32>,
    pub company_name: Option<String>,
    pub company_website: Option<String>,
    pub company_description: Option<String>,
    pub company_logo_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for ProfileResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
            phone: user.phone,
            avatar_url: user.avatar_url,
            headline: user.headline,
            resume_url: user.resume_url,
            skills: user.skills,
            experience_years: user.experience_years,
            company_name: user.company_name,
            company_website: user.company_website,
            company_description: user.company_description,
            company_logo_url: user.company_logo_url,
            created_at: to_iso(user.created_at),
            updated_at: to_iso(user.updated_at),
        }
    }
}

/// What another user may see about an account.
#[derive(Debug, Serialize)]
pub struct PublicProfile {
    pub id: Uuid,
    pub name: String,
    pub role: String,
    pub avatar_url: Option<String>,
    pub headline: Option<String>,
    pub company_name: Option<String>,
    pub company_website: Option<String>,
    pub company_description: Option<String>,
    pub company_logo_url: Option<String>,
}

impl From<User> for PublicProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            role: user.role,
            avatar_url: user.avatar_url,
            headline: user.headline,
            company_name: user.company_name,
            company_website: user.company_website,
            company_description: user.company_description,
            company_logo_url: user.company_logo_url,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmployerSummary {
    pub id: Uuid,
    pub name: String,
    pub company_name: Option<String>,
}

impl From<&User> for EmployerSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            company_name: user.company_name.clone(),
        }
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct ProfileChangeset {
    name: Option<String>,
    phone: Option<Option<String>>,
    headline: Option<Option<String>>,
    skills: Option<Vec<String>>,
    experience_years: Option<Option<i32>>,
    company_name: Option<Option<String>>,
    company_website: Option<Option<String>>,
    company_description: Option<Option<String>>,
    updated_at: NaiveDateTime,
}

pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ProfileResponse>> {
    let mut conn = state.db()?;
    let record: User = users::table.find(user.user_id).first(&mut conn)?;
    Ok(Json(ProfileResponse::from(record)))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<Json<ProfileResponse>> {
    let changeset = build_changeset(&body, user.role)?;

    let mut conn = state.db()?;
    let updated: User = diesel::update(users::table.find(user.user_id))
        .set(&changeset)
        .get_result(&mut conn)?;

    info!(user_id = %user.user_id, "profile updated");
    Ok(Json(ProfileResponse::from(updated)))
}

pub async fn get_user(
    State(state): State<AppState>,
    _viewer: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<PublicProfile>> {
    let mut conn = state.db()?;
    let record: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(PublicProfile::from(record)))
}

fn build_changeset(body: &Value, role: Role) -> AppResult<ProfileChangeset> {
    let object = body
        .as_object()
        .ok_or_else(|| AppError::bad_request("expected a JSON object"))?;

    if let Some(field) = IMMUTABLE_FIELDS.iter().find(|f| object.contains_key(**f)) {
        return Err(AppError::bad_request(format!("{field} cannot be changed")));
    }
    let own_fields: &[&str] = match role {
        Role::Jobseeker => JOBSEEKER_FIELDS,
        Role::Employer => EMPLOYER_FIELDS,
        Role::Admin => &[],
    };
    for field in JOBSEEKER_FIELDS.iter().chain(EMPLOYER_FIELDS) {
        if object.contains_key(*field) && !own_fields.contains(field) {
            return Err(AppError::bad_request(format!(
                "{field} is not a {role} profile field"
            )));
        }
    }

    let experience_years = match nullable_i32(body, "experience_years")
        .map_err(AppError::bad_request)?
    {
        Patch::Value(years) if years < 0 => {
            return Err(AppError::bad_request("experience_years must not be negative"))
        }
        other => other.into_change(),
    };

    Ok(ProfileChangeset {
        name: required_string(body, "name").map_err(AppError::bad_request)?,
        phone: nullable_string(body, "phone")
            .map_err(AppError::bad_request)?
            .into_change(),
        headline: nullable_string(body, "headline")
            .map_err(AppError::bad_request)?
            .into_change(),
        skills: string_list(body, "skills")
            .map_err(AppError::bad_request)?
            .map(normalize_skills),
        experience_years,
        company_name: nullable_string(body, "company_name")
            .map_err(AppError::bad_request)?
            .into_change(),
        company_website: nullable_string(body, "company_website")
            .map_err(AppError::bad_request)?
            .into_change(),
        company_description: nullable_string(body, "company_description")
            .map_err(AppError::bad_request)?
            .into_change(),
        updated_at: Utc::now().naive_utc(),
    })
}

/// Loads the given users in one query, keyed by id.
pub(crate) fn load_users(
    conn: &mut PgConnection,
    ids: impl IntoIterator<Item = Uuid>,
) -> AppResult<HashMap<Uuid, User>> {
    let mut ids: Vec<Uuid> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<User> = users::table
        .filter(users::id.eq_any(&ids))
        .load(conn)?;
    Ok(rows.into_iter().map(|user| (user.id, user)).collect())
}

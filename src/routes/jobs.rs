use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::{dsl::count_star, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{AuthenticatedUser, EmployerUser},
    domain::{JobStatus, JobType},
    error::{AppError, AppResult},
    models::{Job, NewJob},
    schema::{applications, jobs},
    state::AppState,
    utils::json::{nullable_i32, nullable_string, required_string, string_list},
};

use super::{
    profile::{load_users, EmployerSummary},
    to_iso,
};

#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    pub search: Option<String>,
    pub location: Option<String>,
    pub job_type: Option<String>,
    pub skill: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub title: String,
    pub description: String,
    pub requirements: Option<String>,
    pub responsibilities: Option<String>,
    pub location: String,
    pub job_type: String,
    pub salary_min: Option<i32>,
    pub salary_max: Option<i32>,
    pub experience_min: Option<i32>,
    pub experience_max: Option<i32>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub status: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub company_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<EmployerSummary>,
    pub title: String,
    pub description: String,
    pub requirements: Option<String>,
    pub responsibilities: Option<String>,
    pub location: String,
    pub job_type: String,
    pub salary_min: Option<i32>,
    pub salary_max: Option<i32>,
    pub experience_min: Option<i32>,
    pub experience_max: Option<i32>,
    pub skills: Vec<String>,
    pub status: String,
    pub views: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_count: Option<i64>,
    pub expires_at: String,
    pub created_at: String,
    pub updated_at: String,
}

/// The slice of a job embedded in application responses.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub title: String,
    pub location: String,
    pub job_type: String,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            title: job.title.clone(),
            location: job.location.clone(),
            job_type: job.job_type.clone(),
        }
    }
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = jobs)]
struct JobChangeset {
    title: Option<String>,
    description: Option<String>,
    requirements: Option<Option<String>>,
    responsibilities: Option<Option<String>>,
    location: Option<String>,
    job_type: Option<String>,
    salary_min: Option<Option<i32>>,
    salary_max: Option<Option<i32>>,
    experience_min: Option<Option<i32>>,
    experience_max: Option<Option<i32>>,
    skills: Option<Vec<String>>,
    status: Option<String>,
    expires_at: Option<NaiveDateTime>,
    updated_at: NaiveDateTime,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<Json<Vec<JobResponse>>> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let mut query = jobs::table
        .filter(jobs::status.eq(JobStatus::Published.as_str()))
        .filter(jobs::expires_at.gt(now))
        .into_boxed();

    if let Some(search) = trimmed(params.search) {
        let pattern = like_pattern(&search);
        query = query.filter(
            jobs::title
                .ilike(pattern.clone())
                .or(jobs::description.ilike(pattern)),
        );
    }
    if let Some(location) = trimmed(params.location) {
        query = query.filter(jobs::location.ilike(like_pattern(&location)));
    }
    if let Some(job_type) = trimmed(params.job_type) {
        let job_type = job_type.parse::<JobType>()?;
        query = query.filter(jobs::job_type.eq(job_type.as_str()));
    }
    if let Some(skill) = trimmed(params.skill) {
        query = query.filter(jobs::skills.contains(vec![skill]));
    }

    let rows: Vec<Job> = query
        .order((jobs::created_at.desc(), jobs::id.desc()))
        .load(&mut conn)?;

    let employers = load_users(&mut conn, rows.iter().map(|job| job.company_id))?;
    let response = rows
        .into_iter()
        .map(|job| {
            let company = employers.get(&job.company_id).map(EmployerSummary::from);
            to_job_response(job, company, None)
        })
        .collect();

    Ok(Json(response))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<JobResponse>> {
    let mut conn = state.db()?;

    // Drafts are not public, so the filter doubles as the visibility check.
    let job: Job = diesel::update(
        jobs::table
            .filter(jobs::id.eq(job_id))
            .filter(jobs::status.ne(JobStatus::Draft.as_str())),
    )
    .set(jobs::views.eq(jobs::views + 1))
    .get_result::<Job>(&mut conn)
    .optional()?
    .ok_or_else(AppError::not_found)?;

    let employers = load_users(&mut conn, [job.company_id])?;
    let company = employers.get(&job.company_id).map(EmployerSummary::from);
    Ok(Json(to_job_response(job, company, None)))
}

pub async fn create_job(
    State(state): State<AppState>,
    EmployerUser(user): EmployerUser,
    Json(payload): Json<CreateJobRequest>,
) -> AppResult<(StatusCode, Json<JobResponse>)> {
    let now = Utc::now();
    let expires_at = match payload.expires_at {
        Some(at) if at <= now => {
            return Err(AppError::bad_request("expires_at must be in the future"))
        }
        Some(at) => at.naive_utc(),
        None => (now + ChronoDuration::days(state.config.job_default_expiry_days)).naive_utc(),
    };

    let status = match trimmed(payload.status) {
        Some(raw) => raw.parse::<JobStatus>()?,
        None => JobStatus::Published,
    };

    let new_job = NewJob {
        id: Uuid::new_v4(),
        company_id: user.user_id,
        title: require_text("title", &payload.title)?,
        description: require_text("description", &payload.description)?,
        requirements: trimmed(payload.requirements),
        responsibilities: trimmed(payload.responsibilities),
        location: require_text("location", &payload.location)?,
        job_type: payload.job_type.parse::<JobType>()?.as_str().to_string(),
        salary_min: payload.salary_min,
        salary_max: payload.salary_max,
        experience_min: payload.experience_min,
        experience_max: payload.experience_max,
        skills: normalize_skills(payload.skills),
        status: status.as_str().to_string(),
        expires_at,
    };
    validate_ranges(
        new_job.salary_min,
        new_job.salary_max,
        new_job.experience_min,
        new_job.experience_max,
    )?;

    let mut conn = state.db()?;
    let job: Job = diesel::insert_into(jobs::table)
        .values(&new_job)
        .get_result(&mut conn)?;

    info!(job_id = %job.id, company_id = %user.user_id, status = %job.status, "job created");
    Ok((StatusCode::CREATED, Json(to_job_response(job, None, Some(0)))))
}

pub async fn my_jobs(
    State(state): State<AppState>,
    EmployerUser(user): EmployerUser,
) -> AppResult<Json<Vec<JobResponse>>> {
    let mut conn = state.db()?;

    let rows: Vec<Job> = jobs::table
        .filter(jobs::company_id.eq(user.user_id))
        .order((jobs::created_at.desc(), jobs::id.desc()))
        .load(&mut conn)?;

    let counts = application_counts(&mut conn, rows.iter().map(|job| job.id).collect())?;
    let response = rows
        .into_iter()
        .map(|job| {
            let count = counts.get(&job.id).copied().unwrap_or(0);
            to_job_response(job, None, Some(count))
        })
        .collect();

    Ok(Json(response))
}

pub async fn update_job(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(job_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<JobResponse>> {
    let mut conn = state.db()?;
    let existing = load_managed_job(&mut conn, job_id, &user)?;

    let changeset = build_job_changeset(&body, &existing, Utc::now().naive_utc())?;
    let job: Job = diesel::update(jobs::table.find(job_id))
        .set(&changeset)
        .get_result(&mut conn)?;

    info!(job_id = %job.id, actor = %user.user_id, "job updated");
    Ok(Json(to_job_response(job, None, None)))
}

pub async fn delete_job(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(job_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    load_managed_job(&mut conn, job_id, &user)?;

    diesel::delete(jobs::table.find(job_id)).execute(&mut conn)?;
    info!(%job_id, actor = %user.user_id, "job deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Loads a job the caller may modify: its owner or any admin.
fn load_managed_job(
    conn: &mut PgConnection,
    job_id: Uuid,
    user: &AuthenticatedUser,
) -> AppResult<Job> {
    let job: Job = jobs::table.find(job_id).first(conn)?;
    if job.company_id != user.user_id && !user.is_admin() {
        return Err(AppError::forbidden());
    }
    Ok(job)
}

fn application_counts(conn: &mut PgConnection, job_ids: Vec<Uuid>) -> AppResult<HashMap<Uuid, i64>> {
    if job_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(Uuid, i64)> = applications::table
        .filter(applications::job_id.eq_any(&job_ids))
        .group_by(applications::job_id)
        .select((applications::job_id, count_star()))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

fn build_job_changeset(body: &Value, current: &Job, now: NaiveDateTime) -> AppResult<JobChangeset> {
    if !body.is_object() {
        return Err(AppError::bad_request("expected a JSON object"));
    }
    let bad = AppError::bad_request;

    let job_type = match required_string(body, "job_type").map_err(bad)? {
        Some(raw) => Some(raw.parse::<JobType>()?.as_str().to_string()),
        None => None,
    };
    let status = match required_string(body, "status").map_err(bad)? {
        Some(raw) => Some(raw.parse::<JobStatus>()?.as_str().to_string()),
        None => None,
    };
    let expires_at = match required_string(body, "expires_at").map_err(bad)? {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(&raw)
                .map_err(|_| AppError::bad_request("expires_at must be an RFC 3339 timestamp"))?
                .with_timezone(&Utc)
                .naive_utc(),
        ),
        None => None,
    };

    let salary_min = nullable_i32(body, "salary_min").map_err(bad)?;
    let salary_max = nullable_i32(body, "salary_max").map_err(bad)?;
    let experience_min = nullable_i32(body, "experience_min").map_err(bad)?;
    let experience_max = nullable_i32(body, "experience_max").map_err(bad)?;

    validate_ranges(
        salary_min.clone().apply(current.salary_min),
        salary_max.clone().apply(current.salary_max),
        experience_min.clone().apply(current.experience_min),
        experience_max.clone().apply(current.experience_max),
    )?;

    Ok(JobChangeset {
        title: required_string(body, "title").map_err(bad)?,
        description: required_string(body, "description").map_err(bad)?,
        requirements: nullable_string(body, "requirements").map_err(bad)?.into_change(),
        responsibilities: nullable_string(body, "responsibilities")
            .map_err(bad)?
            .into_change(),
        location: required_string(body, "location").map_err(bad)?,
        job_type,
        salary_min: salary_min.into_change(),
        salary_max: salary_max.into_change(),
        experience_min: experience_min.into_change(),
        experience_max: experience_max.into_change(),
        skills: string_list(body, "skills").map_err(bad)?.map(normalize_skills),
        status,
        expires_at,
        updated_at: now,
    })
}

fn validate_ranges(
    salary_min: Option<i32>,
    salary_max: Option<i32>,
    experience_min: Option<i32>,
    experience_max: Option<i32>,
) -> AppResult<()> {
    for (field, value) in [
        ("salary_min", salary_min),
        ("salary_max", salary_max),
        ("experience_min", experience_min),
        ("experience_max", experience_max),
    ] {
        if matches!(value, Some(v) if v < 0) {
            return Err(AppError::bad_request(format!("{field} must not be negative")));
        }
    }
    if let (Some(min), Some(max)) = (salary_min, salary_max) {
        if min > max {
            return Err(AppError::bad_request("salary_min must not exceed salary_max"));
        }
    }
    if let (Some(min), Some(max)) = (experience_min, experience_max) {
        if min > max {
            return Err(AppError::bad_request(
                "experience_min must not exceed experience_max",
            ));
        }
    }
    Ok(())
}

/// Trims skills, drops blanks and removes case-insensitive duplicates while
/// keeping the first spelling.
pub(crate) fn normalize_skills(skills: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    skills
        .into_iter()
        .map(|skill| skill.trim().to_string())
        .filter(|skill| !skill.is_empty() && seen.insert(skill.to_lowercase()))
        .collect()
}

fn require_text(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn to_job_response(
    job: Job,
    company: Option<EmployerSummary>,
    application_count: Option<i64>,
) -> JobResponse {
    JobResponse {
        id: job.id,
        company_id: job.company_id,
        company,
        title: job.title,
        description: job.description,
        requirements: job.requirements,
        responsibilities: job.responsibilities,
        location: job.location,
        job_type: job.job_type,
        salary_min: job.salary_min,
        salary_max: job.salary_max,
        experience_min: job.experience_min,
        experience_max: job.experience_max,
        skills: job.skills,
        status: job.status,
        views: job.views,
        application_count,
        expires_at: to_iso(job.expires_at),
        created_at: to_iso(job.created_at),
        updated_at: to_iso(job.updated_at),
    }
}

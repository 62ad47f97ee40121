use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{AuthenticatedUser, EmployerUser, JobSeekerUser},
    error::{AppError, AppResult},
    lifecycle::{self, ApplyInput, CreatedApplication, EmployerFilter, InterviewInput},
    models::{Application, Interview, Job, Note},
    notifier::{
        NotificationEvent, KIND_INTERVIEW_SCHEDULED, KIND_NEW_APPLICATION, KIND_STATUS_CHANGED,
    },
    schema::{application_notes, interviews, jobs},
    state::AppState,
};

use super::{
    jobs::JobSummary,
    profile::{load_users, EmployerSummary, UserSummary},
    to_iso,
};

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    pub job_id: Uuid,
    pub resume_path: Option<String>,
    pub cover_letter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReceivedQuery {
    pub job_id: Option<Uuid>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct InterviewRequest {
    #[serde(alias = "scheduled_date")]
    pub date: NaiveDate,
    #[serde(alias = "scheduled_time")]
    pub time: String,
    #[serde(alias = "type")]
    pub interview_type: String,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct InterviewResponse {
    pub id: Uuid,
    pub application_id: Uuid,
    pub date: NaiveDate,
    pub time: String,
    pub interview_type: String,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Interview> for InterviewResponse {
    fn from(interview: Interview) -> Self {
        Self {
            id: interview.id,
            application_id: interview.application_id,
            date: interview.scheduled_date,
            time: interview.scheduled_time,
            interview_type: interview.interview_type,
            location: interview.location,
            notes: interview.notes,
            status: interview.status,
            created_at: to_iso(interview.created_at),
            updated_at: to_iso(interview.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NoteResponse {
    pub id: Uuid,
    pub application_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: String,
}

impl From<Note> for NoteResponse {
    fn from(note: Note) -> Self {
        Self {
            id: note.id,
            application_id: note.application_id,
            author_id: note.author_id,
            content: note.content,
            created_at: to_iso(note.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApplicationResponse {
    pub id: Uuid,
    pub job_id: Uuid,
    pub applicant_id: Uuid,
    pub resume_path: String,
    pub cover_letter: Option<String>,
    pub status: String,
    pub applied_at: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employer: Option<EmployerSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applicant: Option<UserSummary>,
    pub interview: Option<InterviewResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<NoteResponse>>,
}

/// Which related records to embed in an application response.
#[derive(Debug, Clone, Copy)]
struct Embed {
    employer: bool,
    applicant: bool,
    notes: bool,
}

const APPLICANT_VIEW: Embed = Embed {
    employer: true,
    applicant: false,
    notes: false,
};

const EMPLOYER_VIEW: Embed = Embed {
    employer: false,
    applicant: true,
    notes: true,
};

pub async fn apply(
    State(state): State<AppState>,
    JobSeekerUser(user): JobSeekerUser,
    Json(payload): Json<ApplyRequest>,
) -> AppResult<(StatusCode, Json<ApplicationResponse>)> {
    let mut conn = state.db()?;

    let created = lifecycle::create_application(
        &mut conn,
        ApplyInput {
            job_id: payload.job_id,
            resume_path: payload.resume_path,
            cover_letter: payload.cover_letter,
        },
        user.actor(),
    )?;

    let CreatedApplication {
        application,
        job,
        applicant,
    } = created;

    info!(
        application_id = %application.id,
        job_id = %job.id,
        applicant_id = %user.user_id,
        "application submitted"
    );
    state.notifier.emit(NotificationEvent {
        recipient_id: job.company_id,
        kind: KIND_NEW_APPLICATION,
        message: format!("{} applied for {}", applicant.name, job.title),
        payload: json!({
            "application_id": application.id,
            "job_id": job.id,
            "applicant_id": applicant.id,
        }),
    });

    let mut response = to_application_response(application);
    response.job = Some(JobSummary::from(&job));
    response.applicant = Some(UserSummary::from(&applicant));
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn my_applications(
    State(state): State<AppState>,
    JobSeekerUser(user): JobSeekerUser,
) -> AppResult<Json<Vec<ApplicationResponse>>> {
    let mut conn = state.db()?;
    let rows = lifecycle::applications_for_applicant(&mut conn, user.user_id)?;
    Ok(Json(hydrate(&mut conn, rows, APPLICANT_VIEW)?))
}

pub async fn received_applications(
    State(state): State<AppState>,
    EmployerUser(user): EmployerUser,
    Query(params): Query<ReceivedQuery>,
) -> AppResult<Json<Vec<ApplicationResponse>>> {
    let mut conn = state.db()?;
    let rows = lifecycle::applications_for_employer(
        &mut conn,
        user.user_id,
        EmployerFilter {
            job_id: params.job_id,
            status: params.status,
        },
    )?;
    Ok(Json(hydrate(&mut conn, rows, EMPLOYER_VIEW)?))
}

pub async fn get_application(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(application_id): Path<Uuid>,
) -> AppResult<Json<ApplicationResponse>> {
    let mut conn = state.db()?;
    let application = lifecycle::visible_application(&mut conn, application_id, user.actor())?;

    let embed = if application.applicant_id == user.user_id {
        APPLICANT_VIEW
    } else {
        EMPLOYER_VIEW
    };
    single(&mut conn, application, embed).map(Json)
}

pub async fn update_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(application_id): Path<Uuid>,
    Json(payload): Json<StatusRequest>,
) -> AppResult<Json<ApplicationResponse>> {
    let mut conn = state.db()?;
    let change =
        lifecycle::update_status(&mut conn, application_id, &payload.status, user.actor())?;

    info!(
        %application_id,
        from = %change.previous,
        to = %change.application.status,
        actor = %user.user_id,
        "application status updated"
    );

    if change.changed() {
        let job: Job = jobs::table.find(change.application.job_id).first(&mut conn)?;
        state.notifier.emit(NotificationEvent {
            recipient_id: change.application.applicant_id,
            kind: KIND_STATUS_CHANGED,
            message: format!(
                "Your application for {} is now {}",
                job.title, change.application.status
            ),
            payload: json!({
                "application_id": application_id,
                "job_id": job.id,
                "previous_status": change.previous,
                "status": change.application.status,
            }),
        });
    }

    single(&mut conn, change.application, EMPLOYER_VIEW).map(Json)
}

pub async fn schedule_interview(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(application_id): Path<Uuid>,
    Json(payload): Json<InterviewRequest>,
) -> AppResult<Json<InterviewResponse>> {
    let mut conn = state.db()?;
    let scheduled = lifecycle::schedule_interview(
        &mut conn,
        application_id,
        InterviewInput {
            date: payload.date,
            time: payload.time,
            interview_type: payload.interview_type,
            location: payload.location,
            notes: payload.notes,
            status: payload.status,
        },
        user.actor(),
    )?;

    let interview = scheduled.interview;
    let application = scheduled.application;
    info!(
        %application_id,
        interview_id = %interview.id,
        application_status = %application.status,
        "interview scheduled"
    );

    let job: Job = jobs::table.find(application.job_id).first(&mut conn)?;
    state.notifier.emit(NotificationEvent {
        recipient_id: application.applicant_id,
        kind: KIND_INTERVIEW_SCHEDULED,
        message: format!(
            "Interview for {} scheduled on {} at {}",
            job.title, interview.scheduled_date, interview.scheduled_time
        ),
        payload: json!({
            "application_id": application_id,
            "interview_id": interview.id,
            "job_id": job.id,
            "date": interview.scheduled_date,
            "time": interview.scheduled_time,
            "interview_type": interview.interview_type,
        }),
    });

    Ok(Json(InterviewResponse::from(interview)))
}

pub async fn add_note(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(application_id): Path<Uuid>,
    Json(payload): Json<NoteRequest>,
) -> AppResult<(StatusCode, Json<NoteResponse>)> {
    let mut conn = state.db()?;
    let note = lifecycle::add_note(&mut conn, application_id, &payload.content, user.actor())?;
    info!(%application_id, note_id = %note.id, "note added");
    Ok((StatusCode::CREATED, Json(NoteResponse::from(note))))
}

pub async fn withdraw(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(application_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let mut conn = state.db()?;
    lifecycle::withdraw_application(&mut conn, application_id, user.actor())?;
    info!(%application_id, applicant_id = %user.user_id, "application withdrawn");
    Ok(Json(json!({ "id": application_id, "withdrawn": true })))
}

fn single(
    conn: &mut PgConnection,
    application: Application,
    embed: Embed,
) -> AppResult<ApplicationResponse> {
    hydrate(conn, vec![application], embed)?
        .into_iter()
        .next()
        .ok_or_else(AppError::not_found)
}

/// Attaches jobs, people, interviews and notes using one query per relation.
fn hydrate(
    conn: &mut PgConnection,
    applications: Vec<Application>,
    embed: Embed,
) -> AppResult<Vec<ApplicationResponse>> {
    if applications.is_empty() {
        return Ok(Vec::new());
    }

    let application_ids: Vec<Uuid> = applications.iter().map(|a| a.id).collect();
    let job_ids: Vec<Uuid> = applications.iter().map(|a| a.job_id).collect();

    let jobs_by_id: HashMap<Uuid, Job> = jobs::table
        .filter(jobs::id.eq_any(&job_ids))
        .load::<Job>(conn)?
        .into_iter()
        .map(|job| (job.id, job))
        .collect();

    let mut people = Vec::new();
    if embed.employer {
        people.extend(jobs_by_id.values().map(|job| job.company_id));
    }
    if embed.applicant {
        people.extend(applications.iter().map(|a| a.applicant_id));
    }
    let users_by_id = load_users(conn, people)?;

    let mut interviews_by_application: HashMap<Uuid, Interview> = interviews::table
        .filter(interviews::application_id.eq_any(&application_ids))
        .load::<Interview>(conn)?
        .into_iter()
        .map(|interview| (interview.application_id, interview))
        .collect();

    let mut notes_by_application: HashMap<Uuid, Vec<NoteResponse>> = HashMap::new();
    if embed.notes {
        let notes: Vec<Note> = application_notes::table
            .filter(application_notes::application_id.eq_any(&application_ids))
            .order((
                application_notes::created_at.desc(),
                application_notes::id.desc(),
            ))
            .load(conn)?;
        for note in notes {
            notes_by_application
                .entry(note.application_id)
                .or_default()
                .push(NoteResponse::from(note));
        }
    }

    Ok(applications
        .into_iter()
        .map(|application| {
            let job = jobs_by_id.get(&application.job_id);
            let employer = job
                .filter(|_| embed.employer)
                .and_then(|job| users_by_id.get(&job.company_id))
                .map(EmployerSummary::from);
            let applicant = users_by_id
                .get(&application.applicant_id)
                .filter(|_| embed.applicant)
                .map(UserSummary::from);
            let interview = interviews_by_application
                .remove(&application.id)
                .map(InterviewResponse::from);
            let notes = embed
                .notes
                .then(|| notes_by_application.remove(&application.id).unwrap_or_default());

            let mut response = to_application_response(application);
            response.job = job.map(JobSummary::from);
            response.employer = employer;
            response.applicant = applicant;
            response.interview = interview;
            response.notes = notes;
            response
        })
        .collect())
}

fn to_application_response(application: Application) -> ApplicationResponse {
    ApplicationResponse {
        id: application.id,
        job_id: application.job_id,
        applicant_id: application.applicant_id,
        resume_path: application.resume_path,
        cover_letter: application.cover_letter,
        status: application.status,
        applied_at: to_iso(application.applied_at),
        created_at: to_iso(application.created_at),
        updated_at: to_iso(application.updated_at),
        job: None,
        employer: None,
        applicant: None,
        interview: None,
        notes: None,
    }
}

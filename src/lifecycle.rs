//! Application lifecycle: applying, employer review, interviews, notes and
//! withdrawal.
//!
//! Every employer-side mutation re-resolves the owning employer through
//! `application -> job -> company_id` right before deciding. Nothing about
//! ownership is cached on applications, interviews or notes, so whoever owns
//! the job at the time of the call is the one allowed to act.
//!
//! The uniqueness rules live in the database: `(job_id, applicant_id)` is
//! unique on `applications` and `application_id` is unique on `interviews`.
//! Creation relies on those constraints instead of a prior existence read.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel::upsert::excluded;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ApplicationStatus, InterviewStatus, InterviewType, JobStatus, Role};
use crate::models::{
    Application, Interview, Job, NewApplication, NewInterview, NewNote, Note, User,
};
use crate::schema::{application_notes, applications, interviews, jobs, users};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("resource not found")]
    NotFound,
    #[error("not allowed to act on this resource")]
    Forbidden,
    #[error("an application for this job already exists")]
    Conflict,
    #[error("{0}")]
    BadRequest(String),
    #[error("database error: {0}")]
    Database(diesel::result::Error),
}

impl From<diesel::result::Error> for LifecycleError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => LifecycleError::NotFound,
            other => LifecycleError::Database(other),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// The user on whose behalf an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

/// Resolves which employer currently owns the job behind an application.
pub trait JobOwnershipResolver {
    fn owner_of(&mut self, application_id: Uuid) -> LifecycleResult<Uuid>;
}

impl JobOwnershipResolver for PgConnection {
    fn owner_of(&mut self, application_id: Uuid) -> LifecycleResult<Uuid> {
        applications::table
            .inner_join(jobs::table)
            .filter(applications::id.eq(application_id))
            .select(jobs::company_id)
            .first::<Uuid>(self)
            .optional()?
            .ok_or(LifecycleError::NotFound)
    }
}

/// Fails with `Forbidden` unless `actor` owns the job of `application_id`.
pub fn authorize_employer<R>(
    resolver: &mut R,
    application_id: Uuid,
    actor: Actor,
) -> LifecycleResult<()>
where
    R: JobOwnershipResolver + ?Sized,
{
    let owner = resolver.owner_of(application_id)?;
    ensure_owner(owner, actor)
}

fn ensure_owner(owner: Uuid, actor: Actor) -> LifecycleResult<()> {
    if owner == actor.user_id {
        Ok(())
    } else {
        Err(LifecycleError::Forbidden)
    }
}

fn ensure_role(actor: Actor, role: Role) -> LifecycleResult<()> {
    if actor.role == role {
        Ok(())
    } else {
        Err(LifecycleError::Forbidden)
    }
}

#[derive(Debug, Clone)]
pub struct ApplyInput {
    pub job_id: Uuid,
    pub resume_path: Option<String>,
    pub cover_letter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedApplication {
    pub application: Application,
    pub job: Job,
    pub applicant: User,
}

pub fn create_application(
    conn: &mut PgConnection,
    input: ApplyInput,
    actor: Actor,
) -> LifecycleResult<CreatedApplication> {
    ensure_role(actor, Role::Jobseeker)?;

    let job: Job = jobs::table
        .find(input.job_id)
        .first(conn)
        .optional()?
        .ok_or(LifecycleError::NotFound)?;
    let now = Utc::now().naive_utc();
    ensure_accepting_applications(&job, now)?;

    let applicant: User = users::table.find(actor.user_id).first(conn)?;
    let resume_path = non_blank(input.resume_path)
        .or_else(|| non_blank(applicant.resume_url.clone()))
        .ok_or_else(|| {
            LifecycleError::BadRequest(
                "resume_path is required when the profile has no resume".into(),
            )
        })?;

    let new_application = NewApplication {
        id: Uuid::new_v4(),
        job_id: job.id,
        applicant_id: actor.user_id,
        resume_path,
        cover_letter: non_blank(input.cover_letter),
        status: ApplicationStatus::Pending.as_str().to_string(),
        applied_at: now,
    };

    let application = match diesel::insert_into(applications::table)
        .values(&new_application)
        .get_result::<Application>(conn)
    {
        Ok(application) => application,
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(LifecycleError::Conflict)
        }
        Err(err) => return Err(LifecycleError::from(err)),
    };

    Ok(CreatedApplication {
        application,
        job,
        applicant,
    })
}

/// Drafts are invisible to applicants; closed or expired postings are visible
/// but refuse new applications.
pub fn ensure_accepting_applications(job: &Job, now: NaiveDateTime) -> LifecycleResult<()> {
    match job.status.parse::<JobStatus>() {
        Ok(JobStatus::Published) => {}
        Ok(JobStatus::Draft) => return Err(LifecycleError::NotFound),
        Ok(JobStatus::Closed) | Err(_) => {
            return Err(LifecycleError::BadRequest(
                "job is not accepting applications".into(),
            ))
        }
    }

    if job.expires_at <= now {
        return Err(LifecycleError::BadRequest("job posting has expired".into()));
    }

    Ok(())
}

pub fn applications_for_applicant(
    conn: &mut PgConnection,
    applicant_id: Uuid,
) -> LifecycleResult<Vec<Application>> {
    let rows = applications::table
        .filter(applications::applicant_id.eq(applicant_id))
        .order((applications::created_at.desc(), applications::id.desc()))
        .load(conn)?;
    Ok(rows)
}

#[derive(Debug, Clone, Default)]
pub struct EmployerFilter {
    pub job_id: Option<Uuid>,
    pub status: Option<String>,
}

pub fn applications_for_employer(
    conn: &mut PgConnection,
    employer_id: Uuid,
    filter: EmployerFilter,
) -> LifecycleResult<Vec<Application>> {
    let status = match non_blank(filter.status) {
        Some(raw) => Some(
            raw.parse::<ApplicationStatus>()
                .map_err(|err| LifecycleError::BadRequest(err.to_string()))?,
        ),
        None => None,
    };

    if let Some(job_id) = filter.job_id {
        let owner: Uuid = jobs::table
            .find(job_id)
            .select(jobs::company_id)
            .first(conn)
            .optional()?
            .ok_or(LifecycleError::NotFound)?;
        if owner != employer_id {
            return Err(LifecycleError::Forbidden);
        }
    }

    let owned_jobs = jobs::table
        .filter(jobs::company_id.eq(employer_id))
        .select(jobs::id);

    let mut query = applications::table
        .filter(applications::job_id.eq_any(owned_jobs))
        .into_boxed();

    if let Some(job_id) = filter.job_id {
        query = query.filter(applications::job_id.eq(job_id));
    }
    if let Some(status) = status {
        query = query.filter(applications::status.eq(status.as_str()));
    }

    let rows = query
        .order((applications::created_at.desc(), applications::id.desc()))
        .load(conn)?;
    Ok(rows)
}

/// Loads an application for its applicant or the employer owning its job.
/// Anyone else sees `NotFound`.
pub fn visible_application(
    conn: &mut PgConnection,
    application_id: Uuid,
    actor: Actor,
) -> LifecycleResult<Application> {
    let application: Application = applications::table
        .find(application_id)
        .first(conn)
        .optional()?
        .ok_or(LifecycleError::NotFound)?;

    if application.applicant_id == actor.user_id {
        return Ok(application);
    }

    match conn.owner_of(application_id) {
        Ok(owner) if owner == actor.user_id => Ok(application),
        Ok(_) | Err(LifecycleError::NotFound) => Err(LifecycleError::NotFound),
        Err(err) => Err(err),
    }
}

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub application: Application,
    pub previous: String,
}

impl StatusChange {
    pub fn changed(&self) -> bool {
        self.previous != self.application.status
    }
}

pub fn update_status(
    conn: &mut PgConnection,
    application_id: Uuid,
    target: &str,
    actor: Actor,
) -> LifecycleResult<StatusChange> {
    authorize_employer(conn, application_id, actor)?;

    let target = ApplicationStatus::parse_assignable(target)
        .map_err(|err| LifecycleError::BadRequest(err.to_string()))?;

    conn.transaction::<StatusChange, LifecycleError, _>(|conn| {
        let current: Application = applications::table
            .find(application_id)
            .for_update()
            .first(conn)?;

        let application = diesel::update(applications::table.find(application_id))
            .set((
                applications::status.eq(target.as_str()),
                applications::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result::<Application>(conn)?;

        Ok(StatusChange {
            application,
            previous: current.status,
        })
    })
}

#[derive(Debug, Clone)]
pub struct InterviewInput {
    pub date: NaiveDate,
    pub time: String,
    pub interview_type: String,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScheduledInterview {
    pub interview: Interview,
    pub application: Application,
}

pub fn schedule_interview(
    conn: &mut PgConnection,
    application_id: Uuid,
    input: InterviewInput,
    actor: Actor,
) -> LifecycleResult<ScheduledInterview> {
    authorize_employer(conn, application_id, actor)?;

    let interview_type = input
        .interview_type
        .parse::<InterviewType>()
        .map_err(|err| LifecycleError::BadRequest(err.to_string()))?;
    let status = match non_blank(input.status) {
        Some(raw) => raw
            .parse::<InterviewStatus>()
            .map_err(|err| LifecycleError::BadRequest(err.to_string()))?,
        None => InterviewStatus::Scheduled,
    };
    let time = normalize_time(&input.time)?;

    let new_interview = NewInterview {
        id: Uuid::new_v4(),
        application_id,
        scheduled_date: input.date,
        scheduled_time: time,
        interview_type: interview_type.as_str().to_string(),
        location: non_blank(input.location),
        notes: non_blank(input.notes),
        status: status.as_str().to_string(),
    };

    conn.transaction::<ScheduledInterview, LifecycleError, _>(|conn| {
        let current: Application = applications::table
            .find(application_id)
            .for_update()
            .first(conn)?;

        let now = Utc::now().naive_utc();
        let interview = diesel::insert_into(interviews::table)
            .values(&new_interview)
            .on_conflict(interviews::application_id)
            .do_update()
            .set((
                interviews::scheduled_date.eq(excluded(interviews::scheduled_date)),
                interviews::scheduled_time.eq(excluded(interviews::scheduled_time)),
                interviews::interview_type.eq(excluded(interviews::interview_type)),
                interviews::location.eq(excluded(interviews::location)),
                interviews::notes.eq(excluded(interviews::notes)),
                interviews::status.eq(excluded(interviews::status)),
                interviews::updated_at.eq(now),
            ))
            .get_result::<Interview>(conn)?;

        let current_status = current
            .status
            .parse::<ApplicationStatus>()
            .unwrap_or(ApplicationStatus::Pending);
        let next_status = current_status.after_interview_scheduled();

        let application = if next_status.as_str() != current.status {
            diesel::update(applications::table.find(application_id))
                .set((
                    applications::status.eq(next_status.as_str()),
                    applications::updated_at.eq(now),
                ))
                .get_result::<Application>(conn)?
        } else {
            current
        };

        Ok(ScheduledInterview {
            interview,
            application,
        })
    })
}

pub fn add_note(
    conn: &mut PgConnection,
    application_id: Uuid,
    content: &str,
    actor: Actor,
) -> LifecycleResult<Note> {
    authorize_employer(conn, application_id, actor)?;

    let content = content.trim();
    if content.is_empty() {
        return Err(LifecycleError::BadRequest(
            "note content must not be empty".into(),
        ));
    }

    let note = diesel::insert_into(application_notes::table)
        .values(&NewNote {
            id: Uuid::new_v4(),
            application_id,
            author_id: actor.user_id,
            content: content.to_string(),
        })
        .get_result::<Note>(conn)?;

    Ok(note)
}

/// Deletes the caller's application while it is still pending or under
/// review. Missing, foreign and too-advanced applications all read as
/// `NotFound`.
pub fn withdraw_application(
    conn: &mut PgConnection,
    application_id: Uuid,
    actor: Actor,
) -> LifecycleResult<()> {
    let withdrawable: Vec<&str> = ApplicationStatus::WITHDRAWABLE
        .iter()
        .map(|status| status.as_str())
        .collect();

    let deleted = diesel::delete(
        applications::table
            .filter(applications::id.eq(application_id))
            .filter(applications::applicant_id.eq(actor.user_id))
            .filter(applications::status.eq_any(withdrawable)),
    )
    .execute(conn)?;

    if deleted == 0 {
        return Err(LifecycleError::NotFound);
    }
    Ok(())
}

/// Accepts `H:MM` or `HH:MM` (optionally with seconds) and stores `HH:MM`.
pub fn normalize_time(raw: &str) -> LifecycleResult<String> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map(|time| time.format("%H:%M").to_string())
        .map_err(|_| LifecycleError::BadRequest(format!("invalid interview time '{raw}'")))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

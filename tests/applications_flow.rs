mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, uuid_field, TestApp};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

struct Hiring {
    app: TestApp,
    employer_id: Uuid,
    employer: String,
    seeker_id: Uuid,
    seeker: String,
    job_id: Uuid,
}

async fn hiring_setup() -> Result<Hiring> {
    let app = TestApp::new().await?;
    let (employer_id, employer) = app
        .user_with_token("e1@example.com", "Employer One", "employer")
        .await?;
    let (seeker_id, seeker) = app
        .user_with_token("u1@example.com", "Seeker One", "jobseeker")
        .await?;
    let job_id = app.insert_job(employer_id, "J1", "published", 30).await?;
    Ok(Hiring {
        app,
        employer_id,
        employer,
        seeker_id,
        seeker,
        job_id,
    })
}

async fn apply(h: &Hiring) -> Result<Uuid> {
    let response = h
        .app
        .post_json(
            "/api/applications",
            &json!({ "job_id": h.job_id, "resume_path": "r.pdf" }),
            Some(&h.seeker),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    uuid_field(&json_body(response).await?, "id")
}

fn interview_payload(date: &str, interview_type: &str) -> serde_json::Value {
    json!({ "date": date, "time": "10:00", "type": interview_type, "location": "HQ" })
}

#[tokio::test]
async fn applying_twice_conflicts() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let h = hiring_setup().await?;

    let first = h
        .app
        .post_json(
            "/api/applications",
            &json!({ "job_id": h.job_id, "resume_path": "r.pdf", "cover_letter": "Hi" }),
            Some(&h.seeker),
        )
        .await?;
    assert_eq!(first.status(), StatusCode::CREATED);
    let body = json_body(first).await?;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["job"]["title"], "J1");
    assert_eq!(body["applicant"]["email"], "u1@example.com");
    assert_eq!(body["applicant"]["id"], h.seeker_id.to_string());

    let second = h
        .app
        .post_json(
            "/api/applications",
            &json!({ "job_id": h.job_id, "resume_path": "other.pdf" }),
            Some(&h.seeker),
        )
        .await?;
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let mine = json_body(h.app.get("/api/applications/mine", Some(&h.seeker)).await?).await?;
    assert_eq!(mine.as_array().map(Vec::len), Some(1));
    assert_eq!(mine[0]["employer"]["id"], h.employer_id.to_string());

    h.app.cleanup().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_applies_and_schedules_leave_one_row() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let h = Arc::new(hiring_setup().await?);

    let mut applies = JoinSet::new();
    for n in 0..8 {
        let h = Arc::clone(&h);
        applies.spawn(async move {
            let response = h
                .app
                .post_json(
                    "/api/applications",
                    &json!({ "job_id": h.job_id, "resume_path": format!("r{n}.pdf") }),
                    Some(&h.seeker),
                )
                .await?;
            anyhow::Ok(response.status())
        });
    }
    let mut statuses = Vec::new();
    while let Some(joined) = applies.join_next().await {
        statuses.push(joined??);
    }
    let created = statuses
        .iter()
        .filter(|status| **status == StatusCode::CREATED)
        .count();
    let conflicts = statuses
        .iter()
        .filter(|status| **status == StatusCode::CONFLICT)
        .count();
    assert_eq!((created, conflicts), (1, 7));

    let mine = json_body(h.app.get("/api/applications/mine", Some(&h.seeker)).await?).await?;
    assert_eq!(mine.as_array().map(Vec::len), Some(1));
    let application_id = uuid_field(&mine[0], "id")?;

    let mut schedules = JoinSet::new();
    for day in 1..=8 {
        let h = Arc::clone(&h);
        schedules.spawn(async move {
            let response = h
                .app
                .put_json(
                    &format!("/api/applications/{application_id}/interview"),
                    &interview_payload(&format!("2025-01-{day:02}"), "video"),
                    Some(&h.employer),
                )
                .await?;
            anyhow::Ok(response.status())
        });
    }
    while let Some(joined) = schedules.join_next().await {
        assert_eq!(joined??, StatusCode::OK);
    }
    assert_eq!(h.app.interview_count(application_id).await?, 1);
    assert_eq!(
        h.app.application_status(application_id).await?.as_deref(),
        Some("shortlisted")
    );

    h.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn applying_checks_role_job_state_and_resume() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let h = hiring_setup().await?;

    let employer_apply = h
        .app
        .post_json(
            "/api/applications",
            &json!({ "job_id": h.job_id, "resume_path": "r.pdf" }),
            Some(&h.employer),
        )
        .await?;
    assert_eq!(employer_apply.status(), StatusCode::FORBIDDEN);

    let missing = h
        .app
        .post_json(
            "/api/applications",
            &json!({ "job_id": Uuid::new_v4(), "resume_path": "r.pdf" }),
            Some(&h.seeker),
        )
        .await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let draft = h.app.insert_job(h.employer_id, "Draft", "draft", 30).await?;
    let closed = h.app.insert_job(h.employer_id, "Closed", "closed", 30).await?;
    let expired = h.app.insert_job(h.employer_id, "Expired", "published", -1).await?;
    for (job_id, expected) in [
        (draft, StatusCode::NOT_FOUND),
        (closed, StatusCode::BAD_REQUEST),
        (expired, StatusCode::BAD_REQUEST),
    ] {
        let response = h
            .app
            .post_json(
                "/api/applications",
                &json!({ "job_id": job_id, "resume_path": "r.pdf" }),
                Some(&h.seeker),
            )
            .await?;
        assert_eq!(response.status(), expected);
    }

    let no_resume = h
        .app
        .post_json("/api/applications", &json!({ "job_id": h.job_id }), Some(&h.seeker))
        .await?;
    assert_eq!(no_resume.status(), StatusCode::BAD_REQUEST);

    h.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn only_the_job_owner_can_act_on_applications() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let h = hiring_setup().await?;
    let application_id = apply(&h).await?;
    let (rival_id, rival) = h
        .app
        .user_with_token("e2@example.com", "Employer Two", "employer")
        .await?;
    let (_, admin) = h
        .app
        .user_with_token("admin@example.com", "Admin", "admin")
        .await?;

    for token in [&rival, &h.seeker, &admin] {
        let status = h
            .app
            .patch_json(
                &format!("/api/applications/{application_id}/status"),
                &json!({ "status": "reviewing" }),
                Some(token),
            )
            .await?;
        assert_eq!(status.status(), StatusCode::FORBIDDEN);

        let interview = h
            .app
            .put_json(
                &format!("/api/applications/{application_id}/interview"),
                &interview_payload("2025-01-10", "video"),
                Some(token),
            )
            .await?;
        assert_eq!(interview.status(), StatusCode::FORBIDDEN);

        let note = h
            .app
            .post_json(
                &format!("/api/applications/{application_id}/notes"),
                &json!({ "content": "strong candidate" }),
                Some(token),
            )
            .await?;
        assert_eq!(note.status(), StatusCode::FORBIDDEN);
    }

    // Ownership follows the job, not whoever owned it when the application was made.
    h.app.transfer_job(h.job_id, rival_id).await?;
    let old_owner = h
        .app
        .patch_json(
            &format!("/api/applications/{application_id}/status"),
            &json!({ "status": "reviewing" }),
            Some(&h.employer),
        )
        .await?;
    assert_eq!(old_owner.status(), StatusCode::FORBIDDEN);
    let new_owner = h
        .app
        .patch_json(
            &format!("/api/applications/{application_id}/status"),
            &json!({ "status": "reviewing" }),
            Some(&rival),
        )
        .await?;
    assert_eq!(new_owner.status(), StatusCode::OK);

    let unknown = h
        .app
        .patch_json(
            &format!("/api/applications/{}/status", Uuid::new_v4()),
            &json!({ "status": "reviewing" }),
            Some(&rival),
        )
        .await?;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    h.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn status_targets_are_validated_after_ownership() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let h = hiring_setup().await?;
    let application_id = apply(&h).await?;
    let path = format!("/api/applications/{application_id}/status");

    for target in ["interview", "archived", "HIRED"] {
        let response = h
            .app
            .patch_json(&path, &json!({ "status": target }), Some(&h.employer))
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // Transitions are unrestricted, including going backwards.
    for target in ["hired", "pending", "rejected"] {
        let response = h
            .app
            .patch_json(&path, &json!({ "status": target }), Some(&h.employer))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await?["status"], target);
    }

    h.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn withdrawal_requires_ownership_and_early_status() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let h = hiring_setup().await?;
    let application_id = apply(&h).await?;
    let path = format!("/api/applications/{application_id}");

    let (_, other) = h
        .app
        .user_with_token("u2@example.com", "Seeker Two", "jobseeker")
        .await?;
    let foreign = h.app.delete(&path, Some(&other)).await?;
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);

    for status in ["shortlisted", "interview", "hired", "rejected"] {
        h.app.set_application_status(application_id, status).await?;
        let response = h.app.delete(&path, Some(&h.seeker)).await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "status {status}");
    }

    h.app.set_application_status(application_id, "reviewing").await?;
    let withdrawn = h.app.delete(&path, Some(&h.seeker)).await?;
    assert_eq!(withdrawn.status(), StatusCode::OK);
    let body = json_body(withdrawn).await?;
    assert_eq!(body["withdrawn"], true);
    assert_eq!(h.app.application_status(application_id).await?, None);

    // Withdrawing frees the slot for a fresh application.
    apply(&h).await?;

    h.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn scheduling_interviews_upserts_and_shortlists() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let h = hiring_setup().await?;
    let application_id = apply(&h).await?;
    let path = format!("/api/applications/{application_id}/interview");

    let first = h
        .app
        .put_json(&path, &interview_payload("2025-01-10", "video"), Some(&h.employer))
        .await?;
    assert_eq!(first.status(), StatusCode::OK);
    let first = json_body(first).await?;
    assert_eq!(first["status"], "scheduled");
    assert_eq!(
        h.app.application_status(application_id).await?.as_deref(),
        Some("shortlisted")
    );

    let second = h
        .app
        .put_json(
            &path,
            &json!({ "date": "2025-02-01", "time": "9:30", "type": "in-person", "status": "completed" }),
            Some(&h.employer),
        )
        .await?;
    assert_eq!(second.status(), StatusCode::OK);
    let second = json_body(second).await?;
    assert_eq!(second["id"], first["id"]);
    assert_eq!(second["date"], "2025-02-01");
    assert_eq!(second["time"], "09:30");
    assert_eq!(second["interview_type"], "in-person");
    assert!(second["location"].is_null());
    assert_eq!(h.app.interview_count(application_id).await?, 1);

    h.app.set_application_status(application_id, "hired").await?;
    h.app
        .put_json(&path, &interview_payload("2025-03-01", "phone"), Some(&h.employer))
        .await?;
    assert_eq!(
        h.app.application_status(application_id).await?.as_deref(),
        Some("hired")
    );

    for bad in [
        json!({ "date": "2025-03-01", "time": "25:00", "type": "phone" }),
        json!({ "date": "2025-03-01", "time": "10:00", "type": "carrier-pigeon" }),
        json!({ "date": "2025-03-01", "time": "10:00", "type": "phone", "status": "maybe" }),
    ] {
        let response = h.app.put_json(&path, &bad, Some(&h.employer)).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    h.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn notes_are_appended_and_listed_newest_first() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let h = hiring_setup().await?;
    let application_id = apply(&h).await?;
    let path = format!("/api/applications/{application_id}/notes");

    let empty = h
        .app
        .post_json(&path, &json!({ "content": "   " }), Some(&h.employer))
        .await?;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    for content in ["first impression", "second call"] {
        let response = h
            .app
            .post_json(&path, &json!({ "content": content }), Some(&h.employer))
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
        let note = json_body(response).await?;
        assert_eq!(note["author_id"], h.employer_id.to_string());
    }

    let received = json_body(
        h.app
            .get("/api/applications/received", Some(&h.employer))
            .await?,
    )
    .await?;
    assert_eq!(received[0]["status"], "pending");
    assert_eq!(received[0]["applicant"]["id"], h.seeker_id.to_string());
    assert_eq!(received[0]["notes"][0]["content"], "second call");
    assert_eq!(received[0]["notes"][1]["content"], "first impression");

    let seeker_view = json_body(
        h.app
            .get(&format!("/api/applications/{application_id}"), Some(&h.seeker))
            .await?,
    )
    .await?;
    assert!(seeker_view.get("notes").is_none());

    h.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn received_filters_are_checked() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let h = hiring_setup().await?;
    apply(&h).await?;
    let rival_id = h.app.insert_user("e2@example.com", "Rival", "employer").await?;
    let rival_job = h.app.insert_job(rival_id, "Theirs", "published", 30).await?;

    let filtered = json_body(
        h.app
            .get(
                &format!("/api/applications/received?job_id={}&status=pending", h.job_id),
                Some(&h.employer),
            )
            .await?,
    )
    .await?;
    assert_eq!(filtered.as_array().map(Vec::len), Some(1));

    let none = json_body(
        h.app
            .get("/api/applications/received?status=hired", Some(&h.employer))
            .await?,
    )
    .await?;
    assert_eq!(none.as_array().map(Vec::len), Some(0));

    let foreign = h
        .app
        .get(
            &format!("/api/applications/received?job_id={rival_job}"),
            Some(&h.employer),
        )
        .await?;
    assert_eq!(foreign.status(), StatusCode::FORBIDDEN);

    let missing = h
        .app
        .get(
            &format!("/api/applications/received?job_id={}", Uuid::new_v4()),
            Some(&h.employer),
        )
        .await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let bad_status = h
        .app
        .get("/api/applications/received?status=lost", Some(&h.employer))
        .await?;
    assert_eq!(bad_status.status(), StatusCode::BAD_REQUEST);

    h.app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn hire_after_interview_blocks_withdrawal() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let h = hiring_setup().await?;

    let application_id = apply(&h).await?;
    assert_eq!(
        h.app.application_status(application_id).await?.as_deref(),
        Some("pending")
    );

    let interview = h
        .app
        .put_json(
            &format!("/api/applications/{application_id}/interview"),
            &interview_payload("2025-01-10", "video"),
            Some(&h.employer),
        )
        .await?;
    assert_eq!(interview.status(), StatusCode::OK);
    assert_eq!(
        h.app.application_status(application_id).await?.as_deref(),
        Some("shortlisted")
    );
    assert_eq!(h.app.interview_count(application_id).await?, 1);

    let hired = h
        .app
        .patch_json(
            &format!("/api/applications/{application_id}/status"),
            &json!({ "status": "hired" }),
            Some(&h.employer),
        )
        .await?;
    assert_eq!(hired.status(), StatusCode::OK);
    assert_eq!(json_body(hired).await?["status"], "hired");

    let withdraw = h
        .app
        .delete(&format!("/api/applications/{application_id}"), Some(&h.seeker))
        .await?;
    assert_eq!(withdraw.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        h.app.application_status(application_id).await?.as_deref(),
        Some("hired")
    );

    h.app.cleanup().await?;
    Ok(())
}

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use http_body_util::BodyExt;
use jobportal::auth::jwt::JwtService;
use jobportal::auth::password::hash_password;
use jobportal::config::AppConfig;
use jobportal::db::{self, PgPool};
use jobportal::models::{NewJob, NewUser, Notification};
use jobportal::routes;
use jobportal::schema::{applications, interviews, jobs, notifications, users};
use jobportal::state::AppState;
use jobportal::storage::ObjectStorage;
use jobportal::{Notifier, PgNotificationSink};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const PASSWORD: &str = "correct-horse-battery";

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
            content_disposition,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            refresh_token_expiry_days: 30,
            refresh_cookie_secure: false,
            refresh_cookie_domain: None,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
            upload_max_bytes: 64 * 1024,
            upload_url_expiry_seconds: 300,
            job_default_expiry_days: 30,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let jwt = JwtService::from_config(&config)?;
        let (notifier, _dispatcher) =
            Notifier::spawn(Arc::new(PgNotificationSink::new(pool.clone())));
        let state = AppState::new(pool.clone(), config, storage_for_state, jwt, notifier);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(truncate_all).await
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub async fn insert_user(&self, email: &str, name: &str, role: &str) -> Result<Uuid> {
        let email = email.to_string();
        let name = name.to_string();
        let role = role.to_string();
        self.with_conn(move |conn| {
            let company_name = (role == "employer").then(|| format!("{name} Inc"));
            let user = NewUser {
                id: Uuid::new_v4(),
                email,
                password_hash: hash_password(PASSWORD)?,
                name,
                role,
                company_name,
            };
            diesel::insert_into(users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json("/api/auth/login", &LoginPayload { email, password }, None)
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = json_body(response).await?;
        body["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("login response has no access_token"))
    }

    /// Inserts an account and logs it in.
    pub async fn user_with_token(
        &self,
        email: &str,
        name: &str,
        role: &str,
    ) -> Result<(Uuid, String)> {
        let id = self.insert_user(email, name, role).await?;
        let token = self.login_token(email, PASSWORD).await?;
        Ok((id, token))
    }

    /// Inserts a job directly, bypassing API validation.
    #[allow(dead_code)]
    pub async fn insert_job(
        &self,
        company_id: Uuid,
        title: &str,
        status: &str,
        expires_in_days: i64,
    ) -> Result<Uuid> {
        let title = title.to_string();
        let status = status.to_string();
        self.with_conn(move |conn| {
            let job = NewJob {
                id: Uuid::new_v4(),
                company_id,
                title,
                description: "Ship and operate backend services".to_string(),
                requirements: None,
                responsibilities: None,
                location: "Remote".to_string(),
                job_type: "full-time".to_string(),
                salary_min: None,
                salary_max: None,
                experience_min: None,
                experience_max: None,
                skills: vec!["rust".to_string()],
                status,
                expires_at: (Utc::now() + ChronoDuration::days(expires_in_days)).naive_utc(),
            };
            diesel::insert_into(jobs::table)
                .values(&job)
                .execute(conn)
                .context("failed to insert job")?;
            Ok(job.id)
        })
        .await
    }

    /// Hands a job to another employer.
    #[allow(dead_code)]
    pub async fn transfer_job(&self, job_id: Uuid, new_owner: Uuid) -> Result<()> {
        self.with_conn(move |conn| {
            diesel::update(jobs::table.find(job_id))
                .set(jobs::company_id.eq(new_owner))
                .execute(conn)
                .context("failed to transfer job")?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn set_application_status(&self, application_id: Uuid, status: &str) -> Result<()> {
        let status = status.to_string();
        self.with_conn(move |conn| {
            diesel::update(applications::table.find(application_id))
                .set(applications::status.eq(status))
                .execute(conn)
                .context("failed to set application status")?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn application_status(&self, application_id: Uuid) -> Result<Option<String>> {
        self.with_conn(move |conn| {
            applications::table
                .find(application_id)
                .select(applications::status)
                .first::<String>(conn)
                .optional()
                .context("failed to load application status")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn interview_count(&self, application_id: Uuid) -> Result<i64> {
        self.with_conn(move |conn| {
            interviews::table
                .filter(interviews::application_id.eq(application_id))
                .count()
                .get_result::<i64>(conn)
                .context("failed to count interviews")
        })
        .await
    }

    /// Polls until `user_id` has at least `expected` notifications of `kind`.
    /// Delivery runs on a background task, so it lags the response.
    #[allow(dead_code)]
    pub async fn wait_for_notifications(
        &self,
        user_id: Uuid,
        kind: &str,
        expected: usize,
    ) -> Result<Vec<Notification>> {
        for _ in 0..50 {
            let kind_owned = kind.to_string();
            let rows = self
                .with_conn(move |conn| {
                    notifications::table
                        .filter(notifications::user_id.eq(user_id))
                        .filter(notifications::kind.eq(kind_owned))
                        .load::<Notification>(conn)
                        .context("failed to load notifications")
                })
                .await?;
            if rows.len() >= expected {
                return Ok(rows);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Err(anyhow!(
            "expected {expected} {kind} notification(s) for {user_id}"
        ))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::GET, path, Body::empty(), None, token).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::DELETE, path, Body::empty(), None, token).await
    }

    #[allow(dead_code)]
    pub async fn upload_file(
        &self,
        path: &str,
        filename: &str,
        content_type: &str,
        data: &[u8],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        self.send(
            Method::POST,
            path,
            Body::from(body),
            Some(format!("multipart/form-data; boundary={boundary}")),
            Some(token),
        )
        .await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.send(
            method,
            path,
            Body::from(body),
            Some("application/json".to_string()),
            token,
        )
        .await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Body,
        content_type: Option<String>,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(body)?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn json_body(response: hyper::Response<Body>) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

/// Reads a UUID field out of a JSON response.
#[allow(dead_code)]
pub fn uuid_field(value: &Value, field: &str) -> Result<Uuid> {
    value[field]
        .as_str()
        .ok_or_else(|| anyhow!("missing {field} in {value}"))?
        .parse()
        .context("field is not a UUID")
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        db::run_migrations(&mut conn)?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE application_notes, interviews, applications, jobs, notifications, refresh_tokens, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use startupmatch::auth::jwt::JwtService;
use startupmatch::config::AppConfig;
use startupmatch::db::{self, PgPool};
use startupmatch::models::{Job, NewExpertProfile, NewOrganizationProfile, NewUser};
use startupmatch::routes;
use startupmatch::schema::{expert_profiles, jobs, organization_profiles, users};
use startupmatch::state::AppState;
use startupmatch::storage::ObjectStorage;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub const CRON_SECRET: &str = "test-cron-secret";

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

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

pub fn test_config(database_url: String) -> AppConfig {
    AppConfig {
        database_url,
        database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        jwt_expiry_minutes: 60,
        download_token_audience: "test-download".to_string(),
        download_token_expiry_minutes: 60,
        refresh_token_expiry_days: 30,
        refresh_cookie_secure: false,
        refresh_cookie_domain: None,
        cors_allowed_origin: None,
        aws_endpoint_url: None,
        aws_access_key_id: None,
        aws_secret_access_key: None,
        aws_region: "us-east-1".to_string(),
        s3_bucket: "test-bucket".to_string(),
        email_api_url: "http://localhost:0/emails".to_string(),
        email_api_key: None,
        email_from: "StartupMatch <noreply@example.test>".to_string(),
        app_base_url: "https://app.example.test".to_string(),
        cron_secret: Some(CRON_SECRET.to_string()),
        reminder_lead_days: 3,
        realtime_channel_capacity: 64,
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
        Self::with_config(test_config(database_url)).await
    }

    pub async fn with_config(config: AppConfig) -> Result<Self> {
        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool.clone(), config, storage_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    /// Inserts an active account with an empty profile row for its role.
    pub async fn insert_user(
        &self,
        email: &str,
        password: &str,
        role: &str,
        is_admin: bool,
    ) -> Result<Uuid> {
        let email = email.to_string();
        let password = password.to_string();
        let role = role.to_string();
        self.with_conn(move |conn| {
            let password_hash = hash_password(&password)?;
            let user = NewUser {
                id: Uuid::new_v4(),
                full_name: format!("{} Tester", email.split('@').next().unwrap_or("user")),
                email,
                password_hash,
                role: role.clone(),
                is_admin,
            };
            diesel::insert_into(users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            match role.as_str() {
                "expert" => diesel::insert_into(expert_profiles::table)
                    .values(&NewExpertProfile { user_id: user.id })
                    .execute(conn),
                _ => diesel::insert_into(organization_profiles::table)
                    .values(&NewOrganizationProfile { user_id: user.id })
                    .execute(conn),
            }
            .context("failed to insert profile")?;
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

        #[derive(serde::Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = read_json(response).await?;
        Ok(parsed.access_token)
    }

    /// Creates a user and returns `(id, access token)`.
    #[allow(dead_code)]
    pub async fn signed_in(&self, email: &str, role: &str) -> Result<(Uuid, String)> {
        let password = "correct-horse-battery";
        let id = self.insert_user(email, password, role, false).await?;
        let token = self.login_token(email, password).await?;
        Ok((id, token))
    }

    #[allow(dead_code)]
    pub async fn signed_in_admin(&self, email: &str) -> Result<(Uuid, String)> {
        let password = "correct-horse-battery";
        let id = self
            .insert_user(email, password, "organization", true)
            .await?;
        let token = self.login_token(email, password).await?;
        Ok((id, token))
    }

    /// Creates a campaign as `token`'s organization and publishes it.
    #[allow(dead_code)]
    pub async fn open_campaign(&self, token: &str, title: &str) -> Result<Uuid> {
        let response = self
            .post_json(
                "/api/campaigns",
                &serde_json::json!({
                    "title": title,
                    "description": "We need hands-on help shaping our go-to-market for the pilot cohort.",
                    "required_skills": ["Growth Marketing", "Fundraising"],
                    "budget_min": 2000,
                    "budget_max": 5000,
                }),
                Some(token),
            )
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "campaign creation failed with status {}",
            response.status()
        );
        let created: serde_json::Value = read_json(response).await?;
        let id: Uuid = serde_json::from_value(created["id"].clone())?;

        let response = self
            .post_json(
                &format!("/api/campaigns/{id}/status"),
                &serde_json::json!({ "status": "open" }),
                Some(token),
            )
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "publishing failed with status {}",
            response.status()
        );
        Ok(id)
    }

    #[allow(dead_code)]
    pub async fn submit_proposal(&self, token: &str, campaign_id: Uuid) -> Result<Uuid> {
        let response = self
            .post_json(
                &format!("/api/campaigns/{campaign_id}/proposals"),
                &serde_json::json!({
                    "cover_letter": "I have run this exact playbook for three accelerator cohorts and can start next week.",
                    "proposed_rate": 120,
                    "estimated_days": 20,
                }),
                Some(token),
            )
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "proposal failed with status {}",
            response.status()
        );
        let created: serde_json::Value = read_json(response).await?;
        Ok(serde_json::from_value(created["id"].clone())?)
    }

    #[allow(dead_code)]
    pub async fn clear_jobs(&self) -> Result<()> {
        self.with_conn(|conn| {
            diesel::delete(jobs::table)
                .execute(conn)
                .context("failed to clear jobs")?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn jobs_by_type(&self, ty: &str) -> Result<Vec<Job>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            let rows = jobs::table
                .filter(jobs::job_type.eq(&ty))
                .order(jobs::created_at.asc())
                .load::<Job>(conn)
                .context("failed to load jobs")?;
            Ok(rows)
        })
        .await
    }

    /// Recipients of every queued email, in queue order.
    #[allow(dead_code)]
    pub async fn queued_email_recipients(&self) -> Result<Vec<String>> {
        let jobs = self.jobs_by_type("send-email").await?;
        Ok(jobs
            .into_iter()
            .filter_map(|job| job.payload["to"].as_str().map(str::to_string))
            .collect())
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

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn post_empty(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::POST, path, token).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::GET, path, token).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::DELETE, path, token).await
    }

    async fn send_empty(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn upload_file(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
        purpose: Option<&str>,
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

        if let Some(purpose) = purpose {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(b"Content-Disposition: form-data; name=\"purpose\"\r\n\r\n");
            body.extend(purpose.as_bytes());
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/files")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
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

pub async fn read_json<T: DeserializeOwned>(response: hyper::Response<Body>) -> Result<T> {
    let body = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&body).with_context(|| {
        format!(
            "unexpected response body: {}",
            String::from_utf8_lossy(&body)
        )
    })
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE jobs, admin_logs, bookmarks, tasks, messages, notifications, proposals, \
         campaigns, uploaded_files, refresh_tokens, expert_profiles, organization_profiles, users \
         RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}

fn hash_password(password: &str) -> Result<String> {
    use argon2::password_hash::{PasswordHasher, SaltString};
    use argon2::Argon2;

    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?
        .to_string())
}

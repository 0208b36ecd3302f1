use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{Timelike, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use guestlist::auth::jwt::JwtService;
use guestlist::auth::password::hash_password;
use guestlist::clock::{Clock, ManualClock};
use guestlist::config::AppConfig;
use guestlist::crypto::{normalize_email, BlindIndexer};
use guestlist::db::{self, PgPool, MIGRATIONS};
use guestlist::models::{
    Contact, GuestList, GuestListItem, Job, NewContact, NewGuestList, NewGuestListItem, NewUser,
    Share,
};
use guestlist::notifier::{
    Notification, Notifier, PlusOneNotification, RsvpConfirmation, RsvpForward, RsvpInvite,
    ShareNotification,
};
use guestlist::routes;
use guestlist::schema::{contacts, guest_list_items, guest_list_shares, guest_lists, jobs, users};
use guestlist::state::AppState;
use guestlist::tokens::generate_token;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const BLIND_INDEX_KEY: &str = "test-blind-index-key";

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Captures outbound messages instead of sending them.
#[derive(Default)]
pub struct FakeNotifier {
    otps: Mutex<Vec<(String, String)>>,
    delivered: Mutex<Vec<Notification>>,
    fail_deliveries: Mutex<bool>,
}

impl FakeNotifier {
    async fn record(&self, notification: Notification) -> Result<()> {
        if *self.fail_deliveries.lock().await {
            bail!("relay unavailable");
        }
        self.delivered.lock().await.push(notification);
        Ok(())
    }

    #[allow(dead_code)]
    pub async fn fail_deliveries(&self, fail: bool) {
        *self.fail_deliveries.lock().await = fail;
    }

    #[allow(dead_code)]
    pub async fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().await.clone()
    }

    #[allow(dead_code)]
    pub async fn otp_count(&self) -> usize {
        self.otps.lock().await.len()
    }

    /// Waits for the spawned delivery task and returns the newest code sent to `email`.
    #[allow(dead_code)]
    pub async fn wait_for_otp(&self, email: &str, expected_count: usize) -> Result<String> {
        for _ in 0..200 {
            {
                let otps = self.otps.lock().await;
                let sent: Vec<&(String, String)> =
                    otps.iter().filter(|(to, _)| to == email).collect();
                if sent.len() >= expected_count {
                    if let Some((_, code)) = sent.last() {
                        return Ok(code.clone());
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Err(anyhow!("no verification code delivered to {email}"))
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send_otp(&self, email: &str, _name: &str, code: &str) -> Result<()> {
        self.otps
            .lock()
            .await
            .push((email.to_string(), code.to_string()));
        Ok(())
    }

    async fn send_share_notification(&self, message: &ShareNotification) -> Result<()> {
        self.record(Notification::ShareNotification(message.clone()))
            .await
    }

    async fn send_rsvp_invite(&self, message: &RsvpInvite) -> Result<()> {
        self.record(Notification::RsvpInvite(message.clone())).await
    }

    async fn send_rsvp_confirmation(&self, message: &RsvpConfirmation) -> Result<()> {
        self.record(Notification::RsvpConfirmation(message.clone()))
            .await
    }

    async fn send_rsvp_forward(&self, message: &RsvpForward) -> Result<()> {
        self.record(Notification::RsvpForward(message.clone())).await
    }

    async fn send_plus_one_notification(&self, message: &PlusOneNotification) -> Result<()> {
        self.record(Notification::PlusOne(message.clone())).await
    }
}

pub struct TestApp {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<FakeNotifier>,
    pub indexer: BlindIndexer,
    router: Router,
}

/// Returns `Ok(None)` so callers can skip when no database is configured.
pub async fn try_app() -> Result<Option<TestApp>> {
    if env::var("TEST_DATABASE_URL").is_err() {
        eprintln!("TEST_DATABASE_URL not set, skipping database test");
        return Ok(None);
    }
    TestApp::new().await.map(Some)
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: 4,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            session_secret: "test-session-secret".to_string(),
            session_ttl_seconds: 7200,
            blind_index_key: BLIND_INDEX_KEY.to_string(),
            public_base_url: "https://events.example.com".to_string(),
            tracking_allowed_origins: vec!["https://tickets.example.org".to_string()],
            organiser_email: Some("organiser@example.com".to_string()),
            notifier_url: None,
            notifier_api_key: None,
            worker_concurrency: 1,
            cors_allowed_origin: None,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let notifier = Arc::new(FakeNotifier::default());
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::with_clock(
            pool.clone(),
            config,
            jwt,
            notifier.clone(),
            clock.clone(),
        );
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            clock,
            notifier,
            indexer: BlindIndexer::new(BLIND_INDEX_KEY),
            router,
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

    pub async fn insert_user(&self, username: &str, password: &str, role: &str) -> Result<Uuid> {
        let username = username.to_string();
        let password = password.to_string();
        let role = role.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                id: Uuid::new_v4(),
                username,
                password_hash: hash_password(&password)?,
                role,
            };
            diesel::insert_into(users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    pub async fn login_token(&self, username: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json(
                "/api/auth/login",
                &LoginPayload { username, password },
                None,
            )
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
        let parsed: LoginResponse = json_body(response).await?;
        Ok(parsed.access_token)
    }

    /// Current test time at the database's microsecond precision.
    #[allow(dead_code)]
    pub fn clock_now_naive(&self) -> chrono::NaiveDateTime {
        let now = self.clock.now().naive_utc();
        now.with_nanosecond(now.nanosecond() / 1_000 * 1_000)
            .unwrap_or(now)
    }

    /// Signs in a fresh organiser and returns their access token.
    #[allow(dead_code)]
    pub async fn organiser_token(&self) -> Result<String> {
        self.insert_user("organiser", "organiser-pass", "organiser")
            .await?;
        self.login_token("organiser", "organiser-pass").await
    }

    #[allow(dead_code)]
    pub async fn insert_guest_list(&self, name: &str, rsvp_enabled: bool) -> Result<GuestList> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let list = NewGuestList {
                id: Uuid::new_v4(),
                name,
                description: Some("Drinks on the terrace".to_string()),
                status: "active".to_string(),
                event_date: chrono::NaiveDate::from_ymd_opt(2026, 7, 1),
                event_time: chrono::NaiveTime::from_hms_opt(18, 30, 0),
                event_location: Some("Town Hall".to_string()),
                bcc_contact_ids: Vec::new(),
            };
            diesel::insert_into(guest_lists::table)
                .values(&list)
                .execute(conn)
                .context("failed to insert guest list")?;
            let token = rsvp_enabled.then(generate_token);
            let list: GuestList = diesel::update(guest_lists::table.find(list.id))
                .set((
                    guest_lists::rsvp_enabled.eq(rsvp_enabled),
                    guest_lists::rsvp_token.eq(token),
                ))
                .get_result(conn)
                .context("failed to enable rsvp")?;
            Ok(list)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_contact(&self, first: &str, last: &str, email: &str) -> Result<Contact> {
        let contact = NewContact {
            id: Uuid::new_v4(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: Some(normalize_email(email)),
            email_blind_index: Some(self.indexer.email_index(email)),
            phone: None,
            title: None,
            organisation_id: None,
            dietary_requirements: None,
            accessibility_requirements: None,
            status: "active".to_string(),
        };
        self.with_conn(move |conn| {
            Ok(diesel::insert_into(contacts::table)
                .values(&contact)
                .get_result(conn)
                .context("failed to insert contact")?)
        })
        .await
    }

    /// Adds a contact to a list with a personal RSVP token.
    #[allow(dead_code)]
    pub async fn insert_item(&self, list_id: Uuid, contact: &Contact) -> Result<GuestListItem> {
        let item = NewGuestListItem {
            id: Uuid::new_v4(),
            guest_list_id: list_id,
            contact_id: contact.id,
            rsvp_token: Some(generate_token()),
            contact_name: contact.full_name(),
            contact_email: contact.email.clone(),
            contact_title: None,
            contact_organisation: None,
            invite_status: Some("invited".to_string()),
            invite_round: Some("first".to_string()),
            invited_by: Some("organiser".to_string()),
        };
        self.with_conn(move |conn| {
            Ok(diesel::insert_into(guest_list_items::table)
                .values(&item)
                .get_result(conn)
                .context("failed to insert guest list item")?)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn items_on_list(&self, list_id: Uuid) -> Result<Vec<GuestListItem>> {
        self.with_conn(move |conn| {
            Ok(guest_list_items::table
                .filter(guest_list_items::guest_list_id.eq(list_id))
                .order(guest_list_items::created_at.asc())
                .load(conn)
                .context("failed to load items")?)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn item(&self, item_id: Uuid) -> Result<GuestListItem> {
        self.with_conn(move |conn| {
            Ok(guest_list_items::table
                .find(item_id)
                .first(conn)
                .context("failed to load item")?)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn share(&self, share_id: Uuid) -> Result<Share> {
        self.with_conn(move |conn| {
            Ok(guest_list_shares::table
                .find(share_id)
                .first(conn)
                .context("failed to load share")?)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn contact_by_email(&self, email: &str) -> Result<Option<Contact>> {
        let index = self.indexer.email_index(email);
        self.with_conn(move |conn| {
            Ok(contacts::table
                .filter(contacts::email_blind_index.eq(index))
                .first(conn)
                .optional()
                .context("failed to load contact")?)
        })
        .await
    }

    /// Queued notification payloads, oldest first.
    #[allow(dead_code)]
    pub async fn queued_notifications(&self) -> Result<Vec<Notification>> {
        let rows: Vec<Job> = self
            .with_conn(|conn| {
                Ok(jobs::table
                    .order(jobs::created_at.asc())
                    .load(conn)
                    .context("failed to load jobs")?)
            })
            .await?;
        rows.into_iter()
            .map(|job| serde_json::from_value(job.payload).context("bad notification payload"))
            .collect()
    }

    #[allow(dead_code)]
    pub async fn jobs(&self) -> Result<Vec<Job>> {
        self.with_conn(|conn| {
            Ok(jobs::table
                .order(jobs::created_at.asc())
                .load(conn)
                .context("failed to load jobs")?)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn audit_actions(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            use guestlist::schema::audit_logs;
            Ok(audit_logs::table
                .order(audit_logs::created_at.asc())
                .select(audit_logs::action)
                .load(conn)
                .context("failed to load audit log")?)
        })
        .await
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

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
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

#[allow(dead_code)]
pub async fn json_body<T: DeserializeOwned>(response: hyper::Response<Body>) -> Result<T> {
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
        "TRUNCATE TABLE audit_logs, jobs, share_otp_codes, guest_list_shares, guest_list_items, \
         guest_lists, contacts, organisations, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}

use std::env;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 7200;
pub const DEFAULT_WORKER_CONCURRENCY: usize = 2;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_minutes: i64,
    pub session_secret: String,
    pub session_ttl_seconds: i64,
    pub blind_index_key: String,
    pub public_base_url: String,
    pub tracking_allowed_origins: Vec<String>,
    pub organiser_email: Option<String>,
    pub notifier_url: Option<String>,
    pub notifier_api_key: Option<String>,
    pub worker_concurrency: usize,
    pub cors_allowed_origin: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "guestlist".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "guestlist-admin".to_string());
        let jwt_expiry_minutes = env::var("JWT_EXPIRY_MINUTES")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("JWT_EXPIRY_MINUTES must be an integer")?;
        let session_secret = env::var("SESSION_SECRET").unwrap_or_else(|_| jwt_secret.clone());
        let session_ttl_seconds = env::var("SESSION_TTL_SECONDS")
            .unwrap_or_else(|_| DEFAULT_SESSION_TTL_SECONDS.to_string())
            .parse()
            .context("SESSION_TTL_SECONDS must be an integer")?;
        let blind_index_key =
            env::var("BLIND_INDEX_KEY").context("BLIND_INDEX_KEY must be set")?;
        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        Url::parse(&public_base_url).context("PUBLIC_BASE_URL must be an absolute URL")?;
        let tracking_allowed_origins = env::var("TRACKING_ALLOWED_ORIGINS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();
        let organiser_email = env::var("ORGANISER_EMAIL").ok();
        let notifier_url = env::var("NOTIFIER_URL").ok();
        let notifier_api_key = env::var("NOTIFIER_API_KEY").ok();
        let worker_concurrency = env::var("WORKER_CONCURRENCY")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_WORKER_CONCURRENCY);
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expiry_minutes,
            session_secret,
            session_ttl_seconds,
            blind_index_key,
            public_base_url,
            tracking_allowed_origins,
            organiser_email,
            notifier_url,
            notifier_api_key,
            worker_concurrency,
            cors_allowed_origin,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }

    pub fn rsvp_link(&self, token: &str) -> String {
        format!("{}/rsvp/{}", self.public_base_url.trim_end_matches('/'), token)
    }

    pub fn tracking_pixel_url(&self, token: &str) -> String {
        format!(
            "{}/public/t/{}/open.gif",
            self.public_base_url.trim_end_matches('/'),
            token
        )
    }

    pub fn share_link(&self, token: &str) -> String {
        format!(
            "{}/shared/guest-lists/{}",
            self.public_base_url.trim_end_matches('/'),
            token
        )
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}

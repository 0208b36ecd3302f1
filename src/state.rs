use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    clock::{Clock, SystemClock},
    config::AppConfig,
    crypto::BlindIndexer,
    db::PgPool,
    error::{AppError, AppResult},
    notifier::Notifier,
    session::SessionIssuer,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub jwt: JwtService,
    pub sessions: SessionIssuer,
    pub blind_index: BlindIndexer,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        jwt: JwtService,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::with_clock(pool, config, jwt, notifier, Arc::new(SystemClock))
    }

    pub fn with_clock(
        pool: PgPool,
        config: AppConfig,
        jwt: JwtService,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions = SessionIssuer::from_config(&config);
        let blind_index = BlindIndexer::new(&config.blind_index_key);
        Self {
            pool,
            config: Arc::new(config),
            jwt,
            sessions,
            blind_index,
            notifier,
            clock,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}

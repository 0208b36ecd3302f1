use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use guestlist::{
    auth::jwt::JwtService, config::AppConfig, db, default_handlers, notifier, state::AppState,
    Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let pool_size = (config.worker_concurrency as u32).max(1);
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size,
        concurrency = config.worker_concurrency,
        relay_enabled = config.notifier_url.is_some(),
        "loaded guestlist configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, pool_size)?;
    let notifier = notifier::from_config(&config)?;
    let jwt = JwtService::from_config(&config)?;
    let concurrency = config.worker_concurrency;

    let state = Arc::new(AppState::new(pool, config, jwt, notifier));
    let worker = Arc::new(Worker::new(state, default_handlers(), Duration::from_secs(2)));

    tokio::select! {
        _ = worker.run_pool(concurrency) => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

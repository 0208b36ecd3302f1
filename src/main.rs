use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

use guestlist::{
    auth::jwt::JwtService, config::AppConfig, db, default_handlers, notifier, routes,
    state::AppState, Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        public_base_url = %config.public_base_url,
        worker_concurrency = config.worker_concurrency,
        "loaded guestlist configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    db::run_migrations(&pool)?;

    let notifier = notifier::from_config(&config)?;
    let jwt = JwtService::from_config(&config)?;
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    let worker_concurrency = config.worker_concurrency;

    let state = AppState::new(pool, config, jwt, notifier);

    let worker = Arc::new(Worker::new(
        Arc::new(state.clone()),
        default_handlers(),
        Duration::from_secs(2),
    ));
    tokio::spawn(worker.run_pool(worker_concurrency));

    let app = routes::create_router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("server received shutdown signal");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

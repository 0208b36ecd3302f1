use std::env;

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use guestlist::{
    auth::{password::hash_password, ORGANISER_ROLES},
    config::AppConfig,
    db::{self, PgPool},
    jobs, otp,
    models::NewUser,
    schema::users,
};

const USAGE: &str = "Usage: maintenance <purge-otp-codes | purge-jobs | create-user <username> <password> [role]>";

const OTP_RETENTION_DAYS: i64 = 1;
const JOB_RETENTION_DAYS: i64 = 7;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("purge-otp-codes") => purge_otp_codes()?,
        Some("purge-jobs") => purge_jobs()?,
        Some("create-user") => {
            let username = args.next().ok_or_else(|| anyhow!(USAGE))?;
            let password = args.next().ok_or_else(|| anyhow!(USAGE))?;
            let role = args.next().unwrap_or_else(|| "organiser".to_string());
            create_user(&username, &password, &role)?;
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<PgPool> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded guestlist configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    Ok(pool)
}

fn purge_otp_codes() -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let cutoff = Utc::now() - Duration::days(OTP_RETENTION_DAYS);
    let removed = otp::purge_stale_codes(&mut conn, cutoff)
        .map_err(|err| anyhow!("failed to purge verification codes: {err}"))?;
    println!("Removed {removed} stale verification codes.");
    Ok(())
}

fn purge_jobs() -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let cutoff = (Utc::now() - Duration::days(JOB_RETENTION_DAYS)).naive_utc();
    let removed = jobs::purge_succeeded_jobs(&mut conn, cutoff)?;
    println!("Removed {removed} completed jobs.");
    Ok(())
}

fn create_user(username: &str, password: &str, role: &str) -> Result<()> {
    if !ORGANISER_ROLES.contains(&role) {
        return Err(anyhow!(
            "role must be one of: {}",
            ORGANISER_ROLES.join(", ")
        ));
    }

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let user = NewUser {
        id: Uuid::new_v4(),
        username: username.trim().to_string(),
        password_hash: hash_password(password)?,
        role: role.to_string(),
    };
    diesel::insert_into(users::table)
        .values(&user)
        .execute(&mut conn)
        .context("failed to insert user")?;
    println!("Created {role} user {} ({})", user.username, user.id);
    Ok(())
}

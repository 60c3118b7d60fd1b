//! Ivywhiz REST API server binary.
//!
//! Connects to PostgreSQL, runs migrations, optionally seeds an admin account
//! and serves the API until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ivywhiz_api::config::{ApiConfig, DEFAULT_LOG_FILTER, parse_origins};
use ivywhiz_api::{AppState, services};
use ivywhiz_core::mailer::LogMailer;
use ivywhiz_core::store::PgStore;
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// CLI arguments for the API server. Anything not given here falls back to
/// `ApiConfig::from_env`.
#[derive(Parser, Debug)]
#[command(name = "ivywhiz_api_server", about = "Ivywhiz REST API server")]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 4000)]
    port: u16,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/ivywhiz"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, env = "DB_MAX_OPEN_CONNS", default_value_t = 25)]
    max_connections: u32,

    /// Environment name reported by the health check.
    #[arg(long, env = "ENVIRONMENT", default_value = "development")]
    env: String,

    /// Space separated list of trusted CORS origins.
    #[arg(long, env = "CORS_TRUSTED_ORIGINS")]
    cors_trusted_origins: Option<String>,

    /// Disable the per-client rate limiter.
    #[arg(long, default_value_t = false)]
    no_limiter: bool,

    /// Key rate-limit clients by socket address only, ignoring
    /// X-Forwarded-For and X-Real-IP. Use when not behind a trusted proxy.
    #[arg(long, default_value_t = false)]
    ignore_forwarded_for: bool,

    /// Email of an admin account to create at startup.
    #[arg(long, env = "ADMIN_EMAIL", requires = "admin_password")]
    admin_email: Option<String>,

    /// Password for the startup admin account.
    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
            }),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env();
    config.bind_addr = format!("0.0.0.0:{}", args.port);
    config.database_url = args.database_url.clone();
    config.environment = args.env.clone();
    if let Some(origins) = &args.cors_trusted_origins {
        config.trusted_origins = parse_origins(origins);
    }
    if args.no_limiter {
        config.limiter.enabled = false;
    }
    if args.ignore_forwarded_for {
        config.limiter.trust_forwarded = false;
    }

    info!(
        port = args.port,
        environment = %config.environment,
        max_connections = args.max_connections,
        limiter_enabled = config.limiter.enabled,
        "starting ivywhiz_api_server"
    );

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database_url)
        .await?;
    info!("database connection pool established");

    info!("running database migrations");
    ivywhiz_api::migrate(&pool).await?;

    let store = Arc::new(PgStore::new(pool.clone()));
    let state = AppState::new(config.clone(), store, Arc::new(LogMailer));

    if let (Some(email), Some(password)) = (&args.admin_email, &args.admin_password) {
        services::auth::seed_admin(&state, email, password)
            .await
            .map_err(|e| format!("seeding admin account: {e}"))?;
    }

    let sweeper = state.limiter.start();
    let limiter = state.limiter.clone();
    let background = state.background.clone();

    let app = ivywhiz_api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("completing background tasks");
    limiter.stop();
    join_sweeper(sweeper).await;
    background.close();
    background.wait().await;
    pool.close().await;

    info!("stopped server");
    Ok(())
}

/// Wait for the rate-limiter sweep to finish, logging it if it panicked.
async fn join_sweeper(sweeper: JoinHandle<()>) {
    if let Err(e) = sweeper.await {
        error!(error = %e, "rate limiter sweep task failed");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down server");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicked_sweeper_does_not_abort_shutdown() {
        let sweeper = tokio::spawn(async {
            panic!("sweep blew up");
        });
        tokio::time::timeout(Duration::from_secs(1), join_sweeper(sweeper))
            .await
            .expect("join returns");
    }

    #[tokio::test]
    async fn finished_sweeper_joins_cleanly() {
        join_sweeper(tokio::spawn(async {})).await;
    }
}

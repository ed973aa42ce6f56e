pub mod accounts;
pub mod api;
pub mod auth;
pub mod authorization;
pub mod config;
pub mod db;
pub mod family;
pub mod lifecycle;
pub mod medications;
pub mod metrics;
pub mod models;
pub mod prescriptions;
pub mod profiles;
pub mod scoping;
pub mod validation;
pub mod web;

use tracing_subscriber::EnvFilter;

/// Anything that stops the service from coming up.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Database(#[from] db::DatabaseError),

    #[error("Failed to bind HTTP listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// Start CareSync and serve until Ctrl-C.
pub async fn run() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("CareSync starting v{}", config::APP_VERSION);

    let config = config::AppConfig::from_env()?;

    // Migrate once up front; request handlers only open connections.
    let conn = db::open_database(&config.db_path)?;
    let purged = db::purge_expired_revocations(&conn, &chrono::Utc::now())?;
    if purged > 0 {
        tracing::info!(purged, "dropped expired token revocations");
    }
    drop(conn);
    tracing::info!(db = %config.db_path.display(), "database ready");

    let server = api::start_server(config).await?;
    tracing::info!(addr = %server.addr, "listening");
    server.stopped().await;
    Ok(())
}

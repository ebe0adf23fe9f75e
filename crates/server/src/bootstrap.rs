use std::sync::Arc;
use std::time::Duration;

use intake_core::config::{AppConfig, ConfigError, LoadOptions};
use intake_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::services::AuthService;
use crate::state::{AppState, Integrations, StateError};

const PURGE_INTERVAL: Duration = Duration::from_secs(15 * 60);

pub struct Application {
    pub state: AppState,
    pub db_pool: DbPool,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error(transparent)]
    State(#[from] StateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let integrations = Integrations::from_config(&config)?;
    info!(
        event_name = "system.bootstrap.integrations",
        correlation_id = "bootstrap",
        slack_webhook = integrations.webhook.is_some(),
        slack_api = integrations.slack_api.is_some(),
        billing = integrations.billing.is_some(),
        "outbound integrations resolved"
    );

    let state = AppState::build(config, db_pool.clone(), integrations)?;
    Ok(Application { state, db_pool })
}

/// Periodically drops expired passcode challenges and sessions.
pub fn spawn_expiry_sweeper(auth: Arc<AuthService>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            match auth.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => info!(
                    event_name = "auth.expired_purged",
                    correlation_id = "sweeper",
                    removed,
                    "expired challenges and sessions removed"
                ),
                Err(error) => warn!(
                    event_name = "auth.expired_purge_failed",
                    correlation_id = "sweeper",
                    error = %error,
                    "expiry sweep failed"
                ),
            }
        }
    })
}

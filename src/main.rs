use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use download_service::config::{DaemonConfig, LibraryConfig, SandboxConfig};
use download_service::datasource::{PgStore, Repositories};
use download_service::errors::InternalError;
use download_service::state::{self, AppState};

#[tokio::main]
async fn main() -> Result<(), InternalError> {
    // initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = state::create_db_pool()?;
    sqlx::migrate!().run(&pool).await?;

    let app_state = AppState::new(
        DaemonConfig::from_env()?,
        LibraryConfig::from_env()?,
        SandboxConfig::from_env()?,
        Repositories::from_store(PgStore::new(pool)),
    );
    app_state.downloads.repair_unfinished().await?;
    let handles = app_state.start()?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    app_state.connection.shutdown();
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

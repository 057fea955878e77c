use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tokio::task::JoinHandle;

use crate::config::{DaemonConfig, DbConfig, LibraryConfig, SandboxConfig};
use crate::daemon::{ConnectionManager, Daemon};
use crate::datasource::Repositories;
use crate::files::{BlockingPool, FileService};
use crate::jobs::purge::PurgeHistory;
use crate::jobs::trackers::{TrackerRefresh, REFRESH_PERIOD};
use crate::jobs::{start_daily, start_every};
use crate::pipeline::DownloadService;
use crate::request_cache::RequestCache;
use crate::sandbox::RuleSandbox;
use crate::tasks::{Dispatcher, TaskRegistry};

pub type DBPool = Pool<Postgres>;

pub fn create_db_pool() -> Result<DBPool> {
    let url = DbConfig::from_env()?.url()?;
    Ok(PgPoolOptions::new().connect_lazy(url.as_str())?)
}

/// Every long-lived component of the service, wired together.
#[derive(Clone)]
pub struct AppState {
    pub config: DaemonConfig,
    pub connection: ConnectionManager,
    pub dispatcher: Dispatcher,
    pub downloads: DownloadService,
    pub trackers: RequestCache<String>,
}

impl AppState {
    pub fn new(
        config: DaemonConfig,
        library: LibraryConfig,
        sandbox: SandboxConfig,
        repositories: Repositories,
    ) -> Self {
        let connection = ConnectionManager::new(config.clone());
        let daemon: Arc<dyn Daemon> = Arc::new(connection.clone());
        let registry = TaskRegistry::new();
        let files = FileService::new(
            repositories.catalog.clone(),
            BlockingPool::new(library.io_workers),
        );
        let dispatcher = Dispatcher::new(
            daemon.clone(),
            registry.clone(),
            repositories.items.clone(),
            files.clone(),
        );
        let trackers = RequestCache::new();
        let downloads = DownloadService::builder(daemon, registry, repositories, files)
            .sandbox(RuleSandbox::new(sandbox))
            .library(library)
            .trackers(trackers.clone())
            .http_proxy(config.http_proxy.clone())
            .build();
        Self {
            config,
            connection,
            dispatcher,
            downloads,
            trackers,
        }
    }

    /// Opens the daemon session and schedules housekeeping.
    pub fn start(&self) -> crate::errors::Result<Vec<JoinHandle<()>>> {
        let mut handles = vec![self.connection.start(Arc::new(self.dispatcher.clone()))];
        if self.config.auto_update_tracker {
            let refresh = TrackerRefresh::from_config(&self.config, self.trackers.clone())?;
            handles.push(start_every(refresh, REFRESH_PERIOD, true));
        }
        let purge = PurgeHistory::new(Arc::new(self.connection.clone()));
        handles.push(start_daily(purge)?);
        Ok(handles)
    }
}

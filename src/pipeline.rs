use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use aria2::AddUriOptions;

use crate::config::LibraryConfig;
use crate::daemon::Daemon;
use crate::datasource::Repositories;
use crate::errors::{Error, Result};
use crate::files::{md5_hex, FileService};
use crate::jobs::trackers::TRACKER_CACHE_KEY;
use crate::models::{
    DownloadItem, DownloadQuery, DownloadState, DownloadStatus, FeedEntry, FileRecord, Media,
    NewDownloadItem,
};
use crate::request_cache::RequestCache;
use crate::sandbox::RuleSandbox;
use crate::tasks::{Task, TaskRegistry, TaskState};

mod catalog;

const RESTARTED: &str = "Application restarted";

/// Generates derived artifacts for a freshly cataloged media record.
#[async_trait]
pub trait MediaPostProcessor: Send + Sync {
    async fn process(&self, media: &Media, file: &FileRecord) -> Result<()>;
}

/// Post-processor for deployments without a transcoding backend.
#[derive(Debug, Default)]
pub struct LoggingPostProcessor;

#[async_trait]
impl MediaPostProcessor for LoggingPostProcessor {
    async fn process(&self, media: &Media, file: &FileRecord) -> Result<()> {
        debug!(media_id = %media.id, path = file.path, "no media post-processing configured");
        Ok(())
    }
}

/// Provenance attached to an automatically submitted download.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDownload {
    /// Reuse this item instead of creating a new one.
    pub item_id: Option<Uuid>,
    pub rule_id: Option<i64>,
    pub source_id: Option<i64>,
    pub log_id: Option<i64>,
}

/// Submits downloads, tracks them, and catalogs what they produce.
#[derive(Clone)]
pub struct DownloadService {
    daemon: Arc<dyn Daemon>,
    registry: TaskRegistry,
    repositories: Repositories,
    files: FileService,
    sandbox: RuleSandbox,
    post_processor: Arc<dyn MediaPostProcessor>,
    trackers: RequestCache<String>,
    library: LibraryConfig,
    http_proxy: Option<String>,
}

pub struct DownloadServiceBuilder {
    daemon: Arc<dyn Daemon>,
    registry: TaskRegistry,
    repositories: Repositories,
    files: FileService,
    sandbox: RuleSandbox,
    post_processor: Arc<dyn MediaPostProcessor>,
    trackers: RequestCache<String>,
    library: LibraryConfig,
    http_proxy: Option<String>,
}

impl DownloadServiceBuilder {
    pub fn post_processor(mut self, post_processor: Arc<dyn MediaPostProcessor>) -> Self {
        self.post_processor = post_processor;
        self
    }

    pub fn trackers(mut self, trackers: RequestCache<String>) -> Self {
        self.trackers = trackers;
        self
    }

    pub fn library(mut self, library: LibraryConfig) -> Self {
        self.library = library;
        self
    }

    pub fn sandbox(mut self, sandbox: RuleSandbox) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn http_proxy(mut self, http_proxy: Option<String>) -> Self {
        self.http_proxy = http_proxy;
        self
    }

    pub fn build(self) -> DownloadService {
        DownloadService {
            daemon: self.daemon,
            registry: self.registry,
            repositories: self.repositories,
            files: self.files,
            sandbox: self.sandbox,
            post_processor: self.post_processor,
            trackers: self.trackers,
            library: self.library,
            http_proxy: self.http_proxy,
        }
    }
}

impl DownloadService {
    pub fn builder(
        daemon: Arc<dyn Daemon>,
        registry: TaskRegistry,
        repositories: Repositories,
        files: FileService,
    ) -> DownloadServiceBuilder {
        DownloadServiceBuilder {
            daemon,
            registry,
            repositories,
            files,
            sandbox: RuleSandbox::new(crate::config::SandboxConfig::default()),
            post_processor: Arc::new(LoggingPostProcessor),
            trackers: RequestCache::new(),
            library: LibraryConfig::default(),
            http_proxy: None,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Submits `url` to the daemon and starts tracking it.
    ///
    /// Returns as soon as the job is accepted; progress is reported through
    /// the returned [`Task`].
    #[instrument(skip(self, item), fields(item_id))]
    pub async fn create_task(&self, url: &str, item: NewDownloadItem) -> Result<Task> {
        let trackers = self
            .trackers
            .get(TRACKER_CACHE_KEY)
            .map(|trackers| trackers.as_str().to_owned())
            .unwrap_or_default();
        let dir = self
            .library
            .download_dir
            .join(Uuid::new_v4().simple().to_string());
        // The job id is chosen here so the task is registered, and its gate
        // held, before the daemon can notify about it.
        let gid = format!("{:016x}", Uuid::new_v4().as_u64_pair().0);
        let options = AddUriOptions::new()
            .gid(gid.as_str())
            .http_proxy(self.http_proxy.as_deref())
            .seed_time(0)
            .bt_tracker(trackers)
            .dir(dir.to_string_lossy());

        let item_id = item.id.unwrap_or_else(Uuid::new_v4);
        tracing::Span::current().record("item_id", tracing::field::display(item_id));
        let (entry, task) = self.registry.insert(&gid, item_id);
        let gate = entry.lock().await;
        if let Err(err) = self.daemon.add_uri(&[url.to_owned()], &options).await {
            drop(gate);
            self.registry.remove(&gid);
            return Err(err);
        }
        let item = NewDownloadItem {
            id: Some(item_id),
            ..item
        };
        let saved = self
            .repositories
            .items
            .save(item, url, &md5_hex(url.as_bytes()))
            .await;
        drop(gate);

        if let Err(err) = saved {
            self.registry.remove(&gid);
            if let Err(remove_err) = self.daemon.remove(&gid).await {
                warn!(gid, "failed to remove orphaned job: {remove_err}");
            }
            return Err(Error::database(err));
        }
        info!(gid, "download task created");
        Ok(task)
    }

    /// Submits the enclosure of a feed entry and catalogs the result once the
    /// transfer completes.
    pub async fn create_auto_download_task(
        &self,
        entry: FeedEntry,
        props: AutoDownload,
    ) -> Result<Task> {
        let item = NewDownloadItem {
            id: props.item_id,
            title: entry.title.clone(),
            entry: Some(entry.to_json()),
            source_id: props.source_id,
            rule_id: props.rule_id,
            log_id: props.log_id,
        };
        let task = self.create_task(&entry.enclosure.url, item).await?;

        let service = self.clone();
        let waiter = task.clone();
        tokio::spawn(async move {
            match waiter.finished().await {
                TaskState::Completed(files) => {
                    service
                        .catalog(&entry, props.rule_id, waiter.item_id(), &files)
                        .await;
                }
                state => debug!(gid = waiter.gid(), ?state, "download ended without files"),
            }
        });
        Ok(task)
    }

    pub fn task_by_item_id(&self, item_id: Uuid) -> Option<Task> {
        self.registry.find_by_item(item_id)
    }

    /// Live progress of a tracked job, following a metadata job to the job it
    /// spawned. `None` when the daemon no longer knows the job.
    pub async fn live_state(&self, gid: &str) -> Option<DownloadState> {
        let mut status = self.daemon.tell_status(gid).await.ok()?;
        if let Some(next) = status.followed_by.first().cloned() {
            status = self.daemon.tell_status(&next).await.ok()?;
        }
        Some(DownloadState::from(&status))
    }

    async fn with_state(&self, mut item: DownloadItem) -> DownloadItem {
        if let Some(task) = self.task_by_item_id(item.id) {
            item.state = self.live_state(task.gid()).await;
        }
        item
    }

    pub async fn find_one(&self, id: Uuid) -> Result<Option<DownloadItem>> {
        let item = self
            .repositories
            .items
            .find_by_id(id)
            .await
            .map_err(Error::database)?;
        match item {
            Some(item) => Ok(Some(self.with_state(item).await)),
            None => Ok(None),
        }
    }

    pub async fn find_and_count(&self, query: &DownloadQuery) -> Result<(Vec<DownloadItem>, i64)> {
        let (items, total) = self
            .repositories
            .items
            .find_and_count(query)
            .await
            .map_err(Error::database)?;
        let mut enriched = Vec::with_capacity(items.len());
        for item in items {
            enriched.push(self.with_state(item).await);
        }
        Ok((enriched, total))
    }

    /// Cancels any live task of the given items, then deletes them. Returns
    /// whether anything matched.
    ///
    /// Daemon removal and row deletion are not transactional; a failed daemon
    /// call is logged and the row is deleted anyway.
    pub async fn delete(&self, ids: &[Uuid]) -> Result<bool> {
        let items = self
            .repositories
            .items
            .find_by_ids(ids)
            .await
            .map_err(Error::database)?;
        for item in &items {
            if let Some(task) = self.task_by_item_id(item.id) {
                self.cancel(&task).await;
            }
            self.repositories
                .items
                .delete(item.id)
                .await
                .map_err(Error::database)?;
            debug!(item_id = %item.id, "download item deleted");
        }
        Ok(!items.is_empty())
    }

    async fn cancel(&self, task: &Task) {
        if let Some(entry) = self.registry.remove(task.gid()) {
            let mut finished = entry.lock().await;
            if !*finished {
                *finished = true;
                entry.set_state(TaskState::Stopped);
            }
        }
        if let Err(err) = self.daemon.remove(task.gid()).await {
            warn!(gid = task.gid(), "failed to remove job from the daemon: {err}");
        }
    }

    /// Fails every item a previous process left unfinished; their tasks are
    /// gone with that process.
    pub async fn repair_unfinished(&self) -> Result<u64> {
        let repaired = self
            .repositories
            .items
            .update_status_where(
                &DownloadStatus::UNFINISHED,
                DownloadStatus::Failed,
                Some(RESTARTED),
            )
            .await
            .map_err(Error::database)?;
        if repaired > 0 {
            info!(repaired, "marked unfinished downloads as failed");
        }
        Ok(repaired)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::anyhow;
    use aria2::{Notification, NotificationKind, Status};

    use super::*;
    use crate::daemon::fake::FakeDaemon;
    use crate::datasource::{DownloadItemRepository, MemoryStore};
    use crate::files::BlockingPool;
    use crate::tasks::Dispatcher;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        daemon: Arc<FakeDaemon>,
        store: MemoryStore,
        trackers: RequestCache<String>,
        service: DownloadService,
        dispatcher: Dispatcher,
    }

    fn fixture_with(daemon: FakeDaemon) -> Fixture {
        let daemon = Arc::new(daemon);
        let store = MemoryStore::new();
        let registry = TaskRegistry::new();
        let files = FileService::new(Arc::new(store.clone()), BlockingPool::new(1));
        let trackers = RequestCache::new();
        let service = DownloadService::builder(
            daemon.clone(),
            registry.clone(),
            Repositories::from_store(store.clone()),
            files.clone(),
        )
        .trackers(trackers.clone())
        .http_proxy(Some("http://proxy:3128".into()))
        .library(LibraryConfig {
            download_dir: "/srv/download".into(),
            ..LibraryConfig::default()
        })
        .build();
        let dispatcher = Dispatcher::new(daemon.clone(), registry, Arc::new(store.clone()), files);
        Fixture {
            daemon,
            store,
            trackers,
            service,
            dispatcher,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FakeDaemon::default())
    }

    struct BrokenItems;

    #[async_trait]
    impl DownloadItemRepository for BrokenItems {
        async fn save(&self, _: NewDownloadItem, _: &str, _: &str) -> anyhow::Result<DownloadItem> {
            Err(anyhow!("database is down"))
        }

        async fn update_status(
            &self,
            _: Uuid,
            _: DownloadStatus,
            _: Option<&str>,
        ) -> anyhow::Result<()> {
            Err(anyhow!("database is down"))
        }

        async fn update_status_where(
            &self,
            _: &[DownloadStatus],
            _: DownloadStatus,
            _: Option<&str>,
        ) -> anyhow::Result<u64> {
            Err(anyhow!("database is down"))
        }

        async fn find_by_id(&self, _: Uuid) -> anyhow::Result<Option<DownloadItem>> {
            Err(anyhow!("database is down"))
        }

        async fn find_by_ids(&self, _: &[Uuid]) -> anyhow::Result<Vec<DownloadItem>> {
            Err(anyhow!("database is down"))
        }

        async fn find_and_count(
            &self,
            _: &DownloadQuery,
        ) -> anyhow::Result<(Vec<DownloadItem>, i64)> {
            Err(anyhow!("database is down"))
        }

        async fn delete(&self, _: Uuid) -> anyhow::Result<()> {
            Err(anyhow!("database is down"))
        }
    }

    fn item(title: &str) -> NewDownloadItem {
        NewDownloadItem {
            title: title.into(),
            ..NewDownloadItem::default()
        }
    }

    #[tokio::test]
    async fn test_create_task_submits_options_and_saves_item() {
        let f = fixture();
        f.trackers
            .insert(TRACKER_CACHE_KEY, "tracker1,tracker2".to_string());

        let task = f
            .service
            .create_task("magnet:?xt=urn:btih:abc", item("Ep 1"))
            .await
            .unwrap();

        let submitted = f.daemon.submitted();
        assert_eq!(submitted.len(), 1);
        let (uris, options) = &submitted[0];
        assert_eq!(uris, &vec!["magnet:?xt=urn:btih:abc".to_string()]);
        assert_eq!(options.get("bt-tracker"), Some("tracker1,tracker2"));
        assert_eq!(options.get("seed-time"), Some("0"));
        assert_eq!(options.get("http-proxy"), Some("http://proxy:3128"));
        let dir = options.get("dir").unwrap();
        assert!(dir.starts_with("/srv/download/"));
        assert_eq!(dir.rsplit('/').next().unwrap().len(), 32);

        let stored = f.store.find_by_id(task.item_id()).await.unwrap().unwrap();
        assert_eq!(stored.title, "Ep 1");
        assert_eq!(stored.status, DownloadStatus::Pending);
        assert_eq!(stored.hash, md5_hex(b"magnet:?xt=urn:btih:abc"));
        assert_eq!(task.state(), TaskState::Pending);
        assert!(f.service.task_by_item_id(task.item_id()).is_some());
    }

    #[tokio::test]
    async fn test_create_task_without_trackers_sends_empty_hint() {
        let f = fixture();
        f.service
            .create_task("http://x/a.mkv", item("a"))
            .await
            .unwrap();
        let (_, options) = &f.daemon.submitted()[0];
        assert_eq!(options.get("bt-tracker"), Some(""));
    }

    #[tokio::test]
    async fn test_notification_during_submission_waits_for_item() {
        let f = fixture_with(FakeDaemon::slow_submit(Duration::from_millis(100)));
        let submission = tokio::spawn({
            let service = f.service.clone();
            async move { service.create_task("http://x/a.mkv", item("a")).await }
        });

        let gid = tokio::time::timeout(WAIT, async {
            loop {
                if let Some((_, options)) = f.daemon.submitted().first() {
                    break options.get("gid").unwrap().to_owned();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(gid.len(), 16);
        f.daemon.set(Status {
            gid: gid.clone(),
            status: "error".into(),
            error_message: Some("unsupported protocol".into()),
            ..Status::default()
        });
        let dispatch = tokio::spawn({
            let dispatcher = f.dispatcher.clone();
            let gid = gid.clone();
            async move {
                dispatcher
                    .dispatch(Notification::new(NotificationKind::Error, &gid))
                    .await;
            }
        });

        let task = submission.await.unwrap().unwrap();
        assert_eq!(task.gid(), gid);
        assert_eq!(
            tokio::time::timeout(WAIT, task.finished()).await.unwrap(),
            TaskState::Failed(Some("unsupported protocol".into()))
        );
        dispatch.await.unwrap();
        let stored = f.store.find_by_id(task.item_id()).await.unwrap().unwrap();
        assert_eq!(stored.status, DownloadStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("unsupported protocol"));
    }

    #[tokio::test]
    async fn test_failed_save_removes_the_job() {
        let daemon = Arc::new(FakeDaemon::default());
        let store = MemoryStore::new();
        let registry = TaskRegistry::new();
        let files = FileService::new(Arc::new(store.clone()), BlockingPool::new(1));
        let repositories = Repositories {
            items: Arc::new(BrokenItems),
            ..Repositories::from_store(store)
        };
        let service =
            DownloadService::builder(daemon.clone(), registry.clone(), repositories, files)
                .build();

        let err = service
            .create_task("http://x/a.mkv", item("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert!(registry.is_empty());
        assert_eq!(daemon.removed().len(), 1);
    }

    #[tokio::test]
    async fn test_live_state_follows_spawned_job() {
        let f = fixture();
        let task = f
            .service
            .create_task("http://x/a.torrent", item("a"))
            .await
            .unwrap();
        f.daemon.set(Status {
            gid: task.gid().into(),
            followed_by: vec!["content".into()],
            total_length: 10,
            ..Status::default()
        });
        f.daemon.set(Status {
            gid: "content".into(),
            following: Some(task.gid().into()),
            total_length: 1000,
            completed_length: 250,
            download_speed: 50,
            ..Status::default()
        });

        let found = f.service.find_one(task.item_id()).await.unwrap().unwrap();
        assert_eq!(
            found.state,
            Some(DownloadState {
                total_length: 1000,
                completed_length: 250,
                download_speed: 50,
            })
        );
        let (page, total) = f
            .service
            .find_and_count(&DownloadQuery::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].state, found.state);
    }

    #[tokio::test]
    async fn test_vanished_job_has_no_live_state() {
        let f = fixture();
        let task = f
            .service
            .create_task("http://x/a.mkv", item("a"))
            .await
            .unwrap();
        f.daemon.remove(task.gid()).await.unwrap();

        let found = f.service.find_one(task.item_id()).await.unwrap().unwrap();
        assert!(found.state.is_none());
        assert!(f.service.find_one(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_cancels_live_task() {
        let f = fixture_with(FakeDaemon::rejecting_remove());
        let task = f
            .service
            .create_task("http://x/a.mkv", item("a"))
            .await
            .unwrap();
        let idle = f
            .store
            .save(item("b"), "http://x/b.mkv", "h")
            .await
            .unwrap();

        // A failing daemon removal does not keep the row alive.
        assert!(f.service.delete(&[task.item_id(), idle.id]).await.unwrap());
        assert_eq!(task.finished().await, TaskState::Stopped);
        assert!(f.service.registry().is_empty());
        assert_eq!(f.daemon.removed(), vec![task.gid().to_string()]);
        assert!(f.store.items().is_empty());

        assert!(!f.service.delete(&[task.item_id()]).await.unwrap());
    }

    #[tokio::test]
    async fn test_repair_unfinished_fails_leftovers() {
        let f = fixture();
        let paused = f.store.save(item("a"), "u", "h").await.unwrap();
        let done = f.store.save(item("b"), "u", "h").await.unwrap();
        f.store
            .update_status(paused.id, DownloadStatus::Paused, None)
            .await
            .unwrap();
        f.store
            .update_status(done.id, DownloadStatus::Success, None)
            .await
            .unwrap();

        assert_eq!(f.service.repair_unfinished().await.unwrap(), 1);
        let paused = f.store.find_by_id(paused.id).await.unwrap().unwrap();
        assert_eq!(paused.status, DownloadStatus::Failed);
        assert_eq!(paused.error.as_deref(), Some(RESTARTED));
        let done = f.store.find_by_id(done.id).await.unwrap().unwrap();
        assert_eq!(done.status, DownloadStatus::Success);
    }

    #[tokio::test]
    async fn test_auto_download_catalogs_on_completion() {
        let f = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mkv");
        std::fs::write(&path, b"video").unwrap();
        let entry = FeedEntry::new("Ep 1", "http://x/a.mkv");

        let task = f
            .service
            .create_auto_download_task(
                entry.clone(),
                AutoDownload {
                    source_id: Some(3),
                    ..AutoDownload::default()
                },
            )
            .await
            .unwrap();
        let stored = f.store.find_by_id(task.item_id()).await.unwrap().unwrap();
        assert_eq!(stored.entry, Some(entry.to_json()));
        assert_eq!(stored.source_id, Some(3));

        f.daemon.set(Status {
            gid: task.gid().into(),
            files: vec![aria2::File {
                path: path.to_string_lossy().into_owned(),
                ..aria2::File::default()
            }],
            ..Status::default()
        });
        f.dispatcher
            .dispatch(aria2::Notification::new(
                NotificationKind::Complete,
                task.gid(),
            ))
            .await;

        let store = f.store.clone();
        tokio::time::timeout(WAIT, async move {
            while store.media().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let media = f.store.media();
        assert_eq!(media[0].name, "a.mkv");
        assert_eq!(media[0].download_id, Some(task.item_id()));
        assert!(f.store.series().is_empty());
    }

    #[tokio::test]
    async fn test_retry_reuses_item_row() {
        let f = fixture();
        let entry = FeedEntry::new("Ep 1", "http://x/a.mkv");
        let first = f
            .service
            .create_auto_download_task(entry.clone(), AutoDownload::default())
            .await
            .unwrap();
        f.store
            .update_status(first.item_id(), DownloadStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let retry = f
            .service
            .create_auto_download_task(
                entry,
                AutoDownload {
                    item_id: Some(first.item_id()),
                    ..AutoDownload::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(retry.item_id(), first.item_id());
        assert_eq!(f.store.items().len(), 1);
        let stored = f.store.find_by_id(first.item_id()).await.unwrap().unwrap();
        assert_eq!(stored.status, DownloadStatus::Pending);
        assert!(stored.error.is_none());
    }
}

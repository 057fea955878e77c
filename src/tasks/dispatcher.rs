use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, instrument, trace};

use aria2::{Notification, NotificationKind, Status};

use crate::daemon::{Daemon, NotificationHandler};
use crate::datasource::DownloadItemRepository;
use crate::files::FileService;
use crate::models::DownloadStatus;
use crate::tasks::{TaskEntry, TaskEvent, TaskRegistry, TaskState};

const CANCELED: &str = "Canceled";

/// Turns daemon notifications into item status changes and task events.
#[derive(Clone)]
pub struct Dispatcher {
    daemon: Arc<dyn Daemon>,
    registry: TaskRegistry,
    items: Arc<dyn DownloadItemRepository>,
    files: FileService,
}

impl Dispatcher {
    pub fn new(
        daemon: Arc<dyn Daemon>,
        registry: TaskRegistry,
        items: Arc<dyn DownloadItemRepository>,
        files: FileService,
    ) -> Self {
        Self {
            daemon,
            registry,
            items,
            files,
        }
    }

    #[instrument(skip_all, fields(kind = ?notification.kind, gid = %notification.gid))]
    pub async fn dispatch(&self, notification: Notification) {
        let status = match self.daemon.tell_status(&notification.gid).await {
            Ok(status) => status,
            Err(err) => {
                debug!("no status for notified job: {err}");
                return;
            }
        };
        let key = status.following.as_deref().unwrap_or(&notification.gid);
        let Some(entry) = self.registry.entry(key) else {
            trace!(key, "job is not tracked");
            return;
        };

        let mut finished = entry.lock().await;
        if *finished {
            trace!("task already finished");
            return;
        }
        match notification.kind {
            NotificationKind::Start => {
                self.set_status(&entry, DownloadStatus::Pending, None).await;
                entry.transition(TaskState::Pending, TaskEvent::Start);
            }
            NotificationKind::Pause => {
                self.set_status(&entry, DownloadStatus::Paused, None).await;
                entry.transition(TaskState::Paused, TaskEvent::Pause);
            }
            NotificationKind::Stop => {
                *finished = true;
                self.registry.remove(entry.gid());
                self.set_status(&entry, DownloadStatus::Failed, Some(CANCELED))
                    .await;
                entry.transition(TaskState::Stopped, TaskEvent::Stop(Box::new(status)));
            }
            NotificationKind::Error => {
                *finished = true;
                self.registry.remove(entry.gid());
                let message = status.error_message.clone();
                self.set_status(&entry, DownloadStatus::Failed, message.as_deref())
                    .await;
                entry.transition(
                    TaskState::Failed(message),
                    TaskEvent::Failed(Box::new(status)),
                );
            }
            NotificationKind::Complete | NotificationKind::BtComplete => {
                if !status.is_final_completion() {
                    debug!(followed_by = ?status.followed_by, "metadata phase finished");
                    return;
                }
                *finished = true;
                self.registry.remove(entry.gid());
                self.complete(&entry, &status).await;
            }
        }
    }

    async fn complete(&self, entry: &TaskEntry, status: &Status) {
        let files = Arc::new(self.files.save_completed(status).await);
        self.set_status(entry, DownloadStatus::Success, None).await;
        debug!(files = files.len(), "download completed");
        entry.transition(
            TaskState::Completed(files.clone()),
            TaskEvent::Complete(files),
        );
    }

    async fn set_status(&self, entry: &TaskEntry, status: DownloadStatus, error: Option<&str>) {
        if let Err(err) = self
            .items
            .update_status(entry.item_id(), status, error)
            .await
        {
            error!(item_id = %entry.item_id(), "failed to update download item: {err}");
        }
    }
}

#[async_trait]
impl NotificationHandler for Dispatcher {
    async fn handle(&self, notification: Notification) {
        self.dispatch(notification).await;
    }
}

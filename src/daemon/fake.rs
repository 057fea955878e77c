use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use aria2::{AddUriOptions, Status, Version};

use crate::daemon::Daemon;
use crate::errors::{Error, Result};

/// Scripted daemon: serves whatever statuses a test sets and records calls.
#[derive(Debug, Default)]
pub(crate) struct FakeDaemon {
    statuses: Mutex<HashMap<String, Status>>,
    submitted: Mutex<Vec<(Vec<String>, AddUriOptions)>>,
    removed: Mutex<Vec<String>>,
    sequence: AtomicU64,
    purges: AtomicU64,
    reject_remove: bool,
    submit_delay: Option<Duration>,
}

impl FakeDaemon {
    pub fn rejecting_remove() -> Self {
        Self {
            reject_remove: true,
            ..Self::default()
        }
    }

    /// Answers `addUri` only after `delay`, the submission is recorded first.
    pub fn slow_submit(delay: Duration) -> Self {
        Self {
            submit_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set(&self, status: Status) {
        self.statuses
            .lock()
            .unwrap()
            .insert(status.gid.clone(), status);
    }

    pub fn submitted(&self) -> Vec<(Vec<String>, AddUriOptions)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn purges(&self) -> u64 {
        self.purges.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Daemon for FakeDaemon {
    async fn add_uri(&self, uris: &[String], options: &AddUriOptions) -> Result<String> {
        let gid = options.get("gid").map_or_else(
            || format!("{:016x}", self.sequence.fetch_add(1, Ordering::Relaxed) + 1),
            str::to_owned,
        );
        self.submitted
            .lock()
            .unwrap()
            .push((uris.to_vec(), options.clone()));
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        self.statuses
            .lock()
            .unwrap()
            .entry(gid.clone())
            .or_insert_with(|| Status {
                gid: gid.clone(),
                status: "active".into(),
                ..Status::default()
            });
        Ok(gid)
    }

    async fn tell_status(&self, gid: &str) -> Result<Status> {
        self.statuses
            .lock()
            .unwrap()
            .get(gid)
            .cloned()
            .ok_or_else(|| {
                Error::Rpc(aria2::Error::Rpc {
                    code: 1,
                    message: format!("GID {gid} is not found"),
                })
            })
    }

    async fn remove(&self, gid: &str) -> Result<String> {
        self.removed.lock().unwrap().push(gid.into());
        if self.reject_remove {
            return Err(Error::Disconnected);
        }
        self.statuses.lock().unwrap().remove(gid);
        Ok(gid.into())
    }

    async fn get_version(&self) -> Result<Version> {
        Ok(Version {
            version: "1.37.0".into(),
            enabled_features: Vec::new(),
        })
    }

    async fn purge_download_result(&self) -> Result<()> {
        self.purges.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

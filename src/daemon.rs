use async_trait::async_trait;

use aria2::{AddUriOptions, Notification, Status, Version};

use crate::errors::Result;

pub use connection::ConnectionManager;

pub mod connection;
#[cfg(test)]
pub(crate) mod fake;

/// Calls the service issues against the download daemon.
#[async_trait]
pub trait Daemon: Send + Sync {
    /// Submits a transfer and returns the daemon's job identifier.
    async fn add_uri(&self, uris: &[String], options: &AddUriOptions) -> Result<String>;

    async fn tell_status(&self, gid: &str) -> Result<Status>;

    async fn remove(&self, gid: &str) -> Result<String>;

    async fn get_version(&self) -> Result<Version>;

    /// Drops completed, errored and removed jobs from the daemon's memory.
    async fn purge_download_result(&self) -> Result<()>;
}

/// Receives every notification the daemon pushes.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, notification: Notification);
}
